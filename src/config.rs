//! Configuration management

use std::{collections::HashMap, path::Path, time::Duration};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Environment files to load before processing config.
    /// Paths support ~ expansion. Loaded in order, later files override earlier.
    #[serde(default)]
    pub env_files: Vec<String>,
    /// Server configuration
    pub server: ServerConfig,
    /// Failsafe configuration
    pub failsafe: FailsafeConfig,
    /// Personalization configuration
    pub personalization: PersonalizationConfig,
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist or cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        // Load from file if provided
        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        // Merge environment variables (PERSONA_GATEWAY_ prefix)
        figment = figment.merge(Env::prefixed("PERSONA_GATEWAY_").split("__"));

        let config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        // Load env files into the process environment
        config.load_env_files();

        Ok(config)
    }

    /// Load environment files into the process environment.
    /// Supports ~ expansion. Files that don't exist are silently skipped.
    fn load_env_files(&self) {
        for path_str in &self.env_files {
            let expanded = if path_str.starts_with('~') {
                if let Some(home) = dirs::home_dir() {
                    path_str.replacen('~', &home.display().to_string(), 1)
                } else {
                    path_str.clone()
                }
            } else {
                path_str.clone()
            };

            let path = Path::new(&expanded);
            if path.exists() {
                match dotenvy::from_path(path) {
                    Ok(()) => {
                        tracing::info!("Loaded env file: {expanded}");
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load env file {expanded}: {e}");
                    }
                }
            } else {
                tracing::debug!("Env file not found (skipped): {expanded}");
            }
        }
    }
}

/// Deployment environment. The manual breaker reset is only honored
/// outside production.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    /// Local or staging deployment
    #[default]
    Development,
    /// Production deployment
    Production,
}

impl Environment {
    /// Whether this is a production deployment
    #[must_use]
    pub fn is_production(self) -> bool {
        self == Self::Production
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Request timeout
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    /// Graceful shutdown timeout
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
    /// Deployment environment
    pub environment: Environment,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 39500,
            request_timeout: Duration::from_secs(30),
            shutdown_timeout: Duration::from_secs(30),
            environment: Environment::Development,
        }
    }
}

/// Failsafe configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct FailsafeConfig {
    /// Circuit breaker configuration
    pub circuit_breaker: CircuitBreakerConfig,
    /// Health check configuration
    pub health_check: HealthCheckConfig,
}

/// Circuit breaker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Enable circuit breaker
    pub enabled: bool,
    /// Consecutive-error threshold before opening
    pub max_errors: u32,
    /// Consecutive-success threshold to close from half-open
    pub recovery_threshold: u32,
    /// Time to wait after the last error before a half-open probe
    #[serde(with = "humantime_serde")]
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_errors: 5,
            recovery_threshold: 3,
            cooldown: Duration::from_secs(60),
        }
    }
}

/// Health check configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthCheckConfig {
    /// Enable the periodic cooldown-probe task
    pub enabled: bool,
    /// Probe check interval
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(30),
        }
    }
}

/// Timeout budget tier for a personalization attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TimeoutLevel {
    /// Tightest budget, for latency-critical paths
    Fast,
    /// Standard page-serving budget
    #[default]
    Normal,
    /// Relaxed budget, used by the sync endpoint
    Slow,
}

/// Timeout budgets per tier
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutLevels {
    /// Fast tier budget
    #[serde(with = "humantime_serde")]
    pub fast: Duration,
    /// Normal tier budget
    #[serde(with = "humantime_serde")]
    pub normal: Duration,
    /// Slow tier budget
    #[serde(with = "humantime_serde")]
    pub slow: Duration,
}

impl Default for TimeoutLevels {
    fn default() -> Self {
        Self {
            fast: Duration::from_millis(50),
            normal: Duration::from_millis(200),
            slow: Duration::from_secs(1),
        }
    }
}

impl TimeoutLevels {
    /// Budget for a tier
    #[must_use]
    pub fn budget(&self, level: TimeoutLevel) -> Duration {
        match level {
            TimeoutLevel::Fast => self.fast,
            TimeoutLevel::Normal => self.normal,
            TimeoutLevel::Slow => self.slow,
        }
    }
}

/// Personalization configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PersonalizationConfig {
    /// Persona used when no persona can be resolved from the request
    pub default_persona: String,
    /// Timeout tier applied to page-serving attempts
    pub attempt_budget: TimeoutLevel,
    /// Timeout budgets per tier
    pub timeout_levels: TimeoutLevels,
    /// Content variants keyed by persona. Opaque to the gateway.
    pub variants: HashMap<String, String>,
}

impl Default for PersonalizationConfig {
    fn default() -> Self {
        Self {
            default_persona: "general".to_string(),
            attempt_budget: TimeoutLevel::Normal,
            timeout_levels: TimeoutLevels::default(),
            variants: HashMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();

        assert_eq!(config.server.port, 39500);
        assert_eq!(config.server.environment, Environment::Development);
        assert_eq!(config.failsafe.circuit_breaker.max_errors, 5);
        assert_eq!(config.failsafe.circuit_breaker.recovery_threshold, 3);
        assert_eq!(
            config.failsafe.circuit_breaker.cooldown,
            Duration::from_secs(60)
        );
        assert_eq!(config.personalization.default_persona, "general");
        assert_eq!(
            config.personalization.timeout_levels.budget(TimeoutLevel::Normal),
            Duration::from_millis(200)
        );
    }

    #[test]
    fn test_load_from_yaml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
server:
  port: 8081
  environment: production
failsafe:
  circuit_breaker:
    max_errors: 3
    cooldown: 30s
personalization:
  default_persona: shopper
  variants:
    shopper: "deals-first layout"
"#
        )
        .unwrap();

        let config = Config::load(Some(file.path())).unwrap();

        assert_eq!(config.server.port, 8081);
        assert!(config.server.environment.is_production());
        assert_eq!(config.failsafe.circuit_breaker.max_errors, 3);
        assert_eq!(
            config.failsafe.circuit_breaker.cooldown,
            Duration::from_secs(30)
        );
        assert_eq!(config.personalization.default_persona, "shopper");
        assert_eq!(
            config.personalization.variants.get("shopper").unwrap(),
            "deals-first layout"
        );
    }

    #[test]
    fn test_missing_config_file() {
        let result = Config::load(Some(Path::new("/nonexistent/gateway.yaml")));
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
