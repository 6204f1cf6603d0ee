//! Persona resolution and breaker-guarded content selection
//!
//! The provider behind [`ContentSource`] is an external collaborator; every
//! call to it goes through the circuit breaker with a timeout budget. A raw
//! provider error never escapes this module: the worst observable outcome is
//! default content.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use axum::http::HeaderMap;
use dashmap::DashMap;
use serde::Serialize;
use tracing::debug;

use crate::config::{PersonalizationConfig, TimeoutLevel};
use crate::error::PersonalizationError;
use crate::failsafe::{CircuitBreaker, FallbackLevel, FallbackStrategy};

/// Source of personalized content variants.
///
/// `personalized` may fail or hang (it is raced against the timeout budget);
/// `simplified` and `default_content` are local and infallible, so the
/// degraded tiers always have something to serve.
#[async_trait]
pub trait ContentSource: Send + Sync {
    /// Full-fidelity variant for a persona
    async fn personalized(&self, persona: &str) -> Result<String, PersonalizationError>;

    /// Persona-aware but reduced-fidelity variant
    fn simplified(&self, persona: &str) -> String;

    /// Non-personalized default content
    fn default_content(&self) -> String;
}

/// Content source backed by the configured variants map
pub struct StaticContentSource {
    variants: HashMap<String, String>,
    default_body: String,
}

impl StaticContentSource {
    /// Build from configured variants; the default persona's variant (or a
    /// fixed placeholder) becomes the default content
    #[must_use]
    pub fn new(config: &PersonalizationConfig) -> Self {
        let default_body = config
            .variants
            .get(&config.default_persona)
            .cloned()
            .unwrap_or_else(|| "default content".to_string());
        Self {
            variants: config.variants.clone(),
            default_body,
        }
    }
}

#[async_trait]
impl ContentSource for StaticContentSource {
    async fn personalized(&self, persona: &str) -> Result<String, PersonalizationError> {
        match self.variants.get(persona) {
            Some(body) => Ok(body.clone()),
            None => Ok(self.default_body.clone()),
        }
    }

    fn simplified(&self, persona: &str) -> String {
        format!("{} (simplified for {persona})", self.default_body)
    }

    fn default_content(&self) -> String {
        self.default_body.clone()
    }
}

/// Resolve the visitor persona from request headers.
///
/// Precedence: `x-persona` header, then `persona` cookie, then the configured
/// default. The persona itself is computed upstream; we only carry the label.
#[must_use]
pub fn resolve_persona(headers: &HeaderMap, default_persona: &str) -> String {
    if let Some(value) = headers.get("x-persona").and_then(|v| v.to_str().ok()) {
        if !value.is_empty() {
            return value.to_string();
        }
    }

    if let Some(cookies) = headers.get("cookie").and_then(|v| v.to_str().ok()) {
        for pair in cookies.split(';') {
            if let Some((name, value)) = pair.split_once('=') {
                if name.trim() == "persona" && !value.trim().is_empty() {
                    return value.trim().to_string();
                }
            }
        }
    }

    default_persona.to_string()
}

/// One personalization outcome, ready to be rendered with headers
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonalizedResponse {
    /// Resolved persona label
    pub persona: String,
    /// Degradation level actually applied
    pub level: FallbackLevel,
    /// Failure class when degraded, `None` on full personalization
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<&'static str>,
    /// Retry hint carried through from the classifier
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
    /// Content body served to the visitor
    pub content: String,
}

/// Outcome of a sync request for one persona
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncOutcome {
    /// Whether the cached variant was refreshed
    pub synced: bool,
    /// Persona that was synced
    pub persona: String,
    /// Why the refresh was skipped or degraded, if it was
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<&'static str>,
}

/// Hard cap on cached personas, independent of request volume
const MAX_CACHED_PERSONAS: usize = 1024;

/// Breaker-guarded personalization wrapper
pub struct Personalizer {
    source: Arc<dyn ContentSource>,
    breaker: Arc<CircuitBreaker>,
    /// Last-known-good variant per persona, backing the `Cached` tier.
    /// Bounded by [`MAX_CACHED_PERSONAS`]; persona labels come straight from
    /// request headers and must not grow the map without limit.
    cache: DashMap<String, String>,
    config: PersonalizationConfig,
}

impl Personalizer {
    /// Create a wrapper around a content source and breaker
    #[must_use]
    pub fn new(
        source: Arc<dyn ContentSource>,
        breaker: Arc<CircuitBreaker>,
        config: PersonalizationConfig,
    ) -> Self {
        Self {
            source,
            breaker,
            cache: DashMap::new(),
            config,
        }
    }

    /// The configured default persona
    #[must_use]
    pub fn default_persona(&self) -> &str {
        &self.config.default_persona
    }

    /// Store a variant in the cached tier, refusing new personas once the cap
    /// is reached. Known personas always refresh. Returns whether the variant
    /// was stored.
    ///
    /// Check and insert are separate dashmap operations; concurrent inserts
    /// may briefly overshoot the cap by a few entries.
    fn cache_store(&self, persona: &str, content: String) -> bool {
        if self.cache.contains_key(persona) || self.cache.len() < MAX_CACHED_PERSONAS {
            self.cache.insert(persona.to_string(), content);
            true
        } else {
            debug!(persona, "Persona cache full, variant not stored");
            false
        }
    }

    /// Serve content for a persona through the breaker.
    ///
    /// When the circuit is open (and the cooldown has not elapsed) the
    /// provider is never called and the attempt is not counted.
    pub async fn respond(&self, persona: &str) -> PersonalizedResponse {
        if !self.breaker.can_proceed() {
            return PersonalizedResponse {
                persona: persona.to_string(),
                level: FallbackLevel::Default,
                reason: Some("circuit-breaker-open"),
                retry_after_ms: None,
                content: self.source.default_content(),
            };
        }

        let budget = self
            .config
            .timeout_levels
            .budget(self.config.attempt_budget);
        let started = Instant::now();

        match tokio::time::timeout(budget, self.source.personalized(persona)).await {
            Ok(Ok(content)) => {
                self.breaker.record_success(started.elapsed());
                self.cache_store(persona, content.clone());
                debug!(persona, "Personalization succeeded");
                PersonalizedResponse {
                    persona: persona.to_string(),
                    level: FallbackLevel::None,
                    reason: None,
                    retry_after_ms: None,
                    content,
                }
            }
            Ok(Err(error)) => self.degrade(persona, &error, started),
            Err(_) => self.degrade(persona, &PersonalizationError::Timeout, started),
        }
    }

    /// Refresh the cached variant for a persona.
    ///
    /// A pushed variant is stored directly; otherwise the provider is fetched
    /// under the slow budget. An open circuit skips the fetch entirely.
    pub async fn sync(&self, persona: &str, pushed: Option<String>) -> SyncOutcome {
        if let Some(content) = pushed {
            let synced = self.cache_store(persona, content);
            return SyncOutcome {
                synced,
                persona: persona.to_string(),
                reason: if synced { None } else { Some("cache-full") },
            };
        }

        if !self.breaker.can_proceed() {
            return SyncOutcome {
                synced: false,
                persona: persona.to_string(),
                reason: Some("circuit-breaker-open"),
            };
        }

        let budget = self.config.timeout_levels.budget(TimeoutLevel::Slow);
        let started = Instant::now();

        match tokio::time::timeout(budget, self.source.personalized(persona)).await {
            Ok(Ok(content)) => {
                self.breaker.record_success(started.elapsed());
                let synced = self.cache_store(persona, content);
                SyncOutcome {
                    synced,
                    persona: persona.to_string(),
                    reason: if synced { None } else { Some("cache-full") },
                }
            }
            Ok(Err(error)) => {
                let strategy = self.breaker.record_failure(&error, started.elapsed());
                SyncOutcome {
                    synced: false,
                    persona: persona.to_string(),
                    reason: Some(strategy.reason),
                }
            }
            Err(_) => {
                let strategy = self
                    .breaker
                    .record_failure(&PersonalizationError::Timeout, started.elapsed());
                SyncOutcome {
                    synced: false,
                    persona: persona.to_string(),
                    reason: Some(strategy.reason),
                }
            }
        }
    }

    /// Record the failure, pick the degradation tier, and build the response
    fn degrade(
        &self,
        persona: &str,
        error: &PersonalizationError,
        started: Instant,
    ) -> PersonalizedResponse {
        let strategy: FallbackStrategy = self.breaker.record_failure(error, started.elapsed());

        let (level, content) = match strategy.level {
            FallbackLevel::Simplified => {
                (FallbackLevel::Simplified, self.source.simplified(persona))
            }
            FallbackLevel::Cached => match self.cache.get(persona) {
                Some(cached) => (FallbackLevel::Cached, cached.value().clone()),
                // Cache miss falls through to default content
                None => (FallbackLevel::Default, self.source.default_content()),
            },
            FallbackLevel::Default | FallbackLevel::None => {
                (FallbackLevel::Default, self.source.default_content())
            }
        };

        PersonalizedResponse {
            persona: persona.to_string(),
            level,
            reason: Some(strategy.reason),
            retry_after_ms: strategy.retry_after_ms,
            content,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::config::CircuitBreakerConfig;
    use crate::failsafe::CircuitStatus;

    /// Scripted source: fails with the given error until `fail_count` runs out
    struct FlakySource {
        fail_count: AtomicU32,
        error: PersonalizationError,
    }

    impl FlakySource {
        fn failing(times: u32, error: PersonalizationError) -> Self {
            Self {
                fail_count: AtomicU32::new(times),
                error,
            }
        }
    }

    #[async_trait]
    impl ContentSource for FlakySource {
        async fn personalized(&self, persona: &str) -> Result<String, PersonalizationError> {
            let remaining = self.fail_count.load(Ordering::SeqCst);
            if remaining > 0 {
                self.fail_count.store(remaining - 1, Ordering::SeqCst);
                return Err(self.error.clone());
            }
            Ok(format!("variant for {persona}"))
        }

        fn simplified(&self, persona: &str) -> String {
            format!("simplified for {persona}")
        }

        fn default_content(&self) -> String {
            "default content".to_string()
        }
    }

    fn personalizer(source: FlakySource, breaker_config: &CircuitBreakerConfig) -> Personalizer {
        Personalizer::new(
            Arc::new(source),
            Arc::new(CircuitBreaker::with_memory_store(breaker_config)),
            PersonalizationConfig::default(),
        )
    }

    #[test]
    fn test_persona_resolution_precedence() {
        let mut headers = HeaderMap::new();
        headers.insert("cookie", "session=abc; persona=shopper".parse().unwrap());
        headers.insert("x-persona", "athlete".parse().unwrap());
        assert_eq!(resolve_persona(&headers, "general"), "athlete");

        headers.remove("x-persona");
        assert_eq!(resolve_persona(&headers, "general"), "shopper");

        headers.remove("cookie");
        assert_eq!(resolve_persona(&headers, "general"), "general");
    }

    #[tokio::test]
    async fn test_successful_attempt_serves_full_personalization() {
        let p = personalizer(
            FlakySource::failing(0, PersonalizationError::Network),
            &CircuitBreakerConfig::default(),
        );

        let response = p.respond("shopper").await;
        assert_eq!(response.level, FallbackLevel::None);
        assert_eq!(response.reason, None);
        assert_eq!(response.content, "variant for shopper");
    }

    #[tokio::test]
    async fn test_network_failure_serves_cached_variant() {
        let p = personalizer(
            FlakySource::failing(1, PersonalizationError::Network),
            &CircuitBreakerConfig::default(),
        );

        // Warm the cache by pushing a variant
        p.sync("shopper", Some("cached shopper page".to_string()))
            .await;

        let response = p.respond("shopper").await;
        assert_eq!(response.level, FallbackLevel::Cached);
        assert_eq!(response.reason, Some("network"));
        assert_eq!(response.content, "cached shopper page");
    }

    #[tokio::test]
    async fn test_network_failure_with_cold_cache_serves_default() {
        let p = personalizer(
            FlakySource::failing(1, PersonalizationError::Network),
            &CircuitBreakerConfig::default(),
        );

        let response = p.respond("shopper").await;
        assert_eq!(response.level, FallbackLevel::Default);
        assert_eq!(response.content, "default content");
    }

    #[tokio::test]
    async fn test_timeout_serves_simplified() {
        let p = personalizer(
            FlakySource::failing(1, PersonalizationError::Timeout),
            &CircuitBreakerConfig::default(),
        );

        let response = p.respond("athlete").await;
        assert_eq!(response.level, FallbackLevel::Simplified);
        assert_eq!(response.reason, Some("timeout"));
        assert_eq!(response.content, "simplified for athlete");
    }

    #[tokio::test]
    async fn test_open_circuit_skips_provider_and_attempt_count() {
        let p = personalizer(
            FlakySource::failing(100, PersonalizationError::Unknown("boom".to_string())),
            &CircuitBreakerConfig::default(),
        );

        for _ in 0..5 {
            p.respond("shopper").await;
        }
        let before = p.breaker.snapshot();
        assert_eq!(before.status, CircuitStatus::Open);

        let response = p.respond("shopper").await;
        assert_eq!(response.level, FallbackLevel::Default);
        assert_eq!(response.reason, Some("circuit-breaker-open"));

        // Skipped requests are not counted against the breaker
        assert_eq!(p.breaker.snapshot().total_requests, before.total_requests);
    }

    #[tokio::test]
    async fn test_slow_provider_hits_timeout_budget() {
        struct SlowSource;

        #[async_trait]
        impl ContentSource for SlowSource {
            async fn personalized(&self, _persona: &str) -> Result<String, PersonalizationError> {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok("too late".to_string())
            }

            fn simplified(&self, persona: &str) -> String {
                format!("simplified for {persona}")
            }

            fn default_content(&self) -> String {
                "default content".to_string()
            }
        }

        let p = Personalizer::new(
            Arc::new(SlowSource),
            Arc::new(CircuitBreaker::with_memory_store(
                &CircuitBreakerConfig::default(),
            )),
            PersonalizationConfig::default(),
        );

        // Paused clock auto-advances to the nearest timer: the 200ms budget
        // fires long before the 5s provider sleep
        tokio::time::pause();
        let response = p.respond("shopper").await;

        assert_eq!(response.level, FallbackLevel::Simplified);
        assert_eq!(response.reason, Some("timeout"));
    }

    #[tokio::test]
    async fn test_cache_is_bounded_under_distinct_personas() {
        let p = personalizer(
            FlakySource::failing(0, PersonalizationError::Network),
            &CircuitBreakerConfig::default(),
        );

        // Attacker-style traffic: every request carries a fresh persona label
        for i in 0..(MAX_CACHED_PERSONAS + 50) {
            p.respond(&format!("persona-{i}")).await;
        }
        assert_eq!(p.cache.len(), MAX_CACHED_PERSONAS);

        // Known personas still refresh once the cap is reached
        let outcome = p.sync("persona-0", Some("fresh variant".to_string())).await;
        assert!(outcome.synced);
        assert_eq!(
            p.cache.get("persona-0").map(|v| v.value().clone()),
            Some("fresh variant".to_string())
        );

        // New personas are refused, and the sync outcome says so
        let outcome = p.sync("persona-overflow", Some("x".to_string())).await;
        assert!(!outcome.synced);
        assert_eq!(outcome.reason, Some("cache-full"));
        assert_eq!(p.cache.len(), MAX_CACHED_PERSONAS);
    }

    #[tokio::test]
    async fn test_sync_refreshes_cache_after_recovery() {
        let p = personalizer(
            FlakySource::failing(0, PersonalizationError::Network),
            &CircuitBreakerConfig::default(),
        );

        let outcome = p.sync("shopper", None).await;
        assert!(outcome.synced);
        assert_eq!(
            p.cache.get("shopper").map(|v| v.value().clone()),
            Some("variant for shopper".to_string())
        );
    }

    #[tokio::test]
    async fn test_sync_skips_when_open() {
        let p = personalizer(
            FlakySource::failing(100, PersonalizationError::Unknown("boom".to_string())),
            &CircuitBreakerConfig::default(),
        );

        for _ in 0..5 {
            p.respond("shopper").await;
        }

        let outcome = p.sync("shopper", None).await;
        assert!(!outcome.synced);
        assert_eq!(outcome.reason, Some("circuit-breaker-open"));
    }
}
