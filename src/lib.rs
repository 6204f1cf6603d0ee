//! Persona Gateway Library
//!
//! Edge personalization gateway with circuit-breaker fallback.
//!
//! # Features
//!
//! - **Circuit Breaker**: closed/open/half-open gating of personalization attempts
//! - **Classified Fallback**: per-failure-class degradation (simplified, cached, default)
//! - **Rolling Metrics**: 60-second latency window, error rate and uptime derivation
//! - **Health Reporting**: actionable issue/recommendation pairs over HTTP
//! - **Production Ready**: graceful shutdown, structured logging, monitoring export

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cli;
pub mod config;
pub mod error;
pub mod failsafe;
pub mod gateway;
pub mod store;

pub use error::{Error, PersonalizationError, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => {
            subscriber.with(fmt::layer().json()).init();
        }
        _ => {
            subscriber.with(fmt::layer()).init();
        }
    }

    Ok(())
}

/// Current time in milliseconds since the Unix epoch.
///
/// All breaker timestamps use this clock so snapshots stay comparable
/// across the classifier, metrics window, and cooldown checks.
#[must_use]
pub fn epoch_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
