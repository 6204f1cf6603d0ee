//! Fallback strategy classification
//!
//! Every failed personalization attempt maps to a degradation level and a
//! retry hint. Different failure classes warrant different policies: a
//! data-parsing failure reproduces on retry and must never be retried, while
//! a timeout is worth another attempt at reduced fidelity.

use serde::{Deserialize, Serialize};

use crate::error::PersonalizationError;

/// Degree of degradation applied when personalization cannot complete
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FallbackLevel {
    /// Full personalization
    None,
    /// Persona-aware but reduced-fidelity content
    Simplified,
    /// Last-known-good cached variant
    Cached,
    /// Non-personalized default content
    Default,
}

impl std::fmt::Display for FallbackLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::None => "none",
            Self::Simplified => "simplified",
            Self::Cached => "cached",
            Self::Default => "default",
        };
        f.write_str(s)
    }
}

/// Per-failure degradation decision. Produced by the classifier, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FallbackStrategy {
    /// Degradation level for the response
    pub level: FallbackLevel,
    /// Failure class that produced the decision
    pub reason: &'static str,
    /// Whether a retry is worthwhile
    pub should_retry: bool,
    /// Suggested backoff before retrying
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
}

/// Cooldown that must elapse before retrying once the error run is deep
/// enough to have opened the circuit.
const OPEN_RETRY_COOLDOWN_MS: u64 = 60_000;

/// Error-run length at which classification stops trusting the failure class
/// and treats the path as down.
const RUN_CUTOFF: u32 = 5;

/// Classify a failed attempt into a fallback strategy.
///
/// Pure and total: always returns a strategy, never fails. Failure-class rules
/// are evaluated before the error-run cutoff, so a timeout stays "timeout"
/// however deep the run is.
#[must_use]
pub fn determine_fallback_strategy(
    error: &PersonalizationError,
    consecutive_errors: u32,
    last_error_ms: u64,
    now_ms: u64,
) -> FallbackStrategy {
    match error {
        PersonalizationError::Timeout => FallbackStrategy {
            level: FallbackLevel::Simplified,
            reason: "timeout",
            should_retry: consecutive_errors < 3,
            retry_after_ms: Some(1000),
        },
        PersonalizationError::Network => FallbackStrategy {
            level: FallbackLevel::Cached,
            reason: "network",
            should_retry: consecutive_errors < 2,
            retry_after_ms: Some(5000),
        },
        PersonalizationError::Data => FallbackStrategy {
            level: FallbackLevel::Default,
            reason: "data",
            should_retry: false,
            retry_after_ms: None,
        },
        PersonalizationError::Unknown(_) => {
            if consecutive_errors >= RUN_CUTOFF {
                FallbackStrategy {
                    level: FallbackLevel::Default,
                    reason: "circuit-breaker-open",
                    should_retry: now_ms.saturating_sub(last_error_ms) >= OPEN_RETRY_COOLDOWN_MS,
                    retry_after_ms: Some(OPEN_RETRY_COOLDOWN_MS),
                }
            } else {
                FallbackStrategy {
                    level: FallbackLevel::Default,
                    reason: "unknown",
                    should_retry: consecutive_errors < 3,
                    retry_after_ms: Some(2000),
                }
            }
        }
    }
}
