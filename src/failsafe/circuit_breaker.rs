//! Circuit breaker implementation
//!
//! The transition rule is a pure function over counters; the shared breaker
//! owns the serialized state mutations and the latency sample window. Cooldown
//! timing (open to half-open) is handled by the callers of [`next_status`],
//! never by the transition rule itself.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::fallback::{FallbackStrategy, determine_fallback_strategy};
use super::metrics::{BreakerMetrics, PerformanceSample, SampleWindow, calculate_metrics};
use crate::config::CircuitBreakerConfig;
use crate::epoch_millis;
use crate::error::PersonalizationError;
use crate::store::{MemoryStateStore, StateStore};

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CircuitStatus {
    /// Circuit is closed (personalization attempted)
    Closed,
    /// Circuit is open (personalization bypassed, default content served)
    Open,
    /// Circuit is half-open (limited attempts allowed to test recovery)
    HalfOpen,
}

impl CircuitStatus {
    /// Numeric encoding for time-series backends: closed=0, half-open=1, open=2
    #[must_use]
    pub fn metric_value(self) -> f64 {
        match self {
            Self::Closed => 0.0,
            Self::HalfOpen => 1.0,
            Self::Open => 2.0,
        }
    }
}

impl std::fmt::Display for CircuitStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half-open",
        };
        f.write_str(s)
    }
}

/// Shared breaker state snapshot.
///
/// `consecutive_errors` and `consecutive_successes` are mutually exclusive run
/// counts: any success zeroes the error run and vice versa. Lifetime totals
/// only ever grow, and `total_errors <= total_requests` always holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakerSnapshot {
    /// Current circuit status
    pub status: CircuitStatus,
    /// Failures since the last success
    pub consecutive_errors: u32,
    /// Successes since the last failure
    pub consecutive_successes: u32,
    /// Lifetime request count
    pub total_requests: u64,
    /// Lifetime error count
    pub total_errors: u64,
    /// Lifetime fallback count
    pub total_fallbacks: u64,
    /// Last error timestamp (millis since epoch, 0 = never)
    pub last_error_ms: u64,
    /// Last success timestamp (millis since epoch, 0 = never)
    pub last_success_ms: u64,
}

impl Default for BreakerSnapshot {
    fn default() -> Self {
        Self {
            status: CircuitStatus::Closed,
            consecutive_errors: 0,
            consecutive_successes: 0,
            total_requests: 0,
            total_errors: 0,
            total_fallbacks: 0,
            last_error_ms: 0,
            last_success_ms: 0,
        }
    }
}

/// Pure transition rule for the circuit breaker.
///
/// - `Closed` opens once `consecutive_errors` reaches `max_errors`.
/// - `Open` never transitions here; the elapsed-cooldown check that enables a
///   half-open probe is the caller's responsibility.
/// - `HalfOpen` closes once `consecutive_successes` reaches
///   `recovery_threshold`, and reopens on any error.
///
/// Total over its inputs: every `(status, counts, thresholds)` tuple maps to
/// exactly one next status.
#[must_use]
pub fn next_status(
    status: CircuitStatus,
    consecutive_errors: u32,
    consecutive_successes: u32,
    max_errors: u32,
    recovery_threshold: u32,
) -> CircuitStatus {
    match status {
        CircuitStatus::Closed => {
            if consecutive_errors >= max_errors {
                CircuitStatus::Open
            } else {
                CircuitStatus::Closed
            }
        }
        CircuitStatus::Open => CircuitStatus::Open,
        CircuitStatus::HalfOpen => {
            if consecutive_errors > 0 {
                CircuitStatus::Open
            } else if consecutive_successes >= recovery_threshold {
                CircuitStatus::Closed
            } else {
                CircuitStatus::HalfOpen
            }
        }
    }
}

/// Circuit breaker guarding the personalization path
pub struct CircuitBreaker {
    /// Whether the breaker gates requests at all
    enabled: bool,
    max_errors: u32,
    recovery_threshold: u32,
    cooldown: Duration,
    /// Injected state backend; in-memory by default, swappable for a shared
    /// store in a multi-instance topology
    store: Arc<dyn StateStore>,
    /// Rolling latency window
    samples: Mutex<SampleWindow>,
}

impl CircuitBreaker {
    /// Create a breaker over an injected state store
    #[must_use]
    pub fn new(config: &CircuitBreakerConfig, store: Arc<dyn StateStore>) -> Self {
        Self {
            enabled: config.enabled,
            max_errors: config.max_errors,
            recovery_threshold: config.recovery_threshold,
            cooldown: config.cooldown,
            store,
            samples: Mutex::new(SampleWindow::new()),
        }
    }

    /// Create a breaker backed by a fresh in-memory store
    #[must_use]
    pub fn with_memory_store(config: &CircuitBreakerConfig) -> Self {
        Self::new(config, Arc::new(MemoryStateStore::new()))
    }

    /// Check if a personalization attempt may proceed.
    ///
    /// While open, an attempt is only allowed once the cooldown since the last
    /// error has elapsed, which moves the circuit to half-open for a probe.
    /// A rejected request is not counted against the breaker.
    pub fn can_proceed(&self) -> bool {
        if !self.enabled {
            return true;
        }

        match self.store.snapshot().status {
            CircuitStatus::Closed => true,
            CircuitStatus::HalfOpen => {
                debug!("Circuit half-open, allowing probe request");
                true
            }
            CircuitStatus::Open => {
                if self.try_probe() {
                    true
                } else {
                    warn!("Circuit open, skipping personalization");
                    false
                }
            }
        }
    }

    /// If open and the cooldown has elapsed, transition to half-open.
    ///
    /// Returns true when the transition happened. Also driven periodically by
    /// the server's health-check task so recovery eligibility is reflected
    /// even without traffic.
    pub fn try_probe(&self) -> bool {
        let now = epoch_millis();
        let cooldown_ms = self.cooldown.as_millis() as u64;
        let mut probed = false;

        self.store.update(&mut |state| {
            probed = state.status == CircuitStatus::Open
                && now.saturating_sub(state.last_error_ms) >= cooldown_ms;
            if probed {
                state.status = CircuitStatus::HalfOpen;
                state.consecutive_successes = 0;
            }
        });

        if probed {
            info!("Cooldown elapsed, circuit half-open for probe");
        }
        probed
    }

    /// Record a successful personalization attempt
    pub fn record_success(&self, latency: Duration) {
        let now = epoch_millis();
        let latency_ms = latency.as_secs_f64() * 1000.0;
        let mut edge = None;

        self.store.update(&mut |state| {
            state.total_requests += 1;
            state.consecutive_successes += 1;
            state.consecutive_errors = 0;
            state.last_success_ms = now;

            edge = self.transition(state);
        });

        self.samples.lock().record(PerformanceSample {
            timestamp_ms: now,
            latency_ms,
            success: true,
        });

        if let Some((from, to)) = edge {
            info!(%from, %to, "Circuit breaker recovered");
        }
    }

    /// Record a failed personalization attempt and classify the fallback.
    ///
    /// The strategy sees the post-update error run (the attempt counts toward
    /// its own classification) but the pre-update error timestamp, so the
    /// elapsed-cooldown retry check measures time since the previous failure.
    pub fn record_failure(
        &self,
        error: &PersonalizationError,
        latency: Duration,
    ) -> FallbackStrategy {
        let now = epoch_millis();
        let latency_ms = latency.as_secs_f64() * 1000.0;
        let mut strategy = None;
        let mut edge = None;

        self.store.update(&mut |state| {
            let previous_error_ms = state.last_error_ms;
            state.total_requests += 1;
            state.total_errors += 1;
            state.total_fallbacks += 1;
            state.consecutive_errors += 1;
            state.consecutive_successes = 0;
            state.last_error_ms = now;

            strategy = Some(determine_fallback_strategy(
                error,
                state.consecutive_errors,
                previous_error_ms,
                now,
            ));
            edge = self.transition(state);
        });

        self.samples.lock().record(PerformanceSample {
            timestamp_ms: now,
            latency_ms,
            success: false,
        });

        // update() always runs the closure, so strategy is always set
        let strategy = strategy.unwrap_or_else(|| {
            determine_fallback_strategy(error, 1, now, now)
        });

        match edge {
            Some((from, to)) => {
                warn!(%from, %to, reason = strategy.reason, "Circuit breaker tripped")
            }
            None => {
                warn!(error = %error, reason = strategy.reason, "Personalization attempt failed")
            }
        }

        strategy
    }

    /// Apply the pure transition rule in place, returning the edge if one fired
    fn transition(&self, state: &mut BreakerSnapshot) -> Option<(CircuitStatus, CircuitStatus)> {
        let from = state.status;
        let to = next_status(
            from,
            state.consecutive_errors,
            state.consecutive_successes,
            self.max_errors,
            self.recovery_threshold,
        );
        if to == from {
            return None;
        }
        state.status = to;
        if to == CircuitStatus::Closed {
            state.consecutive_errors = 0;
        }
        Some((from, to))
    }

    /// Current state snapshot
    #[must_use]
    pub fn snapshot(&self) -> BreakerSnapshot {
        self.store.snapshot()
    }

    /// Derived metrics over the current snapshot and sample window
    #[must_use]
    pub fn metrics(&self) -> BreakerMetrics {
        let now = epoch_millis();
        let snapshot = self.store.snapshot();
        let samples = self.samples.lock().windowed(now);
        calculate_metrics(&snapshot, &samples, now)
    }

    /// Manual reset: clear consecutive runs and close the circuit.
    ///
    /// Lifetime totals are preserved for historical reporting.
    pub fn reset(&self) {
        self.store.update(&mut |state| {
            state.status = CircuitStatus::Closed;
            state.consecutive_errors = 0;
            state.consecutive_successes = 0;
        });
        info!("Circuit breaker manually reset");
    }

    /// Configured cooldown before a half-open probe
    #[must_use]
    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }
}
