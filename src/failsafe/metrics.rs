//! Rolling performance window and derived breaker metrics

use std::collections::{BTreeMap, VecDeque};

use serde::Serialize;

use super::circuit_breaker::{BreakerSnapshot, CircuitStatus};

/// Rolling window length for latency/recency aggregates
pub const METRICS_WINDOW_MS: u64 = 60_000;

/// Hard cap on retained samples, independent of the time window
const MAX_SAMPLES: usize = 4096;

/// One personalization attempt outcome
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceSample {
    /// When the attempt finished (millis since epoch)
    pub timestamp_ms: u64,
    /// Attempt duration in milliseconds
    pub latency_ms: f64,
    /// Whether the attempt succeeded
    pub success: bool,
}

/// Append-only, time-bounded sample log
#[derive(Debug, Default)]
pub struct SampleWindow {
    samples: VecDeque<PerformanceSample>,
}

impl SampleWindow {
    /// Create an empty window
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a sample, pruning entries that have aged out of the window
    pub fn record(&mut self, sample: PerformanceSample) {
        let cutoff = sample.timestamp_ms.saturating_sub(METRICS_WINDOW_MS);
        while self
            .samples
            .front()
            .is_some_and(|s| s.timestamp_ms < cutoff)
        {
            self.samples.pop_front();
        }
        if self.samples.len() >= MAX_SAMPLES {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    /// Samples still inside the window as of `now_ms`
    #[must_use]
    pub fn windowed(&self, now_ms: u64) -> Vec<PerformanceSample> {
        self.samples
            .iter()
            .filter(|s| now_ms.saturating_sub(s.timestamp_ms) < METRICS_WINDOW_MS)
            .copied()
            .collect()
    }

    /// Number of retained samples (windowed or not)
    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether the window holds no samples
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Derived, read-only metrics snapshot. Always recomputed, never mutated.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakerMetrics {
    /// Circuit status at snapshot time
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
    /// Lifetime error percentage
    pub error_rate: f64,
    /// Mean latency over the rolling window (ms)
    pub avg_latency: f64,
    /// Lifetime success percentage; 100 when no traffic has been seen
    pub uptime: f64,
}

/// Round to two decimal places (wire rendering of rates/latencies)
fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Derive metrics from a state snapshot and the windowed samples.
///
/// Read-only over its inputs; safe to call repeatedly and concurrently.
#[must_use]
pub fn calculate_metrics(
    snapshot: &BreakerSnapshot,
    samples: &[PerformanceSample],
    now_ms: u64,
) -> BreakerMetrics {
    let windowed: Vec<&PerformanceSample> = samples
        .iter()
        .filter(|s| now_ms.saturating_sub(s.timestamp_ms) < METRICS_WINDOW_MS)
        .collect();

    let error_rate = if snapshot.total_requests == 0 {
        0.0
    } else {
        snapshot.total_errors as f64 / snapshot.total_requests as f64 * 100.0
    };

    let avg_latency = if windowed.is_empty() {
        0.0
    } else {
        windowed.iter().map(|s| s.latency_ms).sum::<f64>() / windowed.len() as f64
    };

    let uptime = if snapshot.total_requests == 0 {
        100.0
    } else {
        (snapshot.total_requests - snapshot.total_errors) as f64
            / snapshot.total_requests as f64
            * 100.0
    };

    BreakerMetrics {
        status: snapshot.status,
        consecutive_errors: snapshot.consecutive_errors,
        consecutive_successes: snapshot.consecutive_successes,
        total_requests: snapshot.total_requests,
        total_errors: snapshot.total_errors,
        total_fallbacks: snapshot.total_fallbacks,
        error_rate: round2(error_rate),
        avg_latency: round2(avg_latency),
        uptime: round2(uptime),
    }
}

/// Flatten metrics into a key/value set for a time-series backend and publish
/// them on the metrics facade. Status is numerically encoded
/// (closed=0, half-open=1, open=2).
#[must_use]
pub fn export_for_monitoring(metrics: &BreakerMetrics) -> BTreeMap<&'static str, f64> {
    let mut flat = BTreeMap::new();
    flat.insert("personalization.circuit_breaker.status", metrics.status.metric_value());
    flat.insert(
        "personalization.circuit_breaker.consecutive_errors",
        f64::from(metrics.consecutive_errors),
    );
    flat.insert(
        "personalization.circuit_breaker.consecutive_successes",
        f64::from(metrics.consecutive_successes),
    );
    flat.insert(
        "personalization.requests.total",
        metrics.total_requests as f64,
    );
    flat.insert("personalization.errors.total", metrics.total_errors as f64);
    flat.insert(
        "personalization.fallbacks.total",
        metrics.total_fallbacks as f64,
    );
    flat.insert("personalization.error_rate", metrics.error_rate);
    flat.insert("personalization.avg_latency_ms", metrics.avg_latency);
    flat.insert("personalization.uptime", metrics.uptime);

    for (key, value) in &flat {
        telemetry_metrics::gauge!(*key).set(*value);
    }

    flat
}
