//! Failsafe mechanisms: circuit breaker, fallback classification, metrics, health

mod circuit_breaker;
mod fallback;
mod health;
mod metrics;

pub use circuit_breaker::{BreakerSnapshot, CircuitBreaker, CircuitStatus, next_status};
pub use fallback::{FallbackLevel, FallbackStrategy, determine_fallback_strategy};
pub use health::{HealthReport, HealthStatus, generate_health_report};
pub use metrics::{
    BreakerMetrics, METRICS_WINDOW_MS, PerformanceSample, SampleWindow, calculate_metrics,
    export_for_monitoring,
};
