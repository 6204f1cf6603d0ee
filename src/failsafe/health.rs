//! Health report derivation
//!
//! Turns a metrics snapshot into a tri-level verdict with paired
//! issue/recommendation strings. Every applicable rule fires, so one report
//! can carry several issues. Pure and recomputed per request.

use serde::Serialize;

use super::circuit_breaker::CircuitStatus;
use super::metrics::BreakerMetrics;

/// Overall health verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// No issues
    Healthy,
    /// Issues present but the path is still serving
    Degraded,
    /// Circuit open, error rate above 20%, or uptime below 90%
    Unhealthy,
}

/// Derived health report
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    /// Overall verdict
    pub status: HealthStatus,
    /// Human-readable findings
    pub issues: Vec<String>,
    /// One actionable recommendation per issue
    pub recommendations: Vec<String>,
}

/// Derive a health report from breaker metrics. Pure, deterministic, total.
#[must_use]
pub fn generate_health_report(metrics: &BreakerMetrics) -> HealthReport {
    let mut issues = Vec::new();
    let mut recommendations = Vec::new();

    if metrics.error_rate > 20.0 {
        issues.push(format!("High error rate: {}%", metrics.error_rate));
        recommendations.push("Investigate root cause of personalization failures".to_string());
    } else if metrics.error_rate > 10.0 {
        issues.push(format!("Elevated error rate: {}%", metrics.error_rate));
        recommendations.push("Monitor error patterns closely".to_string());
    }

    if metrics.avg_latency > 200.0 {
        issues.push(format!("High latency: {}ms", metrics.avg_latency));
        recommendations
            .push("Optimize personalization logic or increase timeout budget".to_string());
    } else if metrics.avg_latency > 100.0 {
        issues.push(format!("Elevated latency: {}ms", metrics.avg_latency));
        recommendations.push("Consider caching strategies for personalization".to_string());
    }

    match metrics.status {
        CircuitStatus::Open => {
            issues.push("Circuit breaker is open".to_string());
            recommendations.push("Wait for automatic recovery cooldown".to_string());
        }
        CircuitStatus::HalfOpen => {
            issues.push("Circuit breaker is recovering".to_string());
            recommendations.push("Monitor recovery progress".to_string());
        }
        CircuitStatus::Closed => {}
    }

    if metrics.uptime < 95.0 {
        issues.push(format!("Low uptime: {}%", metrics.uptime));
        recommendations.push("Review personalization stability and error handling".to_string());
    }

    let status = if issues.is_empty() {
        HealthStatus::Healthy
    } else if metrics.status == CircuitStatus::Open
        || metrics.error_rate > 20.0
        || metrics.uptime < 90.0
    {
        HealthStatus::Unhealthy
    } else {
        HealthStatus::Degraded
    };

    HealthReport {
        status,
        issues,
        recommendations,
    }
}
