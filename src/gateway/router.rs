//! HTTP router and handlers

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::{HeaderMap, HeaderValue, StatusCode},
    response::IntoResponse,
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::{Value, json};
use tower_http::{catch_panic::CatchPanicLayer, compression::CompressionLayer, trace::TraceLayer};
use tracing::{error, info};

use super::personalization::{PersonalizedResponse, Personalizer, resolve_persona};
use crate::config::Environment;
use crate::failsafe::{
    CircuitBreaker, FallbackLevel, HealthStatus, export_for_monitoring, generate_health_report,
};
use crate::Result;

/// Shared application state
pub struct AppState {
    /// Breaker-guarded personalization wrapper
    pub personalizer: Arc<Personalizer>,
    /// Circuit breaker (shared with the personalizer)
    pub breaker: Arc<CircuitBreaker>,
    /// Deployment environment (gates the manual reset)
    pub environment: Environment,
}

/// Create the router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(
            "/api/middleware-health",
            get(health_handler).post(control_handler),
        )
        .route("/api/personalization/sync", post(sync_handler))
        .route("/", get(content_handler))
        .route("/p/{*path}", get(content_handler))
        .layer(CatchPanicLayer::new())
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Wire shape of the health endpoint body
#[derive(serde::Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthPayload {
    status: HealthStatus,
    timestamp: String,
    circuit_breaker: Value,
    metrics: Value,
    issues: Vec<String>,
    recommendations: Vec<String>,
}

/// Build the health payload. Split out so the handler has an honest
/// meta-failure path (serialization) to map to 503.
fn build_health_payload(state: &AppState) -> Result<(HealthStatus, Value)> {
    let metrics = state.breaker.metrics();
    let report = generate_health_report(&metrics);
    let snapshot = state.breaker.snapshot();

    let payload = HealthPayload {
        status: report.status,
        timestamp: chrono::Utc::now().to_rfc3339(),
        circuit_breaker: json!({
            "status": snapshot.status,
            "consecutiveErrors": snapshot.consecutive_errors,
            "consecutiveSuccesses": snapshot.consecutive_successes,
        }),
        metrics: json!({
            "totalRequests": metrics.total_requests,
            "totalErrors": metrics.total_errors,
            "totalFallbacks": metrics.total_fallbacks,
            "errorRate": metrics.error_rate,
            "avgLatency": metrics.avg_latency,
            "uptime": metrics.uptime,
        }),
        issues: report.issues,
        recommendations: report.recommendations,
    };

    let body = serde_json::to_value(&payload)?;
    Ok((report.status, body))
}

/// GET /api/middleware-health
///
/// 200 healthy, 207 degraded, 503 unhealthy. A failure to compute the report
/// itself also maps to 503, with a generic message.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match build_health_payload(&state) {
        Ok((status, body)) => {
            let code = match status {
                HealthStatus::Healthy => StatusCode::OK,
                HealthStatus::Degraded => StatusCode::MULTI_STATUS,
                HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
            };
            (code, Json(body))
        }
        Err(e) => {
            error!(error = %e, "Failed to compute health report");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "unhealthy",
                    "error": "Health check failed",
                    "issues": ["Health check endpoint failure"],
                    "recommendations": ["Check middleware configuration and logs"],
                })),
            )
        }
    }
}

/// Control request body
#[derive(Debug, Deserialize)]
struct ControlRequest {
    action: String,
}

/// POST /api/middleware-health - manual controls, non-production only
async fn control_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ControlRequest>,
) -> impl IntoResponse {
    if state.environment.is_production() {
        return (
            StatusCode::FORBIDDEN,
            Json(json!({
                "error": "Manual circuit breaker controls are disabled in production",
            })),
        );
    }

    match request.action.as_str() {
        "reset" => {
            state.breaker.reset();
            info!("Circuit breaker reset via control endpoint");
            (
                StatusCode::OK,
                Json(json!({
                    "success": true,
                    "message": "Circuit breaker counters reset",
                    "timestamp": chrono::Utc::now().to_rfc3339(),
                })),
            )
        }
        other => (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "error": format!("Unknown action: {other}"),
            })),
        ),
    }
}

/// Sync request body
#[derive(Debug, Deserialize)]
struct SyncRequest {
    persona: String,
    #[serde(default)]
    content: Option<String>,
}

/// POST /api/personalization/sync - warm the cached fallback tier
async fn sync_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SyncRequest>,
) -> impl IntoResponse {
    let outcome = state
        .personalizer
        .sync(&request.persona, request.content)
        .await;
    let snapshot = state.breaker.snapshot();

    Json(json!({
        "synced": outcome.synced,
        "persona": outcome.persona,
        "reason": outcome.reason,
        "circuitBreaker": {
            "status": snapshot.status,
            "consecutiveErrors": snapshot.consecutive_errors,
        },
    }))
}

/// GET / and GET /p/{*path} - personalized content with observability headers
async fn content_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let persona = resolve_persona(&headers, state.personalizer.default_persona());
    let response = state.personalizer.respond(&persona).await;
    let response_headers = observability_headers(&state, &response);

    (StatusCode::OK, response_headers, Json(response))
}

/// Headers consumed by monitoring tooling on every personalized response
fn observability_headers(state: &AppState, response: &PersonalizedResponse) -> HeaderMap {
    let metrics = state.breaker.metrics();
    let mut headers = HeaderMap::new();

    let status = match response.level {
        FallbackLevel::None => "active",
        FallbackLevel::Simplified => "simplified",
        FallbackLevel::Cached | FallbackLevel::Default => "fallback",
    };
    headers.insert("x-personalization-status", HeaderValue::from_static(status));

    if let Some(reason) = response.reason {
        headers.insert(
            "x-personalization-fallback-reason",
            HeaderValue::from_static(reason),
        );
    }

    if let Ok(value) = HeaderValue::from_str(&metrics.status.to_string()) {
        headers.insert("x-circuit-breaker-status", value);
    }
    headers.insert(
        "x-circuit-breaker-errors",
        HeaderValue::from(metrics.consecutive_errors),
    );
    headers.insert(
        "x-circuit-breaker-total-requests",
        HeaderValue::from(metrics.total_requests),
    );
    if let Ok(value) = HeaderValue::from_str(&format!("{:.2}", metrics.error_rate)) {
        headers.insert("x-circuit-breaker-error-rate", value);
    }

    // Keep monitoring gauges fresh on the serving path
    let _ = export_for_monitoring(&metrics);

    headers
}
