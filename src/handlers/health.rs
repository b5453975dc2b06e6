use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Instant;

use crate::AppState;

/// Component health status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Up,
    Down,
}

/// Tracks application start time for uptime calculation
static START_TIME: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();

/// Initialize the start time (call this on application startup)
pub fn init_start_time() {
    let _ = START_TIME.get_or_init(Instant::now);
}

fn get_uptime_secs() -> u64 {
    START_TIME.get().map(|t| t.elapsed().as_secs()).unwrap_or(0)
}

/// Health check: the service answers and the database accepts queries
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let started = Instant::now();
    let db_result = crate::db::check_connection(&state.db).await;
    let db_latency = started.elapsed().as_millis() as u64;

    let (status_code, status) = match db_result {
        Ok(()) => (StatusCode::OK, ComponentStatus::Up),
        Err(_) => (StatusCode::SERVICE_UNAVAILABLE, ComponentStatus::Down),
    };

    (
        status_code,
        Json(json!({
            "status": status,
            "version": env!("CARGO_PKG_VERSION"),
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "uptime_secs": get_uptime_secs(),
            "checks": {
                "database": {
                    "status": status,
                    "latency_ms": db_latency
                }
            }
        })),
    )
}

/// Prometheus text exposition
async fn metrics_handler() -> impl IntoResponse {
    match crate::metrics::gather_metrics() {
        Ok(body) => (StatusCode::OK, body),
        Err(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            String::from("metrics error"),
        ),
    }
}

/// Creates the router for health check endpoints
///
/// Endpoints:
/// - GET /health  - liveness plus database ping
/// - GET /metrics - Prometheus metrics
pub fn health_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_handler))
}
