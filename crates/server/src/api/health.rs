use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::Serialize;
use tracing::warn;

use turnstile_engine::EngineMetricsSnapshot;

use super::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub store: &'static str,
    pub metrics: EngineMetricsSnapshot,
}

/// `GET /health`
///
/// Returns `503` when the counter store does not answer a ping.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let metrics = state.engine.metrics().snapshot();
    match state.engine.ping_store().await {
        Ok(()) => (
            StatusCode::OK,
            Json(HealthResponse {
                status: "ok",
                store: "ok",
                metrics,
            }),
        ),
        Err(e) => {
            warn!(error = %e, "health check: counter store unreachable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse {
                    status: "degraded",
                    store: "unreachable",
                    metrics,
                }),
            )
        }
    }
}

/// `GET /metrics`
pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    (StatusCode::OK, Json(state.engine.metrics().snapshot()))
}
