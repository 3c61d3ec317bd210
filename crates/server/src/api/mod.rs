pub mod admin;
pub mod admissions;
pub mod health;
pub mod refunds;
pub mod status;

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::routing::{delete, get, post};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use turnstile_engine::AdmissionEngine;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<AdmissionEngine>,
    /// How long ended windows are kept; the default cutoff for manual cleanup.
    pub retention: Duration,
}

/// Build the HTTP router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route("/metrics", get(health::metrics))
        .route("/v1/admissions", post(admissions::decide))
        .route("/v1/refunds", post(refunds::refund))
        .route("/v1/status/{subject}", get(status::status))
        .route("/v1/admin/counters/{subject}", delete(admin::reset))
        .route("/v1/admin/cleanup", post(admin::cleanup))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
