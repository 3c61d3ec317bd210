use axum::Json;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use serde::Deserialize;

use turnstile_core::{AdmissionResult, Operation, Plan, Platform, Subject, Tier};

use super::AppState;
use crate::error::ServerError;

/// Request body for an admission decision.
#[derive(Debug, Deserialize)]
pub struct AdmissionRequest {
    pub subject: Subject,
    pub tier: Tier,
    pub cycle_anchor: DateTime<Utc>,
    pub platform: Platform,
    pub operation: Operation,
}

/// `POST /v1/admissions`
///
/// `200` with the decision when admitted, `429` with `Retry-After` when a
/// window ceiling denies.
pub async fn decide(
    State(state): State<AppState>,
    Json(req): Json<AdmissionRequest>,
) -> Result<Response, ServerError> {
    let plan = Plan::new(req.tier, req.cycle_anchor);
    let result = state
        .engine
        .decide(&req.subject, &plan, &req.platform, &req.operation)
        .await?;

    if result.allowed {
        return Ok((StatusCode::OK, Json(result)).into_response());
    }

    let retry_after = seconds_until(&result);
    let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(result)).into_response();
    response
        .headers_mut()
        .insert(header::RETRY_AFTER, retry_after.into());
    Ok(response)
}

/// Whole seconds until the denying window resets, at least 1.
fn seconds_until(result: &AdmissionResult) -> u64 {
    let secs = (result.reset_at - Utc::now()).num_seconds();
    u64::try_from(secs).unwrap_or(0).max(1)
}
