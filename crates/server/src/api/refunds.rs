use axum::Json;
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use serde::Deserialize;

use turnstile_core::{AdmissionTicket, Operation, Platform, Subject, WindowKind};

use super::AppState;
use crate::error::ServerError;

/// Request body for a refund.
///
/// Either the ticket returned by an admission, which refunds both windows,
/// or an explicit single-window refund.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum RefundRequest {
    Ticket {
        ticket: AdmissionTicket,
    },
    Window {
        subject: Subject,
        platform: Platform,
        operation: Operation,
        window: WindowKind,
        window_start: DateTime<Utc>,
        idempotency_key: String,
    },
}

/// `POST /v1/refunds`
pub async fn refund(
    State(state): State<AppState>,
    Json(req): Json<RefundRequest>,
) -> Result<Response, ServerError> {
    match req {
        RefundRequest::Ticket { ticket } => {
            let outcome = state.engine.refund_ticket(&ticket).await?;
            Ok(Json(outcome).into_response())
        }
        RefundRequest::Window {
            subject,
            platform,
            operation,
            window,
            window_start,
            idempotency_key,
        } => {
            let outcome = state
                .engine
                .refund(
                    &subject,
                    &platform,
                    &operation,
                    window,
                    window_start,
                    &idempotency_key,
                )
                .await?;
            Ok(Json(outcome).into_response())
        }
    }
}
