use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::{error, warn};

use turnstile_engine::EngineError;

/// Errors that can occur when running the turnstile server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// A configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// An I/O error (e.g. binding the listener).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The request was malformed or referenced something unknown.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// The counter store is unreachable; the caller should retry later.
    #[error("counter store unavailable")]
    Unavailable {
        /// Seconds until the caller can retry.
        retry_after: u64,
    },

    /// Anything else that went wrong while serving a request.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<EngineError> for ServerError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::InvalidSubject(_)
            | EngineError::UnknownPlatform(_)
            | EngineError::InvalidRefund(_) => Self::BadRequest(err.to_string()),
            EngineError::StoreUnavailable {
                retry_after,
                source,
            } => {
                // Store details stay in the logs, never in the response.
                warn!(error = %source, "request failed: counter store unavailable");
                // Whole seconds, rounded up so clients never retry early.
                let secs = retry_after.as_millis().div_ceil(1_000);
                Self::Unavailable {
                    retry_after: u64::try_from(secs).unwrap_or(u64::MAX).max(1),
                }
            }
            EngineError::Configuration(msg) => Self::Internal(msg),
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, message, retry_after) = match &self {
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone(), None),
            Self::Unavailable { retry_after } => (
                StatusCode::SERVICE_UNAVAILABLE,
                "counter store unavailable".to_owned(),
                Some(*retry_after),
            ),
            Self::Config(_) | Self::Io(_) | Self::Internal(_) => {
                error!(error = %self, "request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal error".to_owned(),
                    None,
                )
            }
        };

        let body = if let Some(retry) = retry_after {
            serde_json::json!({ "error": message, "retry_after": retry })
        } else {
            serde_json::json!({ "error": message })
        };

        let mut response = (status, axum::Json(body)).into_response();

        if let Some(retry) = retry_after {
            response
                .headers_mut()
                .insert(axum::http::header::RETRY_AFTER, retry.into());
        }

        response
    }
}
