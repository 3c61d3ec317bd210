use axum::Json;
use axum::extract::{Path, Query, State};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use turnstile_core::{Operation, Platform, Subject};

use super::AppState;
use crate::error::ServerError;

/// Optional narrowing for a counter reset.
#[derive(Debug, Default, Deserialize)]
pub struct ResetQuery {
    pub platform: Option<Platform>,
    pub operation: Option<Operation>,
}

/// Optional cutoff for a manual cleanup.
#[derive(Debug, Default, Deserialize)]
pub struct CleanupQuery {
    pub older_than: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct DeletedResponse {
    pub deleted: u64,
}

/// `DELETE /v1/admin/counters/{subject}`
pub async fn reset(
    State(state): State<AppState>,
    Path(subject): Path<Subject>,
    Query(query): Query<ResetQuery>,
) -> Result<Json<DeletedResponse>, ServerError> {
    let deleted = state
        .engine
        .reset(&subject, query.platform.as_ref(), query.operation.as_ref())
        .await?;
    Ok(Json(DeletedResponse { deleted }))
}

/// `POST /v1/admin/cleanup`
///
/// Without `older_than`, removes windows that ended before the configured
/// retention period.
pub async fn cleanup(
    State(state): State<AppState>,
    Query(query): Query<CleanupQuery>,
) -> Result<Json<DeletedResponse>, ServerError> {
    let older_than = match query.older_than {
        Some(cutoff) => cutoff,
        None => {
            let retention = chrono::Duration::from_std(state.retention)
                .map_err(|e| ServerError::Config(format!("retention out of range: {e}")))?;
            Utc::now() - retention
        }
    };
    let deleted = state.engine.cleanup_expired_windows(older_than).await?;
    Ok(Json(DeletedResponse { deleted }))
}
