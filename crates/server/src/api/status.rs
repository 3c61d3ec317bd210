use axum::Json;
use axum::extract::{Path, Query, State};
use chrono::{DateTime, Utc};
use serde::Deserialize;

use turnstile_core::{Plan, StatusReport, Subject, Tier};

use super::AppState;
use crate::error::ServerError;

/// Plan facts for a status read.
#[derive(Debug, Deserialize)]
pub struct StatusQuery {
    pub tier: Tier,
    pub cycle_anchor: DateTime<Utc>,
}

/// `GET /v1/status/{subject}`
pub async fn status(
    State(state): State<AppState>,
    Path(subject): Path<Subject>,
    Query(query): Query<StatusQuery>,
) -> Result<Json<StatusReport>, ServerError> {
    let plan = Plan::new(query.tier, query.cycle_anchor);
    let report = state.engine.status_for(&subject, &plan).await?;
    Ok(Json(report))
}
