//! Run API Handlers
//!
//! Runs are addressed by their logical timestamp in epoch seconds.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use chrono::{DateTime, Utc};
use stratus_core::domain::run::RunInstance;
use stratus_core::dto::run::{CancelRunResponse, RunSummary};

use crate::api::error::{ApiError, ApiResult};
use crate::coordinator::CoordinatorHandle;

fn parse_timestamp(raw: &str) -> ApiResult<DateTime<Utc>> {
    raw.parse::<i64>()
        .ok()
        .and_then(|seconds| DateTime::from_timestamp(seconds, 0))
        .ok_or_else(|| {
            ApiError::BadRequest(format!(
                "'{}' is not a logical timestamp in epoch seconds",
                raw
            ))
        })
}

/// GET /runs
/// Known runs, newest first
pub async fn list_runs(State(handle): State<CoordinatorHandle>) -> Json<Vec<RunSummary>> {
    tracing::debug!("Listing runs");

    let runs = handle.board().runs();
    Json(runs.iter().map(RunSummary::from).collect())
}

/// GET /runs/{logical_timestamp}
/// Full report of one run, including every step execution
pub async fn get_run(
    State(handle): State<CoordinatorHandle>,
    Path(raw): Path<String>,
) -> ApiResult<Json<RunInstance>> {
    let logical_timestamp = parse_timestamp(&raw)?;
    tracing::debug!("Getting run: {}", logical_timestamp);

    handle
        .board()
        .get(logical_timestamp)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Run {} not found", raw)))
}

/// POST /runs/{logical_timestamp}/cancel
/// Cancel a queued or running run
pub async fn cancel_run(
    State(handle): State<CoordinatorHandle>,
    Path(raw): Path<String>,
) -> ApiResult<(StatusCode, Json<CancelRunResponse>)> {
    let logical_timestamp = parse_timestamp(&raw)?;
    tracing::info!("Cancellation requested for run {}", logical_timestamp);

    if !handle.cancel(logical_timestamp).await? {
        return Err(ApiError::NotFound(format!(
            "Run {} is not queued or running",
            raw
        )));
    }

    Ok((
        StatusCode::ACCEPTED,
        Json(CancelRunResponse {
            logical_timestamp,
            accepted: true,
        }),
    ))
}
