//! Health Check API Handler

use axum::{Json, extract::State};
use stratus_core::dto::run::HealthStatus;

use crate::coordinator::CoordinatorHandle;

/// GET /health
/// Liveness plus the pipeline's watermark and number of active runs
pub async fn health_check(State(handle): State<CoordinatorHandle>) -> Json<HealthStatus> {
    Json(handle.board().health())
}
