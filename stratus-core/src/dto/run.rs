//! Run DTOs for the status API

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::run::{RunInstance, RunStatus};
use crate::domain::step::StepState;

/// Condensed view of a run for listings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub id: Uuid,
    pub logical_timestamp: DateTime<Utc>,
    pub status: RunStatus,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub total_steps: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub upstream_failed: usize,
    pub affected_locations: Vec<String>,
}

impl From<&RunInstance> for RunSummary {
    fn from(run: &RunInstance) -> Self {
        Self {
            id: run.id,
            logical_timestamp: run.logical_timestamp,
            status: run.status,
            created_at: run.created_at,
            finished_at: run.finished_at,
            total_steps: run.steps.len(),
            succeeded: run.count_in(StepState::Success),
            failed: run.count_in(StepState::Failed),
            upstream_failed: run.count_in(StepState::UpstreamFailed),
            affected_locations: run
                .affected_locations()
                .into_iter()
                .map(str::to_string)
                .collect(),
        }
    }
}

/// Scheduler health report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub pipeline: String,
    pub active_runs: usize,
    /// Latest logical timestamp already admitted for execution
    pub watermark: Option<DateTime<Utc>>,
}

/// Response to a cancellation request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CancelRunResponse {
    pub logical_timestamp: DateTime<Utc>,
    pub accepted: bool,
}
