//! Run domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

use super::step::{StepExecution, StepId, StepState};

/// Lifecycle status of a pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Success,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Success | RunStatus::Failed | RunStatus::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Success => "success",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Report of one pipeline run for one logical timestamp
///
/// Produced by the scheduler's coordinator, persisted in the run ledger and
/// served by the status API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunInstance {
    pub id: Uuid,
    pub logical_timestamp: DateTime<Utc>,
    pub status: RunStatus,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Why the run ended early (cancellation or timeout), if it did
    pub reason: Option<String>,
    pub steps: Vec<StepExecution>,
}

impl RunInstance {
    pub fn step(&self, id: &StepId) -> Option<&StepExecution> {
        self.steps.iter().find(|execution| &execution.step == id)
    }

    /// Steps that failed or were skipped because of an upstream failure
    pub fn failures(&self) -> Vec<&StepExecution> {
        self.steps
            .iter()
            .filter(|execution| execution.state.is_failure())
            .collect()
    }

    /// Locations whose branch did not complete successfully
    pub fn affected_locations(&self) -> BTreeSet<&str> {
        self.steps
            .iter()
            .filter(|execution| execution.state.is_failure())
            .filter_map(|execution| execution.step.location.as_deref())
            .collect()
    }

    pub fn count_in(&self, state: StepState) -> usize {
        self.steps
            .iter()
            .filter(|execution| execution.state == state)
            .count()
    }
}
