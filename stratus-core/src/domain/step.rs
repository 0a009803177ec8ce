//! Step domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of work a step performs
///
/// Declaration order is also the pipeline order, so sorting step
/// identities groups them stage by stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    CreateTable,
    AvailabilityCheck,
    Extract,
    Transform,
    Load,
}

impl StepKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepKind::CreateTable => "create_table",
            StepKind::AvailabilityCheck => "availability_check",
            StepKind::Extract => "extract",
            StepKind::Transform => "transform",
            StepKind::Load => "load",
        }
    }

    /// Whether instances of this kind exist once per location
    pub fn is_location_scoped(&self) -> bool {
        matches!(self, StepKind::Extract | StepKind::Transform | StepKind::Load)
    }
}

impl std::fmt::Display for StepKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of a step within the task graph
///
/// Location-scoped steps carry the location name; shared gating steps do not.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StepId {
    pub kind: StepKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

impl StepId {
    /// A step shared by every branch (e.g. `create_table`)
    pub fn shared(kind: StepKind) -> Self {
        Self {
            kind,
            location: None,
        }
    }

    /// A step belonging to one location's branch (e.g. `extract[Lviv]`)
    pub fn scoped(kind: StepKind, location: impl Into<String>) -> Self {
        Self {
            kind,
            location: Some(location.into()),
        }
    }
}

impl std::fmt::Display for StepId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.location {
            Some(location) => write!(f, "{}[{}]", self.kind, location),
            None => write!(f, "{}", self.kind),
        }
    }
}

/// Execution state of one step within one run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepState {
    Pending,
    Ready,
    Running,
    Success,
    Failed,
    UpstreamFailed,
    Cancelled,
}

impl StepState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StepState::Success
                | StepState::Failed
                | StepState::UpstreamFailed
                | StepState::Cancelled
        )
    }

    /// Failed directly or skipped because an upstream step failed
    pub fn is_failure(&self) -> bool {
        matches!(self, StepState::Failed | StepState::UpstreamFailed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StepState::Pending => "pending",
            StepState::Ready => "ready",
            StepState::Running => "running",
            StepState::Success => "success",
            StepState::Failed => "failed",
            StepState::UpstreamFailed => "upstream_failed",
            StepState::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for StepState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Execution record of one step within one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepExecution {
    pub step: StepId,
    pub state: StepState,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl StepExecution {
    pub fn pending(step: StepId) -> Self {
        Self {
            step,
            state: StepState::Pending,
            attempts: 0,
            last_error: None,
            started_at: None,
            finished_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_id_display() {
        assert_eq!(StepId::shared(StepKind::CreateTable).to_string(), "create_table");
        assert_eq!(
            StepId::scoped(StepKind::Extract, "Lviv").to_string(),
            "extract[Lviv]"
        );
    }

    #[test]
    fn test_step_ids_sort_by_stage() {
        let mut ids = vec![
            StepId::scoped(StepKind::Load, "Kyiv"),
            StepId::shared(StepKind::AvailabilityCheck),
            StepId::scoped(StepKind::Extract, "Lviv"),
            StepId::shared(StepKind::CreateTable),
        ];
        ids.sort();

        assert_eq!(ids[0].kind, StepKind::CreateTable);
        assert_eq!(ids[1].kind, StepKind::AvailabilityCheck);
        assert_eq!(ids[2].kind, StepKind::Extract);
        assert_eq!(ids[3].kind, StepKind::Load);
    }

    #[test]
    fn test_step_state_classification() {
        assert!(StepState::Success.is_terminal());
        assert!(StepState::UpstreamFailed.is_terminal());
        assert!(!StepState::Ready.is_terminal());
        assert!(StepState::UpstreamFailed.is_failure());
        assert!(!StepState::Cancelled.is_failure());
    }

    #[test]
    fn test_step_id_serialization_omits_missing_location() {
        let json = serde_json::to_value(StepId::shared(StepKind::CreateTable)).unwrap();
        assert_eq!(json, serde_json::json!({ "kind": "create_table" }));
    }
}
