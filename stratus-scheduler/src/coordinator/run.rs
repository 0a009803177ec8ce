//! Per-run state machine
//!
//! Owns the [`StepExecution`] records of one run and enforces the
//! transitions between their states. The coordinator feeds it worker
//! events; it never performs I/O itself.

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;
use stratus_core::domain::run::{RunInstance, RunStatus};
use stratus_core::domain::step::{StepExecution, StepId, StepState};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::graph::TaskGraph;

/// Why a run is being stopped before it finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// An operator asked for it
    Requested,
    /// The run outlived its timeout
    Timeout(Duration),
    /// The process is shutting down
    Shutdown,
}

impl CancelReason {
    fn describe(&self) -> String {
        match self {
            CancelReason::Requested => "cancelled on request".to_string(),
            CancelReason::Timeout(limit) => format!("run exceeded timeout of {:?}", limit),
            CancelReason::Shutdown => "cancelled by scheduler shutdown".to_string(),
        }
    }

    fn status(&self) -> RunStatus {
        match self {
            CancelReason::Timeout(_) => RunStatus::Failed,
            CancelReason::Requested | CancelReason::Shutdown => RunStatus::Cancelled,
        }
    }
}

#[derive(Debug)]
pub struct RunState {
    id: Uuid,
    logical_timestamp: DateTime<Utc>,
    created_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
    steps: BTreeMap<StepId, StepExecution>,
    /// Ready steps already handed to a worker
    dispatched: BTreeSet<StepId>,
    /// Workers that have not reported their final outcome yet
    in_flight: usize,
    activated: bool,
    deadline: Option<Instant>,
    cancelled: Option<CancelReason>,
    cancel: CancellationToken,
}

impl RunState {
    /// A fresh run with every step Pending
    pub fn new(logical_timestamp: DateTime<Utc>, graph: &TaskGraph) -> Self {
        Self::with_identity(Uuid::new_v4(), logical_timestamp, Utc::now(), graph)
    }

    /// Restarts an interrupted run from scratch, keeping its identity
    ///
    /// Outputs of an interrupted run are gone, so every step runs again.
    pub fn resumed(report: &RunInstance, graph: &TaskGraph) -> Self {
        Self::with_identity(report.id, report.logical_timestamp, report.created_at, graph)
    }

    fn with_identity(
        id: Uuid,
        logical_timestamp: DateTime<Utc>,
        created_at: DateTime<Utc>,
        graph: &TaskGraph,
    ) -> Self {
        let steps = graph
            .topological_order()
            .iter()
            .map(|step| (step.clone(), StepExecution::pending(step.clone())))
            .collect();

        Self {
            id,
            logical_timestamp,
            created_at,
            finished_at: None,
            steps,
            dispatched: BTreeSet::new(),
            in_flight: 0,
            activated: false,
            deadline: None,
            cancelled: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn logical_timestamp(&self) -> DateTime<Utc> {
        self.logical_timestamp
    }

    /// Token observed by every step of this run
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    pub fn state_of(&self, step: &StepId) -> Option<StepState> {
        self.steps.get(step).map(|execution| execution.state)
    }

    /// Whether the step exists and has not reached a terminal state
    pub fn is_live(&self, step: &StepId) -> bool {
        self.state_of(step).is_some_and(|state| !state.is_terminal())
    }

    /// Moves the run from Pending to Running
    ///
    /// A timeout too large to represent leaves the run without a deadline.
    pub fn activate(&mut self, timeout: Duration) {
        self.activated = true;
        self.deadline = Instant::now().checked_add(timeout);
    }

    /// Back to Pending, as if never activated
    pub fn deactivate(&mut self) {
        self.activated = false;
        self.deadline = None;
    }

    pub fn deadline(&self) -> Option<Instant> {
        if self.status().is_terminal() {
            return None;
        }
        self.deadline
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        self.deadline().is_some_and(|deadline| deadline <= now)
    }

    /// Promotes Pending steps whose dependencies all succeeded and returns
    /// every Ready step not yet handed to a worker
    pub fn take_ready(&mut self, graph: &TaskGraph) -> Vec<StepId> {
        if !self.activated || self.cancelled.is_some() {
            return Vec::new();
        }

        for step in graph.topological_order() {
            if self.state_of(step) != Some(StepState::Pending) {
                continue;
            }
            let unblocked = graph
                .dependencies_of(step)
                .iter()
                .all(|dep| self.state_of(dep) == Some(StepState::Success));
            if unblocked {
                if let Some(execution) = self.steps.get_mut(step) {
                    execution.state = StepState::Ready;
                }
            }
        }

        let ready: Vec<StepId> = self
            .steps
            .values()
            .filter(|execution| execution.state == StepState::Ready)
            .map(|execution| execution.step.clone())
            .filter(|step| !self.dispatched.contains(step))
            .collect();

        for step in &ready {
            self.dispatched.insert(step.clone());
            self.in_flight += 1;
        }

        ready
    }

    pub fn attempt_started(&mut self, step: &StepId, attempt: u32, at: DateTime<Utc>) {
        if let Some(execution) = self.live_step(step) {
            execution.state = StepState::Running;
            execution.attempts = attempt;
            execution.started_at.get_or_insert(at);
        }
    }

    /// Records the error of an attempt that will be retried
    pub fn attempt_failed(&mut self, step: &StepId, error: String) {
        if let Some(execution) = self.live_step(step) {
            execution.last_error = Some(error);
        }
    }

    /// Records the final outcome of a worker
    ///
    /// Returns `false` when the outcome arrived for a step that is already
    /// terminal (e.g. the run was cancelled meanwhile) and was ignored.
    pub fn finish(
        &mut self,
        step: &StepId,
        outcome: Result<(), String>,
        graph: &TaskGraph,
        at: DateTime<Utc>,
    ) -> bool {
        self.in_flight = self.in_flight.saturating_sub(1);

        let Some(execution) = self.live_step(step) else {
            return false;
        };
        execution.finished_at = Some(at);

        match outcome {
            Ok(()) => {
                execution.state = StepState::Success;
                execution.last_error = None;
            }
            Err(error) => {
                execution.state = StepState::Failed;
                execution.last_error = Some(error);
                self.mark_upstream_failed(step, graph, at);
            }
        }

        true
    }

    fn mark_upstream_failed(&mut self, failed: &StepId, graph: &TaskGraph, at: DateTime<Utc>) {
        for dependent in graph.transitive_dependents(failed) {
            if let Some(execution) = self.live_step(&dependent) {
                execution.state = StepState::UpstreamFailed;
                execution.last_error = Some(format!("upstream step {} failed", failed));
                execution.finished_at = Some(at);
            }
        }
    }

    /// Stops the run: in-flight steps are signalled, every non-terminal step
    /// becomes Cancelled
    pub fn cancel(&mut self, reason: CancelReason, at: DateTime<Utc>) -> bool {
        if self.status().is_terminal() {
            return false;
        }

        self.cancelled = Some(reason);
        self.cancel.cancel();

        for execution in self.steps.values_mut() {
            if !execution.state.is_terminal() {
                execution.state = StepState::Cancelled;
                execution.finished_at = Some(at);
            }
        }

        true
    }

    pub fn status(&self) -> RunStatus {
        if let Some(reason) = self.cancelled {
            return reason.status();
        }
        if !self.activated {
            return RunStatus::Pending;
        }

        let mut failed = false;
        for execution in self.steps.values() {
            match execution.state {
                StepState::Success => {}
                StepState::Failed | StepState::UpstreamFailed => failed = true,
                _ => return RunStatus::Running,
            }
        }

        if failed {
            RunStatus::Failed
        } else {
            RunStatus::Success
        }
    }

    /// Terminal and no worker will report back anymore
    pub fn is_settled(&self) -> bool {
        self.status().is_terminal() && self.in_flight == 0
    }

    /// Stamps the finish time once the run is terminal
    pub fn close(&mut self, at: DateTime<Utc>) {
        if self.status().is_terminal() {
            self.finished_at.get_or_insert(at);
        }
    }

    pub fn cancel_reason(&self) -> Option<CancelReason> {
        self.cancelled
    }

    pub fn snapshot(&self) -> RunInstance {
        RunInstance {
            id: self.id,
            logical_timestamp: self.logical_timestamp,
            status: self.status(),
            created_at: self.created_at,
            finished_at: self.finished_at,
            reason: self.cancelled.map(|reason| reason.describe()),
            steps: self.steps.values().cloned().collect(),
        }
    }

    fn live_step(&mut self, step: &StepId) -> Option<&mut StepExecution> {
        self.steps
            .get_mut(step)
            .filter(|execution| !execution.state.is_terminal())
    }
}
