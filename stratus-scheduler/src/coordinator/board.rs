//! Run board
//!
//! Read-only view of the coordinator's runs for the status API, plus the
//! command channel the API uses to reach back into the coordinator.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};
use stratus_core::domain::run::RunInstance;
use stratus_core::dto::run::HealthStatus;
use tokio::sync::{mpsc, oneshot};

use crate::error::{EngineError, Result};
use crate::ledger::HISTORY_LIMIT;

#[derive(Debug, Default)]
struct BoardState {
    watermark: Option<DateTime<Utc>>,
    active_runs: usize,
    runs: BTreeMap<DateTime<Utc>, RunInstance>,
}

/// Latest report of every known run, refreshed after each tick
#[derive(Debug, Clone)]
pub struct RunBoard {
    pipeline: Arc<str>,
    state: Arc<RwLock<BoardState>>,
}

impl RunBoard {
    pub fn new(pipeline: &str) -> Self {
        Self {
            pipeline: Arc::from(pipeline),
            state: Arc::new(RwLock::new(BoardState::default())),
        }
    }

    /// Replaces the reports of the given runs and the summary counters
    pub fn publish(
        &self,
        watermark: Option<DateTime<Utc>>,
        active_runs: usize,
        reports: impl IntoIterator<Item = RunInstance>,
    ) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.watermark = watermark;
        state.active_runs = active_runs;

        for report in reports {
            state.runs.insert(report.logical_timestamp, report);
        }

        let excess = state.runs.len().saturating_sub(HISTORY_LIMIT);
        if excess > 0 {
            let oldest: Vec<DateTime<Utc>> = state
                .runs
                .iter()
                .filter(|(_, run)| run.status.is_terminal())
                .take(excess)
                .map(|(at, _)| *at)
                .collect();
            for at in oldest {
                state.runs.remove(&at);
            }
        }
    }

    /// Known runs, newest first
    pub fn runs(&self) -> Vec<RunInstance> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.runs.values().rev().cloned().collect()
    }

    pub fn get(&self, logical_timestamp: DateTime<Utc>) -> Option<RunInstance> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.runs.get(&logical_timestamp).cloned()
    }

    pub fn health(&self) -> HealthStatus {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        HealthStatus {
            status: "ok".to_string(),
            pipeline: self.pipeline.to_string(),
            active_runs: state.active_runs,
            watermark: state.watermark,
        }
    }
}

/// Request sent to the coordinator from outside its task
#[derive(Debug)]
pub enum Command {
    Cancel {
        logical_timestamp: DateTime<Utc>,
        reply: oneshot::Sender<bool>,
    },
}

/// Cloneable access to a running coordinator
#[derive(Debug, Clone)]
pub struct CoordinatorHandle {
    board: RunBoard,
    commands: mpsc::UnboundedSender<Command>,
}

impl CoordinatorHandle {
    pub fn new(board: RunBoard, commands: mpsc::UnboundedSender<Command>) -> Self {
        Self { board, commands }
    }

    pub fn board(&self) -> &RunBoard {
        &self.board
    }

    /// Asks the coordinator to cancel a run
    ///
    /// Resolves to `false` when no queued or active run has that timestamp.
    pub async fn cancel(&self, logical_timestamp: DateTime<Utc>) -> Result<bool> {
        let (reply, accepted) = oneshot::channel();
        self.commands
            .send(Command::Cancel {
                logical_timestamp,
                reply,
            })
            .map_err(|_| EngineError::Stopped)?;

        accepted.await.map_err(|_| EngineError::Stopped)
    }
}
