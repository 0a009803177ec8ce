//! In-memory run ledger
//!
//! Used with the `memory://` backend; nothing survives a restart.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};
use stratus_core::domain::run::RunInstance;

use super::{HISTORY_LIMIT, Resume, RunLedger};
use crate::error::Result;

#[derive(Debug, Default)]
pub struct MemoryLedger {
    runs: Mutex<BTreeMap<DateTime<Utc>, RunInstance>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts from previously recorded runs
    pub fn with_runs(runs: impl IntoIterator<Item = RunInstance>) -> Self {
        let runs = runs
            .into_iter()
            .map(|run| (run.logical_timestamp, run))
            .collect();
        Self {
            runs: Mutex::new(runs),
        }
    }

    pub fn get(&self, logical_timestamp: DateTime<Utc>) -> Option<RunInstance> {
        self.runs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&logical_timestamp)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.runs.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl RunLedger for MemoryLedger {
    async fn resume(&self) -> Result<Resume> {
        let runs = self.runs.lock().unwrap_or_else(PoisonError::into_inner);

        let watermark = runs.keys().next_back().copied();
        let (finished, unfinished): (Vec<&RunInstance>, Vec<&RunInstance>) =
            runs.values().partition(|run| run.status.is_terminal());

        Ok(Resume {
            watermark,
            unfinished: unfinished.into_iter().cloned().collect(),
            history: finished
                .into_iter()
                .rev()
                .take(HISTORY_LIMIT)
                .cloned()
                .collect(),
        })
    }

    async fn record(&self, run: &RunInstance) -> Result<()> {
        self.runs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(run.logical_timestamp, run.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use stratus_core::domain::run::RunStatus;
    use uuid::Uuid;

    fn run(day: u32, status: RunStatus) -> RunInstance {
        let at = Utc.with_ymd_and_hms(2023, 11, day, 0, 0, 0).unwrap();
        RunInstance {
            id: Uuid::new_v4(),
            logical_timestamp: at,
            status,
            created_at: at,
            finished_at: None,
            reason: None,
            steps: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_empty_ledger_has_no_watermark() {
        let resume = MemoryLedger::new().resume().await.unwrap();
        assert!(resume.watermark.is_none());
        assert!(resume.unfinished.is_empty());
        assert!(resume.history.is_empty());
    }

    #[tokio::test]
    async fn test_resume_splits_finished_and_unfinished() {
        let ledger = MemoryLedger::with_runs([
            run(28, RunStatus::Success),
            run(29, RunStatus::Failed),
            run(30, RunStatus::Running),
        ]);

        let resume = ledger.resume().await.unwrap();
        assert_eq!(resume.watermark, Some(run(30, RunStatus::Running).logical_timestamp));
        assert_eq!(resume.unfinished.len(), 1);
        assert_eq!(resume.unfinished[0].status, RunStatus::Running);
        // Newest first
        assert_eq!(resume.history[0].status, RunStatus::Failed);
        assert_eq!(resume.history[1].status, RunStatus::Success);
    }

    #[tokio::test]
    async fn test_record_replaces_same_timestamp() {
        let ledger = MemoryLedger::new();
        let mut report = run(28, RunStatus::Running);
        ledger.record(&report).await.unwrap();

        report.status = RunStatus::Success;
        ledger.record(&report).await.unwrap();

        assert_eq!(ledger.len(), 1);
        assert_eq!(
            ledger.get(report.logical_timestamp).unwrap().status,
            RunStatus::Success
        );
    }
}
