//! Run ledger
//!
//! Durable record of every admitted run. On startup the coordinator reads
//! it back to restore the attempted watermark, so catchup never repeats a
//! logical timestamp that was already admitted, and to re-queue runs that
//! were interrupted before they finished.

pub mod memory;
pub mod postgres;

pub use memory::MemoryLedger;
pub use postgres::PostgresLedger;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use stratus_core::domain::run::RunInstance;

use crate::error::Result;

/// How many finished runs are loaded back for inspection
pub const HISTORY_LIMIT: usize = 100;

/// State recovered from the ledger at startup
#[derive(Debug, Clone, Default)]
pub struct Resume {
    /// Latest logical timestamp ever admitted
    pub watermark: Option<DateTime<Utc>>,
    /// Admitted runs that never reached a terminal status, oldest first
    pub unfinished: Vec<RunInstance>,
    /// Recent terminal runs, newest first
    pub history: Vec<RunInstance>,
}

#[async_trait]
pub trait RunLedger: Send + Sync {
    async fn resume(&self) -> Result<Resume>;

    /// Stores the current report of a run, replacing any earlier one
    async fn record(&self, run: &RunInstance) -> Result<()>;
}
