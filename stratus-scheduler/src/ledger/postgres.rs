//! Postgres run ledger

use async_trait::async_trait;
use sqlx::PgPool;
use stratus_core::domain::run::RunInstance;

use super::{HISTORY_LIMIT, Resume, RunLedger};
use crate::error::Result;
use crate::repository::run_repository;

#[derive(Debug, Clone)]
pub struct PostgresLedger {
    pool: PgPool,
    pipeline: String,
}

impl PostgresLedger {
    pub fn new(pool: PgPool, pipeline: impl Into<String>) -> Self {
        Self {
            pool,
            pipeline: pipeline.into(),
        }
    }
}

#[async_trait]
impl RunLedger for PostgresLedger {
    async fn resume(&self) -> Result<Resume> {
        let watermark =
            run_repository::latest_logical_timestamp(&self.pool, &self.pipeline).await?;
        let unfinished = run_repository::find_unfinished(&self.pool, &self.pipeline).await?;
        let history = run_repository::find_recent_finished(
            &self.pool,
            &self.pipeline,
            HISTORY_LIMIT as i64,
        )
        .await?;

        Ok(Resume {
            watermark,
            unfinished,
            history,
        })
    }

    async fn record(&self, run: &RunInstance) -> Result<()> {
        run_repository::upsert(&self.pool, &self.pipeline, run).await?;
        Ok(())
    }
}
