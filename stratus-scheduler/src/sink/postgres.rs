//! Postgres sink

use async_trait::async_trait;
use sqlx::PgPool;
use stratus_core::domain::observation::WeatherObservation;

use super::{Sink, SinkError};
use crate::repository::measurement_repository;

/// Sink writing observations into a Postgres table
///
/// Each upsert is a single `INSERT .. ON CONFLICT` statement, so a row is
/// either fully written or not at all.
#[derive(Debug, Clone)]
pub struct PostgresSink {
    pool: PgPool,
    table: String,
}

impl PostgresSink {
    /// `table` must already be a validated SQL identifier
    pub fn new(pool: PgPool, table: impl Into<String>) -> Self {
        Self {
            pool,
            table: table.into(),
        }
    }
}

#[async_trait]
impl Sink for PostgresSink {
    async fn ensure_schema(&self) -> Result<(), SinkError> {
        measurement_repository::create_table(&self.pool, &self.table).await?;
        Ok(())
    }

    async fn upsert_observation(&self, observation: &WeatherObservation) -> Result<(), SinkError> {
        measurement_repository::upsert(&self.pool, &self.table, observation).await?;
        Ok(())
    }
}
