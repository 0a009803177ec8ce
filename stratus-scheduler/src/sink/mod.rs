//! Sink Module
//!
//! The durable store receiving finalized observations. Both operations are
//! idempotent: the schema is created if missing and rows are upserted on
//! their natural key `(timestamp, location)`.

pub mod memory;
pub mod postgres;

pub use memory::MemorySink;
pub use postgres::PostgresSink;

use async_trait::async_trait;
use stratus_core::domain::observation::WeatherObservation;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Sink unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait Sink: Send + Sync {
    /// Creates the observation table if it does not exist
    async fn ensure_schema(&self) -> Result<(), SinkError>;

    /// Inserts or replaces one observation atomically
    async fn upsert_observation(&self, observation: &WeatherObservation) -> Result<(), SinkError>;
}
