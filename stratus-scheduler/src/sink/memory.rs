//! In-memory sink
//!
//! Backs `DATABASE_URL=memory://` for local dry runs and the engine tests.
//! It behaves like the table: writes before `ensure_schema` fail.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use stratus_core::domain::observation::WeatherObservation;

use super::{Sink, SinkError};

#[derive(Debug, Default)]
pub struct MemorySink {
    rows: Mutex<BTreeMap<(i64, String), WeatherObservation>>,
    schema_ready: AtomicBool,
    writes: AtomicUsize,
    failures_left: AtomicU32,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `count` upserts fail with [`SinkError::Unavailable`]
    pub fn fail_next(&self, count: u32) {
        self.failures_left.store(count, Ordering::SeqCst);
    }

    /// Current rows, ordered by natural key
    pub fn rows(&self) -> Vec<WeatherObservation> {
        self.rows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    /// Successful upserts, including ones that replaced an existing row
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn schema_ready(&self) -> bool {
        self.schema_ready.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Sink for MemorySink {
    async fn ensure_schema(&self) -> Result<(), SinkError> {
        self.schema_ready.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn upsert_observation(&self, observation: &WeatherObservation) -> Result<(), SinkError> {
        if !self.schema_ready() {
            return Err(SinkError::Unavailable("observation table does not exist".into()));
        }

        let injected = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if injected {
            return Err(SinkError::Unavailable("injected write failure".into()));
        }

        let key = (observation.timestamp, observation.location.clone());
        self.rows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, observation.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn observation(location: &str, temperature: f64) -> WeatherObservation {
        WeatherObservation {
            timestamp: 1_700_000_000,
            location: location.to_string(),
            temperature,
            humidity: 80.0,
            cloudiness: 40.0,
            wind_speed: 3.1,
        }
    }

    #[tokio::test]
    async fn test_upsert_twice_keeps_one_row() {
        let sink = MemorySink::new();
        sink.ensure_schema().await.unwrap();

        sink.upsert_observation(&observation("Lviv", 5.2)).await.unwrap();
        sink.upsert_observation(&observation("Lviv", 5.2)).await.unwrap();

        assert_eq!(sink.rows().len(), 1);
        assert_eq!(sink.writes(), 2);
    }

    #[tokio::test]
    async fn test_upsert_replaces_values_on_same_key() {
        let sink = MemorySink::new();
        sink.ensure_schema().await.unwrap();

        sink.upsert_observation(&observation("Lviv", 5.2)).await.unwrap();
        sink.upsert_observation(&observation("Lviv", 6.0)).await.unwrap();

        assert_eq!(sink.rows(), vec![observation("Lviv", 6.0)]);
    }

    #[tokio::test]
    async fn test_write_before_schema_fails() {
        let sink = MemorySink::new();
        let err = sink
            .upsert_observation(&observation("Lviv", 5.2))
            .await
            .unwrap_err();

        assert!(matches!(err, SinkError::Unavailable(_)));
        assert!(sink.rows().is_empty());
    }

    #[tokio::test]
    async fn test_injected_failures_are_consumed() {
        let sink = MemorySink::new();
        sink.ensure_schema().await.unwrap();
        sink.fail_next(2);

        assert!(sink.upsert_observation(&observation("Kyiv", 1.0)).await.is_err());
        assert!(sink.upsert_observation(&observation("Kyiv", 1.0)).await.is_err());
        assert!(sink.upsert_observation(&observation("Kyiv", 1.0)).await.is_ok());
        assert_eq!(sink.rows().len(), 1);
    }

    #[tokio::test]
    async fn test_ensure_schema_is_idempotent() {
        let sink = MemorySink::new();
        sink.ensure_schema().await.unwrap();
        sink.ensure_schema().await.unwrap();
        assert!(sink.schema_ready());
    }
}
