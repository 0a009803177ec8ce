//! Weather source
//!
//! The boundary between the engine and the remote weather API. Steps only
//! see the [`WeatherSource`] trait; production wires in
//! [`HttpWeatherSource`], tests substitute a scripted fake.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use stratus_client::{ClientError, WeatherClient};
use stratus_core::domain::location::Location;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SourceError {
    /// Network failure or non-success HTTP status
    #[error(transparent)]
    Client(#[from] ClientError),

    /// The response was not a JSON object
    #[error("Malformed response: {0}")]
    Malformed(String),
}

#[async_trait]
pub trait WeatherSource: Send + Sync {
    /// Cheap readiness check; `Ok` means the API answers
    async fn probe(&self) -> Result<(), SourceError>;

    /// One read of the conditions at a location for a logical timestamp
    async fn fetch(
        &self,
        location: &Location,
        logical_timestamp: DateTime<Utc>,
    ) -> Result<JsonValue, SourceError>;
}

/// [`WeatherSource`] backed by the HTTP weather API
#[derive(Debug, Clone)]
pub struct HttpWeatherSource {
    client: WeatherClient,
    /// Reference coordinate used by `probe`
    probe_at: Location,
}

impl HttpWeatherSource {
    pub fn new(client: WeatherClient, probe_at: Location) -> Self {
        Self { client, probe_at }
    }
}

#[async_trait]
impl WeatherSource for HttpWeatherSource {
    async fn probe(&self) -> Result<(), SourceError> {
        self.client
            .probe(self.probe_at.latitude, self.probe_at.longitude)
            .await?;
        Ok(())
    }

    async fn fetch(
        &self,
        location: &Location,
        logical_timestamp: DateTime<Utc>,
    ) -> Result<JsonValue, SourceError> {
        let payload = self
            .client
            .current(
                location.latitude,
                location.longitude,
                Some(logical_timestamp.timestamp()),
            )
            .await?;

        if !payload.is_object() {
            return Err(SourceError::Malformed(format!(
                "expected a JSON object for {}, got {}",
                location.name, payload
            )));
        }

        Ok(payload)
    }
}
