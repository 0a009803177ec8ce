//! Weather observation domain types

use serde::{Deserialize, Serialize};

/// A normalized weather observation, one row in the sink
///
/// `timestamp` is the measurement time reported by the weather API
/// (epoch seconds), not the logical timestamp of the run that fetched it.
/// `(timestamp, location)` is the natural key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherObservation {
    pub timestamp: i64,
    pub location: String,
    pub temperature: f64,
    pub humidity: f64,
    pub cloudiness: f64,
    pub wind_speed: f64,
}

impl WeatherObservation {
    /// Natural key of the observation in the sink
    pub fn key(&self) -> (i64, &str) {
        (self.timestamp, &self.location)
    }
}
