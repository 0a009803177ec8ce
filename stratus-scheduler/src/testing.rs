//! Test doubles shared by the engine tests

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::{Value as JsonValue, json};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Mutex;
use stratus_client::ClientError;
use stratus_core::domain::location::Location;

use crate::source::{SourceError, WeatherSource};

/// The five default locations, in declaration order
pub fn cities() -> Vec<Location> {
    vec![
        Location::new("Lviv", 49.842957, 24.031111),
        Location::new("Kyiv", 50.450001, 30.523333),
        Location::new("Kharkiv", 49.988358, 36.232845),
        Location::new("Odesa", 46.482952, 30.712481),
        Location::new("Zhmerynka", 49.03705, 28.11201),
    ]
}

pub fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2023, 11, 28, 0, 0, 0).unwrap()
}

/// A weather API body carrying the fields the transform reads
pub fn payload(dt: i64, temp: f64, humidity: f64, clouds: f64, wind_speed: f64) -> JsonValue {
    json!({
        "dt": dt,
        "main": { "temp": temp, "humidity": humidity },
        "clouds": clouds,
        "wind_speed": wind_speed
    })
}

/// Scripted [`WeatherSource`]
///
/// Locations without a scripted payload answer with one stamped at the
/// run's logical timestamp.
#[derive(Debug)]
pub struct FakeSource {
    payloads: HashMap<String, JsonValue>,
    fetch_failures: Mutex<HashMap<String, u32>>,
    fetches: Mutex<Vec<String>>,
    available: AtomicBool,
    probe_failures: AtomicU32,
    probes: AtomicUsize,
}

impl FakeSource {
    pub fn new() -> Self {
        Self {
            payloads: HashMap::new(),
            fetch_failures: Mutex::new(HashMap::new()),
            fetches: Mutex::new(Vec::new()),
            available: AtomicBool::new(true),
            probe_failures: AtomicU32::new(0),
            probes: AtomicUsize::new(0),
        }
    }

    pub fn with_payload(mut self, location: &str, payload: JsonValue) -> Self {
        self.payloads.insert(location.to_string(), payload);
        self
    }

    /// The next `count` fetches for `location` answer HTTP 500
    pub fn fail_fetches(&self, location: &str, count: u32) {
        self.fetch_failures
            .lock()
            .unwrap()
            .insert(location.to_string(), count);
    }

    /// The next `count` probes fail
    pub fn fail_probes(&self, count: u32) {
        self.probe_failures.store(count, Ordering::SeqCst);
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn probes(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }

    /// Locations fetched so far, in call order
    pub fn fetches(&self) -> Vec<String> {
        self.fetches.lock().unwrap().clone()
    }

    pub fn fetches_for(&self, location: &str) -> usize {
        self.fetches()
            .iter()
            .filter(|name| name.as_str() == location)
            .count()
    }
}

#[async_trait]
impl WeatherSource for FakeSource {
    async fn probe(&self) -> Result<(), SourceError> {
        self.probes.fetch_add(1, Ordering::SeqCst);

        let scripted_failure = self
            .probe_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();

        if scripted_failure || !self.available.load(Ordering::SeqCst) {
            return Err(ClientError::api_error(503, "Service Unavailable").into());
        }
        Ok(())
    }

    async fn fetch(
        &self,
        location: &Location,
        logical_timestamp: DateTime<Utc>,
    ) -> Result<JsonValue, SourceError> {
        self.fetches.lock().unwrap().push(location.name.clone());

        if let Some(left) = self.fetch_failures.lock().unwrap().get_mut(&location.name) {
            if *left > 0 {
                *left -= 1;
                return Err(ClientError::api_error(500, "Internal Server Error").into());
            }
        }

        Ok(self
            .payloads
            .get(&location.name)
            .cloned()
            .unwrap_or_else(|| payload(logical_timestamp.timestamp(), 1.5, 70.0, 20.0, 2.0)))
    }
}
