//! Scheduler configuration
//!
//! Every setting comes from an environment variable. Anything malformed is
//! reported as [`EngineError::Config`] at startup, before a single run is
//! admitted.

use chrono::{DateTime, NaiveDate, Utc};
use std::net::SocketAddr;
use std::time::Duration;
use stratus_core::domain::location::Location;

use crate::clock::Schedule;
use crate::coordinator::retry::{Backoff, RetryPolicy};
use crate::error::{EngineError, Result};

pub const DEFAULT_WEATHER_API_URL: &str = "https://api.openweathermap.org/data/3.0/onecall";
/// Upper bound for every duration setting
pub const MAX_DURATION: Duration = Duration::from_secs(366 * 24 * 60 * 60);

pub const DEFAULT_LOCATIONS: &str = "Lviv:49.842957:24.031111;Kyiv:50.450001:30.523333;\
Kharkiv:49.988358:36.232845;Odesa:46.482952:30.712481;Zhmerynka:49.03705:28.11201";

/// Where observations and run reports are stored
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backend {
    Postgres(String),
    /// `memory://`, nothing survives a restart
    Memory,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub weather_api_url: String,
    pub weather_api_key: String,
    pub backend: Backend,
    /// Observation table name
    pub sink_table: String,
    pub schedule: Schedule,
    pub start_date: DateTime<Utc>,
    pub catchup: bool,
    pub locations: Vec<Location>,

    pub max_attempts: u32,
    pub retry_delay: Duration,
    pub retry_backoff: Backoff,
    pub max_retry_delay: Duration,

    pub availability_poke_interval: Duration,
    pub availability_timeout: Duration,
    /// Reference coordinate for the availability probe
    pub probe_location: Location,

    pub run_timeout: Duration,
    pub max_active_runs: usize,
    pub max_parallel_steps: usize,
    /// How often the clock is consulted when nothing else happens
    pub tick_interval: Duration,
    pub http_timeout: Duration,
    pub bind_addr: SocketAddr,
}

impl Config {
    /// Creates configuration from environment variables
    ///
    /// Expected environment variables:
    /// - WEATHER_API_KEY (required)
    /// - DATABASE_URL (required, Postgres URL or `memory://`)
    /// - WEATHER_API_URL, SINK_TABLE, SCHEDULE, START_DATE, CATCHUP, LOCATIONS
    /// - MAX_ATTEMPTS, RETRY_DELAY, RETRY_BACKOFF, MAX_RETRY_DELAY
    /// - AVAILABILITY_POKE_INTERVAL, AVAILABILITY_TIMEOUT, PROBE_LATITUDE, PROBE_LONGITUDE
    /// - RUN_TIMEOUT, MAX_ACTIVE_RUNS, MAX_PARALLEL_STEPS, TICK_INTERVAL, HTTP_TIMEOUT
    /// - SCHEDULER_BIND_ADDR
    pub fn from_env() -> Result<Self> {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    /// Same as [`Config::from_env`] with a custom variable lookup
    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |name: &str| var(name).filter(|value| !value.trim().is_empty());

        let weather_api_key = get("WEATHER_API_KEY").ok_or_else(|| {
            EngineError::Config("WEATHER_API_KEY environment variable not set".into())
        })?;

        let database_url = get("DATABASE_URL").ok_or_else(|| {
            EngineError::Config("DATABASE_URL environment variable not set".into())
        })?;
        let backend = if database_url.starts_with("memory://") {
            Backend::Memory
        } else {
            Backend::Postgres(database_url)
        };

        let probe_location = Location::new(
            "probe",
            parse(&get, "PROBE_LATITUDE", 49.842957)?,
            parse(&get, "PROBE_LONGITUDE", 24.031111)?,
        );

        let config = Self {
            weather_api_url: get("WEATHER_API_URL")
                .unwrap_or_else(|| DEFAULT_WEATHER_API_URL.to_string()),
            weather_api_key,
            backend,
            sink_table: get("SINK_TABLE").unwrap_or_else(|| "measures".to_string()),
            schedule: parse(&get, "SCHEDULE", Schedule::Daily)?,
            start_date: match get("START_DATE") {
                Some(value) => parse_start_date(&value)?,
                None => parse_start_date("2023-11-28")?,
            },
            catchup: parse_bool(&get, "CATCHUP", true)?,
            locations: parse_locations(
                &get("LOCATIONS").unwrap_or_else(|| DEFAULT_LOCATIONS.to_string()),
            )?,
            max_attempts: parse(&get, "MAX_ATTEMPTS", 3)?,
            retry_delay: seconds(&get, "RETRY_DELAY", 5)?,
            retry_backoff: parse(&get, "RETRY_BACKOFF", Backoff::Exponential)?,
            max_retry_delay: seconds(&get, "MAX_RETRY_DELAY", 300)?,
            availability_poke_interval: seconds(&get, "AVAILABILITY_POKE_INTERVAL", 60)?,
            availability_timeout: seconds(&get, "AVAILABILITY_TIMEOUT", 600)?,
            probe_location,
            run_timeout: seconds(&get, "RUN_TIMEOUT", 3600)?,
            max_active_runs: parse(&get, "MAX_ACTIVE_RUNS", 16)?,
            max_parallel_steps: parse(&get, "MAX_PARALLEL_STEPS", 8)?,
            tick_interval: seconds(&get, "TICK_INTERVAL", 5)?,
            http_timeout: seconds(&get, "HTTP_TIMEOUT", 30)?,
            bind_addr: parse(
                &get,
                "SCHEDULER_BIND_ADDR",
                SocketAddr::from(([0, 0, 0, 0], 8090)),
            )?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Checks invariants between settings
    pub fn validate(&self) -> Result<()> {
        if !is_identifier(&self.sink_table) {
            return Err(EngineError::Config(format!(
                "SINK_TABLE '{}' is not a valid SQL identifier",
                self.sink_table
            )));
        }
        if self.max_attempts == 0 {
            return Err(EngineError::Config("MAX_ATTEMPTS must be at least 1".into()));
        }
        for (name, value) in [
            ("MAX_ACTIVE_RUNS", self.max_active_runs),
            ("MAX_PARALLEL_STEPS", self.max_parallel_steps),
        ] {
            if value == 0 {
                return Err(EngineError::Config(format!("{} must be at least 1", name)));
            }
        }
        for (name, value) in [
            ("AVAILABILITY_POKE_INTERVAL", self.availability_poke_interval),
            ("AVAILABILITY_TIMEOUT", self.availability_timeout),
            ("RUN_TIMEOUT", self.run_timeout),
            ("TICK_INTERVAL", self.tick_interval),
            ("HTTP_TIMEOUT", self.http_timeout),
        ] {
            if value.is_zero() {
                return Err(EngineError::Config(format!("{} must be > 0", name)));
            }
        }
        for (name, value) in [
            ("RETRY_DELAY", self.retry_delay),
            ("MAX_RETRY_DELAY", self.max_retry_delay),
            ("AVAILABILITY_POKE_INTERVAL", self.availability_poke_interval),
            ("AVAILABILITY_TIMEOUT", self.availability_timeout),
            ("RUN_TIMEOUT", self.run_timeout),
            ("TICK_INTERVAL", self.tick_interval),
            ("HTTP_TIMEOUT", self.http_timeout),
        ] {
            if value > MAX_DURATION {
                return Err(EngineError::Config(format!(
                    "{} must not exceed {} seconds",
                    name,
                    MAX_DURATION.as_secs()
                )));
            }
        }
        if self.max_retry_delay < self.retry_delay {
            return Err(EngineError::Config(
                "MAX_RETRY_DELAY must not be shorter than RETRY_DELAY".into(),
            ));
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        match self.retry_backoff {
            Backoff::Fixed => RetryPolicy::fixed(self.max_attempts, self.retry_delay),
            Backoff::Exponential => RetryPolicy::exponential(
                self.max_attempts,
                self.retry_delay,
                self.max_retry_delay,
            ),
        }
    }
}

fn parse<T>(get: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match get(name) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|e| EngineError::Config(format!("{}='{}': {}", name, value, e))),
        None => Ok(default),
    }
}

fn seconds(get: &impl Fn(&str) -> Option<String>, name: &str, default: u64) -> Result<Duration> {
    parse(get, name, default).map(Duration::from_secs)
}

fn parse_bool(get: &impl Fn(&str) -> Option<String>, name: &str, default: bool) -> Result<bool> {
    match get(name).map(|value| value.trim().to_ascii_lowercase()) {
        None => Ok(default),
        Some(value) => match value.as_str() {
            "true" | "1" | "yes" => Ok(true),
            "false" | "0" | "no" => Ok(false),
            _ => Err(EngineError::Config(format!(
                "{}='{}' is not a boolean",
                name, value
            ))),
        },
    }
}

/// Accepts RFC 3339 or a plain `YYYY-MM-DD` date (midnight UTC)
pub fn parse_start_date(value: &str) -> Result<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(at) = DateTime::parse_from_rfc3339(value) {
        return Ok(at.with_timezone(&Utc));
    }

    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|at| at.and_utc())
        .ok_or_else(|| {
            EngineError::Config(format!(
                "START_DATE '{}' is neither RFC 3339 nor YYYY-MM-DD",
                value
            ))
        })
}

/// Parses `Name:lat:lon;Name:lat:lon;...`
pub fn parse_locations(value: &str) -> Result<Vec<Location>> {
    let mut locations: Vec<Location> = Vec::new();

    for entry in value.split(';').map(str::trim).filter(|e| !e.is_empty()) {
        let parts: Vec<&str> = entry.split(':').map(str::trim).collect();
        let [name, latitude, longitude] = parts.as_slice() else {
            return Err(EngineError::Config(format!(
                "location '{}' must look like Name:lat:lon",
                entry
            )));
        };

        let coordinate = |raw: &str, range: f64| -> Result<f64> {
            raw.parse::<f64>()
                .ok()
                .filter(|v| v.is_finite() && v.abs() <= range)
                .ok_or_else(|| {
                    EngineError::Config(format!(
                        "location '{}' has bad coordinate '{}'",
                        entry, raw
                    ))
                })
        };

        if name.is_empty() {
            return Err(EngineError::Config(format!(
                "location '{}' has no name",
                entry
            )));
        }
        if locations.iter().any(|l| l.name == *name) {
            return Err(EngineError::Config(format!(
                "location '{}' is listed twice",
                name
            )));
        }

        locations.push(Location::new(
            *name,
            coordinate(*latitude, 90.0)?,
            coordinate(*longitude, 180.0)?,
        ));
    }

    if locations.is_empty() {
        return Err(EngineError::Config("LOCATIONS is empty".into()));
    }

    Ok(locations)
}

/// Letters, digits and underscores, not starting with a digit
fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            name.len() <= 63 && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<Config> {
        let mut env: HashMap<String, String> = HashMap::from([
            ("WEATHER_API_KEY".to_string(), "secret".to_string()),
            ("DATABASE_URL".to_string(), "memory://".to_string()),
        ]);
        for (name, value) in vars {
            env.insert(name.to_string(), value.to_string());
        }
        Config::from_vars(|name| env.get(name).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config(&[]).unwrap();

        assert_eq!(config.weather_api_url, DEFAULT_WEATHER_API_URL);
        assert_eq!(config.backend, Backend::Memory);
        assert_eq!(config.sink_table, "measures");
        assert_eq!(config.schedule, Schedule::Daily);
        assert_eq!(
            config.start_date,
            Utc.with_ymd_and_hms(2023, 11, 28, 0, 0, 0).unwrap()
        );
        assert!(config.catchup);
        assert_eq!(config.locations.len(), 5);
        assert_eq!(config.locations[0].name, "Lviv");
        assert_eq!(config.retry_policy(), RetryPolicy::default());
        assert_eq!(config.availability_timeout, Duration::from_secs(600));
        assert_eq!(config.bind_addr.port(), 8090);
    }

    #[test]
    fn test_overrides() {
        let config = config(&[
            ("DATABASE_URL", "postgres://stratus@localhost/stratus"),
            ("SCHEDULE", "@hourly"),
            ("START_DATE", "2024-01-02T06:00:00Z"),
            ("CATCHUP", "false"),
            ("LOCATIONS", "Lviv:49.84:24.03"),
            ("RETRY_BACKOFF", "fixed"),
            ("MAX_ATTEMPTS", "5"),
            ("RETRY_DELAY", "2"),
        ])
        .unwrap();

        assert_eq!(
            config.backend,
            Backend::Postgres("postgres://stratus@localhost/stratus".into())
        );
        assert_eq!(config.schedule, Schedule::Hourly);
        assert_eq!(
            config.start_date,
            Utc.with_ymd_and_hms(2024, 1, 2, 6, 0, 0).unwrap()
        );
        assert!(!config.catchup);
        assert_eq!(config.locations, vec![Location::new("Lviv", 49.84, 24.03)]);
        assert_eq!(
            config.retry_policy(),
            RetryPolicy::fixed(5, Duration::from_secs(2))
        );
    }

    #[test]
    fn test_missing_api_key_is_config_error() {
        let err = Config::from_vars(|name| {
            (name == "DATABASE_URL").then(|| "memory://".to_string())
        })
        .unwrap_err();

        assert!(matches!(err, EngineError::Config(msg) if msg.contains("WEATHER_API_KEY")));
    }

    #[test]
    fn test_malformed_values_are_config_errors() {
        for (name, value) in [
            ("SCHEDULE", "@monthly"),
            ("START_DATE", "yesterday"),
            ("CATCHUP", "maybe"),
            ("MAX_ATTEMPTS", "three"),
            ("MAX_ATTEMPTS", "0"),
            ("RETRY_BACKOFF", "linear"),
            ("LOCATIONS", "Lviv:49.84"),
            ("LOCATIONS", "Lviv:91:24"),
            ("LOCATIONS", "Lviv:49:24;Lviv:50:30"),
            ("SINK_TABLE", "measures; DROP TABLE users"),
            ("AVAILABILITY_TIMEOUT", "0"),
            ("SCHEDULER_BIND_ADDR", "localhost"),
            ("RUN_TIMEOUT", "18446744073709551615"),
            ("AVAILABILITY_TIMEOUT", "31622401"),
            ("MAX_RETRY_DELAY", "99999999999"),
        ] {
            let result = config(&[(name, value)]);
            assert!(
                matches!(result, Err(EngineError::Config(_))),
                "{}={} should be rejected",
                name,
                value
            );
        }
    }

    #[test]
    fn test_longest_accepted_run_timeout() {
        let config = config(&[("RUN_TIMEOUT", "31622400")]).unwrap();
        assert_eq!(config.run_timeout, MAX_DURATION);
    }

    #[test]
    fn test_identifier_rules() {
        assert!(is_identifier("measures"));
        assert!(is_identifier("_weather_2023"));
        assert!(!is_identifier("2023_weather"));
        assert!(!is_identifier("weather-data"));
        assert!(!is_identifier(""));
    }
}
