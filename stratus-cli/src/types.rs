//! Common types used across CLI modules

use anyhow::{Result, anyhow};
use chrono::{DateTime, NaiveDate, Utc};

/// Logical timestamp of a run as typed by the user
///
/// Accepts epoch seconds, RFC 3339 or a plain `YYYY-MM-DD` date (midnight UTC).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunRef(DateTime<Utc>);

impl RunRef {
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();

        if let Ok(seconds) = input.parse::<i64>() {
            return DateTime::from_timestamp(seconds, 0)
                .map(RunRef)
                .ok_or_else(|| anyhow!("Timestamp {} is out of range", seconds));
        }

        if let Ok(at) = DateTime::parse_from_rfc3339(input) {
            return Ok(RunRef(at.with_timezone(&Utc)));
        }

        NaiveDate::parse_from_str(input, "%Y-%m-%d")
            .ok()
            .and_then(|date| date.and_hms_opt(0, 0, 0))
            .map(|at| RunRef(at.and_utc()))
            .ok_or_else(|| {
                anyhow!(
                    "'{}' is not a run timestamp (use epoch seconds, RFC 3339 or YYYY-MM-DD)",
                    input
                )
            })
    }

    /// Epoch seconds, as the scheduler API addresses runs
    pub fn epoch_seconds(&self) -> i64 {
        self.0.timestamp()
    }
}

impl std::fmt::Display for RunRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d %H:%M:%S UTC"))
    }
}
