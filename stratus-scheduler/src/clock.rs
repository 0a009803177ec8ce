//! Run clock
//!
//! Computes the logical timestamps owed to a pipeline. A logical timestamp
//! `t = start + k * period` names the data interval `[t, t + period)` and
//! becomes due once that interval has closed, i.e. when `t + period <= now`.

use chrono::{DateTime, TimeDelta, Utc};
use std::str::FromStr;

use crate::definition::PipelineDefinition;
use crate::error::EngineError;

/// Fixed run period of a pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schedule {
    Hourly,
    Daily,
    Weekly,
    /// Arbitrary period in whole seconds
    Every(u64),
}

impl Schedule {
    pub fn period(&self) -> TimeDelta {
        match self {
            Schedule::Hourly => TimeDelta::hours(1),
            Schedule::Daily => TimeDelta::days(1),
            Schedule::Weekly => TimeDelta::weeks(1),
            Schedule::Every(seconds) => TimeDelta::seconds(*seconds as i64),
        }
    }
}

impl FromStr for Schedule {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "@hourly" => Ok(Schedule::Hourly),
            "@daily" => Ok(Schedule::Daily),
            "@weekly" => Ok(Schedule::Weekly),
            other => match other.parse::<u64>() {
                Ok(0) => Err(EngineError::Config("schedule period must be > 0".into())),
                Ok(seconds) if seconds > i32::MAX as u64 => Err(EngineError::Config(format!(
                    "schedule period {} seconds is too large",
                    seconds
                ))),
                Ok(seconds) => Ok(Schedule::Every(seconds)),
                Err(_) => Err(EngineError::Config(format!(
                    "unknown schedule '{}' (expected @hourly, @daily, @weekly or seconds)",
                    other
                ))),
            },
        }
    }
}

impl std::fmt::Display for Schedule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Schedule::Hourly => f.write_str("@hourly"),
            Schedule::Daily => f.write_str("@daily"),
            Schedule::Weekly => f.write_str("@weekly"),
            Schedule::Every(seconds) => write!(f, "every {}s", seconds),
        }
    }
}

/// Logical timestamps due at `now` that are strictly after `watermark`
///
/// Ascending, oldest first. Without catchup only the most recent due
/// timestamp is returned. Calling this again with the same watermark and
/// clock returns the same sequence.
pub fn due_runs(
    definition: &PipelineDefinition,
    watermark: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Vec<DateTime<Utc>> {
    let start = definition.start;
    let period = definition.schedule.period().num_seconds();

    let elapsed = (now - start).num_seconds();
    if elapsed < period {
        return Vec::new();
    }
    // Last k with start + (k + 1) * period <= now
    let last = elapsed / period - 1;

    let first = match watermark {
        Some(mark) if mark >= start => (mark - start).num_seconds() / period + 1,
        _ => 0,
    };

    if first > last {
        return Vec::new();
    }

    let at = |k: i64| start + TimeDelta::seconds(k * period);

    if definition.catchup {
        (first..=last).map(at).collect()
    } else {
        vec![at(last)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, 11, 28, 0, 0, 0).unwrap()
    }

    fn definition(schedule: Schedule, catchup: bool) -> PipelineDefinition {
        PipelineDefinition::new("weather_ingest", schedule, start()).with_catchup(catchup)
    }

    #[test]
    fn test_parse_schedule() {
        assert_eq!("@daily".parse::<Schedule>().unwrap(), Schedule::Daily);
        assert_eq!("@hourly".parse::<Schedule>().unwrap(), Schedule::Hourly);
        assert_eq!("900".parse::<Schedule>().unwrap(), Schedule::Every(900));
        assert!("0".parse::<Schedule>().is_err());
        assert!("@monthly".parse::<Schedule>().is_err());
    }

    #[test]
    fn test_k_periods_after_start_yields_k_runs() {
        for schedule in [Schedule::Hourly, Schedule::Daily, Schedule::Every(900)] {
            let period = schedule.period();
            for k in 1..=5 {
                let now = start() + period * k;
                let due = due_runs(&definition(schedule, true), None, now);

                assert_eq!(due.len(), k as usize);
                assert_eq!(due[0], start());
                for pair in due.windows(2) {
                    assert_eq!(pair[1] - pair[0], period);
                }
            }
        }
    }

    #[test]
    fn test_without_catchup_only_latest_is_due() {
        let now = start() + TimeDelta::days(3);
        let due = due_runs(&definition(Schedule::Daily, false), None, now);

        assert_eq!(due, vec![start() + TimeDelta::days(2)]);
    }

    #[test]
    fn test_nothing_due_before_first_interval_closes() {
        let now = start() + TimeDelta::hours(23);
        assert!(due_runs(&definition(Schedule::Daily, true), None, now).is_empty());

        let before_start = start() - TimeDelta::days(1);
        assert!(due_runs(&definition(Schedule::Daily, true), None, before_start).is_empty());
    }

    #[test]
    fn test_watermark_excludes_attempted_runs() {
        let def = definition(Schedule::Daily, true);
        let now = start() + TimeDelta::days(4);
        let watermark = Some(start() + TimeDelta::days(1));

        let due = due_runs(&def, watermark, now);
        assert_eq!(
            due,
            vec![start() + TimeDelta::days(2), start() + TimeDelta::days(3)]
        );

        // Same watermark, same clock, same answer
        assert_eq!(due_runs(&def, watermark, now), due);

        // Fully caught up
        let caught_up = Some(start() + TimeDelta::days(3));
        assert!(due_runs(&def, caught_up, now).is_empty());
    }

    #[test]
    fn test_unaligned_now_rounds_down() {
        let now = start() + TimeDelta::days(2) + TimeDelta::hours(13);
        let due = due_runs(&definition(Schedule::Daily, true), None, now);
        assert_eq!(due.len(), 2);
    }
}
