//! Retry policy for failed step attempts

use std::str::FromStr;
use std::time::Duration;

use crate::error::EngineError;

/// How the delay grows between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    Fixed,
    Exponential,
}

impl FromStr for Backoff {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fixed" => Ok(Backoff::Fixed),
            "exponential" => Ok(Backoff::Exponential),
            other => Err(EngineError::Config(format!(
                "unknown retry backoff '{}' (expected fixed or exponential)",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub delay: Duration,
    pub backoff: Backoff,
    /// Upper bound for exponential delays
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
            backoff: Backoff::Fixed,
            max_delay: delay,
        }
    }

    pub fn exponential(max_attempts: u32, delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
            backoff: Backoff::Exponential,
            max_delay,
        }
    }

    /// Whether a failed attempt number `attempt` (1-based) may be followed by another
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Delay to wait after failed attempt number `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed => self.delay,
            Backoff::Exponential => {
                let exponent = attempt.saturating_sub(1).min(31);
                self.delay
                    .saturating_mul(1u32 << exponent)
                    .min(self.max_delay)
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::exponential(3, Duration::from_secs(5), Duration::from_secs(300))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attempt_limit() {
        let policy = RetryPolicy::fixed(3, Duration::from_secs(1));
        assert!(policy.should_retry(1));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
    }

    #[test]
    fn test_single_attempt_never_retries() {
        let policy = RetryPolicy::fixed(1, Duration::from_secs(1));
        assert!(!policy.should_retry(1));
    }

    #[test]
    fn test_fixed_delay() {
        let policy = RetryPolicy::fixed(5, Duration::from_secs(2));
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(4), Duration::from_secs(2));
    }

    #[test]
    fn test_exponential_delay_is_capped() {
        let policy =
            RetryPolicy::exponential(10, Duration::from_millis(500), Duration::from_secs(3));
        assert_eq!(policy.delay_for(1), Duration::from_millis(500));
        assert_eq!(policy.delay_for(2), Duration::from_secs(1));
        assert_eq!(policy.delay_for(3), Duration::from_secs(2));
        assert_eq!(policy.delay_for(4), Duration::from_secs(3));
        assert_eq!(policy.delay_for(40), Duration::from_secs(3));
    }

    #[test]
    fn test_parse_backoff() {
        assert_eq!("Exponential".parse::<Backoff>().unwrap(), Backoff::Exponential);
        assert_eq!("fixed".parse::<Backoff>().unwrap(), Backoff::Fixed);
        assert!("linear".parse::<Backoff>().is_err());
    }
}
