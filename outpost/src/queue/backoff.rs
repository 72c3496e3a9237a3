//! Retry policy for failed publish jobs.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Largest accepted `max_delay_ms`: one year.
pub const MAX_DELAY_CEILING_MS: u64 = 365 * 24 * 60 * 60 * 1000;

/// Configuration for retry behavior.
///
/// `attempts` counts claims, so the first failure is evaluated with
/// `attempts == 1`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Maximum number of claims before a retryable failure becomes permanent.
    pub max_attempts: u32,
    /// Delay after the first failure, in milliseconds.
    pub base_delay_ms: u64,
    /// Multiplier for exponential backoff.
    pub backoff_factor: f64,
    /// Ceiling for a single delay, in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 30_000,
            backoff_factor: 2.0,
            max_delay_ms: 60 * 60 * 1000,
        }
    }
}

impl RetryPolicy {
    /// Delay before the next run: `min(base * factor^(attempts-1), max)`.
    ///
    /// Never zero, so a rescheduled job always lands strictly in the future.
    pub fn delay_for_attempt(&self, attempts: u32) -> Duration {
        let exponent = attempts.max(1).saturating_sub(1).min(i32::MAX as u32) as i32;
        let raw = self.base_delay_ms as f64 * self.backoff_factor.powi(exponent);

        let delay_ms = if raw.is_finite() {
            raw.min(self.max_delay_ms as f64) as u64
        } else {
            self.max_delay_ms
        };

        Duration::from_millis(delay_ms.max(1))
    }

    /// Check if another attempt is allowed after `attempts` claims.
    pub fn should_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }

    pub fn validate(&self) -> crate::Result<()> {
        if self.max_attempts == 0 {
            return Err(crate::Error::config("retry.max_attempts must be at least 1"));
        }
        if !self.backoff_factor.is_finite() || self.backoff_factor < 1.0 {
            return Err(crate::Error::config(format!(
                "retry.backoff_factor must be a finite number >= 1.0, got {}",
                self.backoff_factor
            )));
        }
        if self.max_delay_ms > MAX_DELAY_CEILING_MS {
            return Err(crate::Error::config(format!(
                "retry.max_delay_ms must be at most {MAX_DELAY_CEILING_MS}, got {}",
                self.max_delay_ms
            )));
        }
        if self.max_delay_ms < self.base_delay_ms {
            return Err(crate::Error::config(
                "retry.max_delay_ms must not be smaller than retry.base_delay_ms",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_retry() {
        let policy = RetryPolicy {
            max_attempts: 3,
            ..Default::default()
        };
        assert!(policy.should_retry(1));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
        assert!(!policy.should_retry(4));
    }

    #[test]
    fn test_delay_calculation() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay_ms: 1000,
            backoff_factor: 2.0,
            max_delay_ms: 10_000,
        };

        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(1000));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(1000));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(2000));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(4000));
        assert_eq!(policy.delay_for_attempt(10), Duration::from_millis(10_000));
        assert_eq!(policy.delay_for_attempt(u32::MAX), Duration::from_millis(10_000));
    }

    #[test]
    fn test_delays_never_decrease() {
        let policy = RetryPolicy {
            max_attempts: 50,
            base_delay_ms: 250,
            backoff_factor: 1.7,
            max_delay_ms: 90_000,
        };

        let mut previous = Duration::ZERO;
        for attempt in 1..50 {
            let delay = policy.delay_for_attempt(attempt);
            assert!(delay >= previous, "attempt {attempt} decreased");
            assert!(delay <= Duration::from_millis(90_000));
            previous = delay;
        }
    }

    #[test]
    fn test_zero_base_still_moves_forward() {
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay_ms: 0,
            backoff_factor: 2.0,
            max_delay_ms: 0,
        };
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(1));
    }

    #[test]
    fn test_validate() {
        assert!(RetryPolicy::default().validate().is_ok());

        let policy = RetryPolicy {
            max_attempts: 0,
            ..Default::default()
        };
        assert!(policy.validate().is_err());

        let policy = RetryPolicy {
            backoff_factor: 0.5,
            ..Default::default()
        };
        assert!(policy.validate().is_err());

        let policy = RetryPolicy {
            max_delay_ms: u64::MAX,
            ..Default::default()
        };
        assert!(policy.validate().is_err());

        let policy = RetryPolicy {
            max_delay_ms: MAX_DELAY_CEILING_MS,
            ..Default::default()
        };
        assert!(policy.validate().is_ok());
    }
}
