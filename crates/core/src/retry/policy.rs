//! Retry decisions and backoff spacing.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::kind::{ErrorKind, Failure};

/// Raw outcome of [`decide`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Retry,
    Exhausted,
}

/// Decide whether a failed attempt may be retried.
///
/// `attempt_count` is the number of attempts already consumed, including the
/// one that just failed. Fatal kinds are exhausted regardless of budget.
pub fn decide(attempt_count: u32, max_attempts: u32, kind: ErrorKind) -> Verdict {
    if kind.is_retryable() && attempt_count < max_attempts {
        Verdict::Retry
    } else {
        Verdict::Exhausted
    }
}

/// Retry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum attempts per phase.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry, in seconds.
    #[serde(default = "default_initial_delay")]
    pub initial_delay_secs: u64,

    /// Upper bound for any retry delay, in seconds.
    #[serde(default = "default_max_delay")]
    pub max_delay_secs: u64,

    /// Exponential backoff multiplier.
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay() -> u64 {
    5
}

fn default_max_delay() -> u64 {
    300
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_secs: default_initial_delay(),
            max_delay_secs: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

impl RetryConfig {
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Disable spacing between attempts (tests).
    pub fn without_delay(mut self) -> Self {
        self.initial_delay_secs = 0;
        self.max_delay_secs = 0;
        self
    }
}

/// Decision returned to an executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Requeue the item, not to be admitted before `delay` has elapsed.
    Retry { delay: Duration },
    Exhausted,
}

/// Deployment-wide retry policy.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts
    }

    /// Evaluate a failure given the attempts consumed and the checksum
    /// mismatches already recorded in the same phase.
    pub fn evaluate(&self, attempt_count: u32, failure: &Failure, prior_mismatches: u32) -> Decision {
        let kind = Self::effective_kind(failure.kind, prior_mismatches);
        match decide(attempt_count, self.config.max_attempts, kind) {
            Verdict::Retry => Decision::Retry {
                delay: self.backoff(attempt_count),
            },
            Verdict::Exhausted => Decision::Exhausted,
        }
    }

    /// A second checksum mismatch in a phase is fatal.
    fn effective_kind(kind: ErrorKind, prior_mismatches: u32) -> ErrorKind {
        if kind == ErrorKind::ChecksumMismatch && prior_mismatches > 0 {
            ErrorKind::FatalDestinationError
        } else {
            kind
        }
    }

    /// Delay before the next attempt: `initial * multiplier^(attempt - 1)`, capped.
    pub fn backoff(&self, attempt_count: u32) -> Duration {
        let exponent = attempt_count.saturating_sub(1).min(32) as i32;
        let secs = self.config.initial_delay_secs as f64 * self.config.backoff_multiplier.powi(exponent);
        let capped = secs.min(self.config.max_delay_secs as f64).max(0.0);
        Duration::from_millis((capped * 1000.0) as u64)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decide_retries_within_budget() {
        assert_eq!(decide(1, 3, ErrorKind::RetryableTransportError), Verdict::Retry);
        assert_eq!(decide(2, 3, ErrorKind::Stalled), Verdict::Retry);
    }

    #[test]
    fn test_decide_exhausts_at_budget() {
        assert_eq!(
            decide(3, 3, ErrorKind::RetryableTransportError),
            Verdict::Exhausted
        );
        assert_eq!(
            decide(7, 3, ErrorKind::RetryableTransportError),
            Verdict::Exhausted
        );
    }

    #[test]
    fn test_fatal_short_circuits() {
        assert_eq!(decide(1, 10, ErrorKind::FatalAuthError), Verdict::Exhausted);
        assert_eq!(decide(0, 10, ErrorKind::FatalConfigError), Verdict::Exhausted);
        assert_eq!(
            decide(1, 10, ErrorKind::FatalDestinationError),
            Verdict::Exhausted
        );
    }

    #[test]
    fn test_checksum_mismatch_retried_once() {
        let policy = RetryPolicy::new(RetryConfig::default().with_max_attempts(5));
        let failure = Failure::checksum("aa", "bb");

        assert!(matches!(
            policy.evaluate(1, &failure, 0),
            Decision::Retry { .. }
        ));
        assert_eq!(policy.evaluate(2, &failure, 1), Decision::Exhausted);
        // Other failures do not count toward the mismatch rule.
        assert!(matches!(
            policy.evaluate(3, &Failure::transport("reset"), 1),
            Decision::Retry { .. }
        ));
    }

    #[test]
    fn test_backoff_is_exponential_and_capped() {
        let policy = RetryPolicy::new(RetryConfig {
            max_attempts: 10,
            initial_delay_secs: 5,
            max_delay_secs: 30,
            backoff_multiplier: 2.0,
        });

        assert_eq!(policy.backoff(1), Duration::from_secs(5));
        assert_eq!(policy.backoff(2), Duration::from_secs(10));
        assert_eq!(policy.backoff(3), Duration::from_secs(20));
        assert_eq!(policy.backoff(4), Duration::from_secs(30));
        assert_eq!(policy.backoff(20), Duration::from_secs(30));
    }

    #[test]
    fn test_without_delay() {
        let policy = RetryPolicy::new(RetryConfig::default().without_delay());
        let failure = Failure::transport("connection reset");
        assert_eq!(
            policy.evaluate(1, &failure, 0),
            Decision::Retry {
                delay: Duration::ZERO
            }
        );
    }
}
