//! Retry policy with exponential backoff.
//!
//! Retries are not slept inline: the delay is persisted on the clip as
//! `retry_after` and honoured by the next orchestration tick, so a restart
//! keeps the schedule.

use std::time::Duration;

/// Configuration for clip retry behavior.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of retries (not including the initial attempt).
    pub max_retries: u32,
    /// Base delay for exponential backoff (doubles each attempt).
    pub base_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
}

/// What to do with a failed clip attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Schedule another attempt after `delay`.
    Retry { delay: Duration },
    /// Transient failure but the budget is spent.
    Exhausted,
    /// Not worth retrying.
    Permanent,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(120),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay,
        }
    }

    /// Calculate delay for a given attempt number: `min(base * 2^attempt, max)`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Decide the next step for a clip that has used `retries` retries so far.
    pub fn decide(&self, retries: u32, retryable: bool) -> RetryDecision {
        if !retryable {
            RetryDecision::Permanent
        } else if retries < self.max_retries {
            RetryDecision::Retry {
                delay: self.delay_for_attempt(retries),
            }
        } else {
            RetryDecision::Exhausted
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_calculation() {
        let policy = RetryPolicy::new(3, Duration::from_millis(100), Duration::from_secs(5));

        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(400));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(800));
    }

    #[test]
    fn test_delay_caps_at_max() {
        let policy = RetryPolicy::new(10, Duration::from_secs(1), Duration::from_secs(5));
        assert_eq!(policy.delay_for_attempt(10), Duration::from_secs(5));
        assert_eq!(policy.delay_for_attempt(64), Duration::from_secs(5));
    }

    #[test]
    fn test_decide_respects_budget() {
        let policy = RetryPolicy::new(3, Duration::from_secs(1), Duration::from_secs(60));

        assert_eq!(
            policy.decide(0, true),
            RetryDecision::Retry {
                delay: Duration::from_secs(1)
            }
        );
        assert_eq!(
            policy.decide(2, true),
            RetryDecision::Retry {
                delay: Duration::from_secs(4)
            }
        );
        assert_eq!(policy.decide(3, true), RetryDecision::Exhausted);
        assert_eq!(policy.decide(0, false), RetryDecision::Permanent);
    }

    #[test]
    fn test_zero_budget_never_retries() {
        let policy = RetryPolicy::new(0, Duration::from_secs(1), Duration::from_secs(1));
        assert_eq!(policy.decide(0, true), RetryDecision::Exhausted);
    }
}
