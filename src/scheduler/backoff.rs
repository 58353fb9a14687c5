//! # Retry / Backoff Policy
//!
//! Fixed-budget exponential backoff with a hard attempt ceiling. The delay
//! for attempt `n` (1-based) is `5^n` minutes (5, 25 and 125 minutes across
//! the three tiers), and a document that has consumed its budget is done for
//! good. Scheduling suspends the message on a delayed channel, never a worker.

use std::time::Duration;

/// Outcome of asking the policy about one more attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Re-enqueue on the given tier after the delay
    Requeue { tier: u8, delay: Duration },
    /// Budget consumed; the failure is terminal
    Exhausted,
}

/// Retry budget shared by send and ticket-check attempts
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    max_attempts: i32,
}

impl RetryPolicy {
    pub fn new(max_attempts: i32) -> Self {
        Self { max_attempts }
    }

    pub fn max_attempts(&self) -> i32 {
        self.max_attempts
    }

    /// Decide what to do after a retryable failure. `retries` is the number
    /// of re-attempts already consumed (0 on the first failure).
    pub fn decide(&self, retries: i32) -> RetryDecision {
        if retries >= self.max_attempts {
            return RetryDecision::Exhausted;
        }

        let attempt = retries + 1;
        let minutes = 5u64.saturating_pow(attempt.min(6) as u32);
        RetryDecision::Requeue {
            tier: attempt.min(u8::MAX as i32) as u8,
            delay: Duration::from_secs(minutes * 60),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 3 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_delays() {
        let policy = RetryPolicy::default();

        assert_eq!(
            policy.decide(0),
            RetryDecision::Requeue {
                tier: 1,
                delay: Duration::from_secs(5 * 60)
            }
        );
        assert_eq!(
            policy.decide(1),
            RetryDecision::Requeue {
                tier: 2,
                delay: Duration::from_secs(25 * 60)
            }
        );
        assert_eq!(
            policy.decide(2),
            RetryDecision::Requeue {
                tier: 3,
                delay: Duration::from_secs(125 * 60)
            }
        );
    }

    #[test]
    fn test_ceiling_is_hard() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.decide(3), RetryDecision::Exhausted);
        assert_eq!(policy.decide(4), RetryDecision::Exhausted);
        assert_eq!(policy.decide(100), RetryDecision::Exhausted);
    }

    #[test]
    fn test_custom_budget() {
        let policy = RetryPolicy::new(1);
        assert!(matches!(policy.decide(0), RetryDecision::Requeue { .. }));
        assert_eq!(policy.decide(1), RetryDecision::Exhausted);
    }
}
