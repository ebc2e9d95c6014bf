//! Retry/backoff policy (§4.7): what happens to a node's idle interval and retry counter after an
//! action's outcome is known.

use std::time::Duration;

use crate::action::ActionOutcome;
use crate::node::{Expiration, ReasonCode};

/// What the engine should do next with a node after an action outcome is known.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Re-arm with this reason/interval.
    Retry { idle_interval: Duration, retry_count: u32 },
    /// The retry cap was reached; abandon the node.
    Abandon,
    /// The action succeeded; the node is done.
    Done,
}

/// Backoff policy: doubles `idle_interval` between retries (monotonically increasing, so a
/// persistently failing node can never starve well-behaved ones — see DESIGN.md for why doubling
/// was chosen over the source's alternative additive formula).
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub cap: u32,
}

impl RetryPolicy {
    pub fn new(cap: u32) -> Self {
        Self { cap }
    }

    pub fn decide(&self, expiration: &Expiration, outcome: ActionOutcome) -> RetryDecision {
        match outcome {
            ActionOutcome::Success => RetryDecision::Done,
            ActionOutcome::Failure => {
                let next_count = expiration.retry_count + 1;
                if next_count >= self.cap {
                    RetryDecision::Abandon
                } else {
                    RetryDecision::Retry {
                        idle_interval: expiration.idle_interval * 2,
                        retry_count: next_count,
                    }
                }
            }
        }
    }
}

pub const RETRY_REASON: ReasonCode = ReasonCode::Retry;

#[cfg(test)]
mod tests {
    use super::*;

    fn expiration(idle_interval: Duration, retry_count: u32) -> Expiration {
        Expiration {
            deadline: std::time::Instant::now(),
            reason: ReasonCode::FirstSeen,
            idle_interval,
            retry_count,
        }
    }

    #[test]
    fn success_is_done() {
        let policy = RetryPolicy::new(5);
        let exp = expiration(Duration::from_secs(1), 0);
        assert_eq!(policy.decide(&exp, ActionOutcome::Success), RetryDecision::Done);
    }

    #[test]
    fn failure_doubles_interval_and_increments_count() {
        let policy = RetryPolicy::new(5);
        let exp = expiration(Duration::from_secs(2), 1);
        let decision = policy.decide(&exp, ActionOutcome::Failure);
        assert_eq!(
            decision,
            RetryDecision::Retry {
                idle_interval: Duration::from_secs(4),
                retry_count: 2,
            }
        );
    }

    #[test]
    fn retry_count_is_monotonic_and_bounded() {
        let policy = RetryPolicy::new(3);
        let mut exp = expiration(Duration::from_secs(1), 0);
        let mut counts = Vec::new();
        loop {
            match policy.decide(&exp, ActionOutcome::Failure) {
                RetryDecision::Retry { idle_interval, retry_count } => {
                    counts.push(retry_count);
                    exp.idle_interval = idle_interval;
                    exp.retry_count = retry_count;
                }
                RetryDecision::Abandon => break,
                RetryDecision::Done => unreachable!(),
            }
        }
        assert!(counts.windows(2).all(|w| w[1] > w[0]));
        assert!(counts.last().copied().unwrap_or(0) < policy.cap);
    }

    #[test]
    fn abandons_once_cap_reached() {
        let policy = RetryPolicy::new(2);
        let exp = expiration(Duration::from_secs(1), 1);
        assert_eq!(policy.decide(&exp, ActionOutcome::Failure), RetryDecision::Abandon);
    }
}
