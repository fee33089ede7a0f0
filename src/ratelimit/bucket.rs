//! Token bucket state and the refill/consume arithmetic.

use std::time::Duration;

use super::decision::Decision;
use super::policy::Policy;

/// Per-client token bucket.
///
/// Refill is lazy: nothing happens between checks, and each check first
/// credits the tokens accrued since the previous one.
#[derive(Debug, Clone, PartialEq)]
pub struct Bucket {
    /// Available tokens, always within `[0, capacity]`
    tokens: f64,
    /// Timestamp of the last refill computation, in milliseconds
    last_refill_ms: u64,
}

impl Bucket {
    /// A full bucket.
    pub fn full(policy: &Policy, now_ms: u64) -> Self {
        Self {
            tokens: policy.capacity(),
            last_refill_ms: now_ms,
        }
    }

    /// Current token count, as of the last refill.
    pub fn tokens(&self) -> f64 {
        self.tokens
    }

    /// When the bucket was last refilled.
    pub fn last_refill_ms(&self) -> u64 {
        self.last_refill_ms
    }

    /// Credit tokens accrued since the last refill, clamped to capacity.
    ///
    /// The refill timestamp advances to `now_ms` whether or not the check
    /// is admitted, so accrual runs from the last check. A timestamp older
    /// than the last refill credits nothing and leaves the refill time
    /// where it is, so no interval is ever credited twice.
    pub fn refill(&mut self, policy: &Policy, now_ms: u64) {
        let elapsed_secs = now_ms.saturating_sub(self.last_refill_ms) as f64 / 1000.0;
        let tokens_to_add = elapsed_secs * policy.refill_rate();
        self.tokens = policy.capacity().min(self.tokens + tokens_to_add);
        self.last_refill_ms = self.last_refill_ms.max(now_ms);
    }

    /// Refill, then take one token if one is available.
    pub fn check(&mut self, policy: &Policy, now_ms: u64) -> Decision {
        self.refill(policy, now_ms);

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            let secs_until_full = ((policy.capacity() - self.tokens) / policy.refill_rate()).ceil();
            Decision {
                allowed: true,
                remaining: self.tokens.floor() as u64,
                reset_after: Duration::from_secs(secs_until_full as u64),
            }
        } else {
            let secs_until_next = (1.0 - self.tokens) / policy.refill_rate();
            Decision {
                allowed: false,
                remaining: 0,
                reset_after: Duration::from_millis((secs_until_next * 1000.0).ceil() as u64),
            }
        }
    }

    /// Whether the bucket has gone untouched since before `cutoff_ms`.
    pub fn idle_since(&self, cutoff_ms: u64) -> bool {
        self.last_refill_ms < cutoff_ms
    }
}
