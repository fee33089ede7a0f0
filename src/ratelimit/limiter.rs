//! Core rate limiter implementation.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

use super::bucket::Bucket;
use super::clock::{Clock, SystemClock};
use super::decision::Decision;
use super::policy::Policy;

/// Per-client token bucket rate limiter for one policy.
///
/// This struct is thread-safe and can be shared across multiple tasks.
/// All checks for a given key are serialized on that key's map entry, so
/// concurrent requests can never consume more tokens than the bucket holds.
pub struct RateLimiter {
    /// The policy every bucket in this limiter follows
    policy: Policy,
    /// Buckets indexed by client key
    buckets: DashMap<String, Bucket>,
    /// Time source for refill computations
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    /// Create a new rate limiter reading the system clock.
    pub fn new(policy: Policy) -> Self {
        Self::with_clock(policy, Arc::new(SystemClock))
    }

    /// Create a new rate limiter with an explicit clock.
    pub fn with_clock(policy: Policy, clock: Arc<dyn Clock>) -> Self {
        Self {
            policy,
            buckets: DashMap::new(),
            clock,
        }
    }

    /// The policy this limiter enforces.
    pub fn policy(&self) -> Policy {
        self.policy
    }

    /// Check the rate limit for a client and consume a token if allowed.
    ///
    /// Never fails: an unseen key gets a full bucket. An empty key is a
    /// valid key shared by every caller that passes it.
    pub fn check(&self, client_key: &str) -> Decision {
        // The clock is read while holding the entry guard so that checks on
        // one key observe non-decreasing timestamps.
        let decision = match self.buckets.get_mut(client_key) {
            Some(mut bucket) => bucket.check(&self.policy, self.clock.now_millis()),
            None => {
                let mut bucket = self
                    .buckets
                    .entry(client_key.to_string())
                    .or_insert_with(|| {
                        debug!(
                            key = %client_key,
                            capacity = self.policy.capacity(),
                            refill_rate = self.policy.refill_rate(),
                            "Creating new token bucket"
                        );
                        Bucket::full(&self.policy, self.clock.now_millis())
                    });
                let now = self.clock.now_millis();
                bucket.check(&self.policy, now)
            }
        };

        trace!(
            key = %client_key,
            allowed = decision.allowed,
            remaining = decision.remaining,
            "Checked rate limit"
        );

        if !decision.allowed {
            debug!(
                key = %client_key,
                retry_after_ms = decision.reset_after.as_millis() as u64,
                "Rate limit exceeded"
            );
        }

        decision
    }

    /// Forget a client's bucket so its next check starts full.
    pub fn reset(&self, client_key: &str) {
        if self.buckets.remove(client_key).is_some() {
            debug!(key = %client_key, "Reset token bucket");
        }
    }

    /// Remove buckets that have not been checked for longer than `max_idle`.
    ///
    /// Returns the number of buckets removed.
    pub fn evict_idle(&self, max_idle: Duration) -> usize {
        let now = self.clock.now_millis();
        let cutoff = now.saturating_sub(max_idle.as_millis().min(u64::MAX as u128) as u64);

        let before = self.buckets.len();
        self.buckets.retain(|_, bucket| !bucket.idle_since(cutoff));
        before.saturating_sub(self.buckets.len())
    }

    /// Stored token count for a client, without refilling.
    pub fn tokens(&self, client_key: &str) -> Option<f64> {
        self.buckets.get(client_key).map(|b| b.tokens())
    }

    /// Clear all buckets.
    pub fn clear(&self) {
        self.buckets.clear();
    }

    /// Get the number of tracked clients.
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::clock::ManualClock;
    use std::sync::atomic::{AtomicU64, Ordering};

    fn limiter_with_clock(policy: Policy) -> (RateLimiter, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let limiter = RateLimiter::with_clock(policy, clock.clone());
        (limiter, clock)
    }

    #[test]
    fn test_rate_limiter_creation() {
        let limiter = RateLimiter::new(Policy::general());
        assert_eq!(limiter.bucket_count(), 0);
        assert_eq!(limiter.policy(), Policy::general());
    }

    #[test]
    fn test_check_creates_full_bucket() {
        let (limiter, _clock) = limiter_with_clock(Policy::new(10.0, 1.0));

        let decision = limiter.check("10.0.0.1");

        assert!(decision.allowed);
        assert_eq!(decision.remaining, 9);
        assert_eq!(limiter.bucket_count(), 1);
        assert_eq!(limiter.tokens("10.0.0.1"), Some(9.0));
    }

    #[test]
    fn test_fresh_bucket_admits_capacity_then_denies() {
        let (limiter, _clock) = limiter_with_clock(Policy::write());

        for i in 0..20 {
            assert!(limiter.check("client").allowed, "request {} should pass", i);
        }
        assert!(!limiter.check("client").allowed);
    }

    #[test]
    fn test_fractional_capacity_admits_floor() {
        let (limiter, _clock) = limiter_with_clock(Policy::new(2.5, 1.0));

        assert!(limiter.check("client").allowed);
        assert!(limiter.check("client").allowed);
        let decision = limiter.check("client");
        assert!(!decision.allowed);
        assert_eq!(decision.remaining, 0);
    }

    #[test]
    fn test_auth_policy_scenario() {
        let (limiter, _clock) = limiter_with_clock(Policy::auth());

        for expected in [4, 3, 2, 1, 0] {
            let decision = limiter.check("1.2.3.4");
            assert!(decision.allowed);
            assert_eq!(decision.remaining, expected);
        }

        let denied = limiter.check("1.2.3.4");
        assert!(!denied.allowed);
        assert_eq!(denied.remaining, 0);
        assert_eq!(denied.legacy_reset_time(), 180_000);
        assert_eq!(denied.reset_secs(), 180);
    }

    #[test]
    fn test_general_policy_half_window_refill() {
        let (limiter, clock) = limiter_with_clock(Policy::general());

        for _ in 0..100 {
            assert!(limiter.check("client").allowed);
        }
        assert_eq!(limiter.tokens("client"), Some(0.0));

        clock.advance(Duration::from_secs(450));
        let decision = limiter.check("client");
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 49);
    }

    #[test]
    fn test_refill_after_one_token_interval() {
        let (limiter, clock) = limiter_with_clock(Policy::write());

        for _ in 0..20 {
            limiter.check("client");
        }
        assert!(!limiter.check("client").allowed);

        // One token accrues every 3 seconds at 20 per minute
        clock.advance(Duration::from_secs(3));
        let decision = limiter.check("client");
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 0);
        assert!(!limiter.check("client").allowed);
    }

    #[test]
    fn test_long_idle_is_clamped_to_capacity() {
        let (limiter, clock) = limiter_with_clock(Policy::new(5.0, 1.0));

        for _ in 0..5 {
            limiter.check("client");
        }
        clock.advance(Duration::from_secs(86_400 * 30));

        let admitted = (0..10).filter(|_| limiter.check("client").allowed).count();
        assert_eq!(admitted, 5);
    }

    #[test]
    fn test_tokens_stay_within_bounds() {
        let policy = Policy::new(7.0, 0.75);
        let (limiter, clock) = limiter_with_clock(policy);

        for step in 0..500u64 {
            limiter.check("client");
            let tokens = limiter.tokens("client").unwrap();
            assert!(tokens >= 0.0, "tokens went negative: {}", tokens);
            assert!(tokens <= policy.capacity(), "tokens over capacity: {}", tokens);
            clock.advance(Duration::from_millis((step * 37) % 2_000));
        }
    }

    #[test]
    fn test_different_keys_are_independent() {
        let (limiter, _clock) = limiter_with_clock(Policy::new(2.0, 1.0));

        assert!(limiter.check("a").allowed);
        assert!(limiter.check("a").allowed);
        assert!(!limiter.check("a").allowed);

        let decision = limiter.check("b");
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 1);
        assert_eq!(limiter.tokens("a"), Some(0.0));
    }

    #[test]
    fn test_reset_restores_full_bucket() {
        let (limiter, _clock) = limiter_with_clock(Policy::auth());
        let fresh = RateLimiter::with_clock(Policy::auth(), Arc::new(ManualClock::new(0)));

        for _ in 0..6 {
            limiter.check("1.2.3.4");
        }
        limiter.reset("1.2.3.4");
        assert_eq!(limiter.bucket_count(), 0);

        assert_eq!(limiter.check("1.2.3.4"), fresh.check("1.2.3.4"));
    }

    #[test]
    fn test_reset_unknown_key_is_noop() {
        let (limiter, _clock) = limiter_with_clock(Policy::auth());
        limiter.check("known");
        limiter.reset("unknown");
        assert_eq!(limiter.bucket_count(), 1);
    }

    #[test]
    fn test_empty_key_is_a_shared_bucket() {
        let (limiter, _clock) = limiter_with_clock(Policy::new(1.0, 0.1));
        assert!(limiter.check("").allowed);
        assert!(!limiter.check("").allowed);
    }

    #[test]
    fn test_evict_idle() {
        let (limiter, clock) = limiter_with_clock(Policy::new(5.0, 1.0));

        limiter.check("old");
        clock.advance(Duration::from_secs(30));
        limiter.check("recent");
        clock.advance(Duration::from_secs(5));

        let removed = limiter.evict_idle(Duration::from_secs(10));
        assert_eq!(removed, 1);
        assert_eq!(limiter.tokens("old"), None);
        assert!(limiter.tokens("recent").is_some());
    }

    #[test]
    fn test_clear_buckets() {
        let (limiter, _clock) = limiter_with_clock(Policy::general());
        limiter.check("a");
        limiter.check("b");
        assert_eq!(limiter.bucket_count(), 2);

        limiter.clear();
        assert_eq!(limiter.bucket_count(), 0);
    }

    #[test]
    fn test_concurrent_checks_never_over_admit() {
        let (limiter, _clock) = limiter_with_clock(Policy::new(50.0, 1.0));

        let admitted: usize = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    scope.spawn(|| (0..100).filter(|_| limiter.check("shared").allowed).count())
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).sum()
        });

        assert_eq!(admitted, 50);
        assert_eq!(limiter.tokens("shared"), Some(0.0));
    }

    /// Advances by a fixed step on every read.
    struct SteppingClock {
        millis: AtomicU64,
        step: u64,
    }

    impl Clock for SteppingClock {
        fn now_millis(&self) -> u64 {
            self.millis.fetch_add(self.step, Ordering::SeqCst)
        }
    }

    #[test]
    fn test_concurrent_checks_with_advancing_clock_stay_within_refill() {
        let clock = Arc::new(SteppingClock {
            millis: AtomicU64::new(0),
            step: 1,
        });
        let policy = Policy::new(5.0, 5.0);
        let limiter = RateLimiter::with_clock(policy, clock.clone());

        let admitted: usize = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    scope.spawn(|| (0..1_000).filter(|_| limiter.check("shared").allowed).count())
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).sum()
        });

        let elapsed_secs = clock.now_millis() as f64 / 1000.0;
        let bound = policy.capacity() + elapsed_secs * policy.refill_rate();
        assert!(
            admitted as f64 <= bound,
            "admitted {} with at most {} tokens available",
            admitted,
            bound
        );
        let tokens = limiter.tokens("shared").unwrap();
        assert!((0.0..=policy.capacity()).contains(&tokens));
    }

    #[test]
    fn test_late_stale_check_does_not_refund_elapsed_time() {
        let clock = Arc::new(ManualClock::new(0));
        let limiter = RateLimiter::with_clock(Policy::new(5.0, 5.0), clock.clone());
        for _ in 0..5 {
            assert!(limiter.check("client").allowed);
        }

        // A check carrying an older timestamp lands between two at t=2s
        clock.set(2_000);
        let mut admitted = limiter.check("client").allowed as usize;
        clock.set(1_000);
        admitted += limiter.check("client").allowed as usize;
        clock.set(2_000);
        admitted += limiter.check("client").allowed as usize;

        assert_eq!(admitted, 2);
    }

    #[test]
    fn test_concurrent_first_checks_create_one_bucket() {
        let (limiter, _clock) = limiter_with_clock(Policy::new(4.0, 1.0));

        let admitted: usize = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..16)
                .map(|_| scope.spawn(|| limiter.check("new-client").allowed as usize))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).sum()
        });

        assert_eq!(admitted, 4);
        assert_eq!(limiter.bucket_count(), 1);
    }
}
