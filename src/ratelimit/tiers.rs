//! One independent limiter per endpoint tier.

use std::sync::Arc;

use super::clock::{Clock, SystemClock};
use super::limiter::RateLimiter;
use super::policy::{PolicySet, Tier};

/// The limiters the HTTP layer is wired with, one per [`Tier`].
///
/// Each tier owns its own bucket store, so a client throttled on auth
/// routes keeps its general quota.
pub struct TieredLimiters {
    general: Arc<RateLimiter>,
    auth: Arc<RateLimiter>,
    write: Arc<RateLimiter>,
    health_check: Arc<RateLimiter>,
    policies: PolicySet,
}

impl TieredLimiters {
    /// Build limiters for every tier from a policy set, reading the system clock.
    pub fn new(policies: PolicySet) -> Self {
        Self::with_clock(policies, Arc::new(SystemClock))
    }

    /// Build limiters sharing one clock.
    pub fn with_clock(policies: PolicySet, clock: Arc<dyn Clock>) -> Self {
        let build = |tier: Tier| {
            Arc::new(RateLimiter::with_clock(
                policies.get(tier).to_policy(),
                clock.clone(),
            ))
        };

        Self {
            general: build(Tier::General),
            auth: build(Tier::Auth),
            write: build(Tier::Write),
            health_check: build(Tier::HealthCheck),
            policies,
        }
    }

    /// The limiter for a tier.
    pub fn get(&self, tier: Tier) -> &Arc<RateLimiter> {
        match tier {
            Tier::General => &self.general,
            Tier::Auth => &self.auth,
            Tier::Write => &self.write,
            Tier::HealthCheck => &self.health_check,
        }
    }

    /// Message for clients denied by a tier, honouring configured overrides.
    pub fn message(&self, tier: Tier) -> &str {
        self.policies
            .get(tier)
            .message
            .as_deref()
            .unwrap_or_else(|| tier.default_message())
    }

    /// Iterate over every tier and its limiter.
    pub fn iter(&self) -> impl Iterator<Item = (Tier, &Arc<RateLimiter>)> {
        Tier::ALL.into_iter().map(move |tier| (tier, self.get(tier)))
    }
}

impl Default for TieredLimiters {
    fn default() -> Self {
        Self::new(PolicySet::default())
    }
}
