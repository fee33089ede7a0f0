//! Token bucket rate limiting engine.

mod bucket;
mod clock;
mod decision;
mod limiter;
mod policy;
mod sweeper;
mod tiers;

pub use bucket::Bucket;
pub use clock::{Clock, ManualClock, SystemClock};
pub use decision::{Decision, ResetUnits};
pub use limiter::RateLimiter;
pub use policy::{Policy, PolicyRule, PolicySet, Tier};
pub use sweeper::{spawn_sweeper, sweep};
pub use tiers::TieredLimiters;
