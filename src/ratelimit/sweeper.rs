//! Background eviction of idle buckets.
//!
//! A bucket left alone for a full refill window is back at capacity, which
//! is exactly the state a brand-new bucket starts in. Dropping it therefore
//! never changes a decision and keeps the stores from growing with every
//! client ever seen.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::tiers::TieredLimiters;

/// Evict, in every tier, buckets idle for more than `idle_windows` of that
/// tier's refill windows. Returns the total number removed.
pub fn sweep(limiters: &TieredLimiters, idle_windows: u32) -> usize {
    limiters
        .iter()
        .map(|(tier, limiter)| {
            let max_idle = limiter
                .policy()
                .refill_window()
                .checked_mul(idle_windows)
                .unwrap_or(Duration::MAX);
            let removed = limiter.evict_idle(max_idle);
            if removed > 0 {
                debug!(
                    tier = %tier,
                    removed,
                    remaining = limiter.bucket_count(),
                    "Evicted idle buckets"
                );
            }
            removed
        })
        .sum()
}

/// Spawn a task that calls [`sweep`] every `interval`.
///
/// The task runs until the returned handle is aborted.
pub fn spawn_sweeper(
    limiters: Arc<TieredLimiters>,
    interval: Duration,
    idle_windows: u32,
) -> JoinHandle<()> {
    info!(
        interval_secs = interval.as_secs(),
        idle_windows, "Starting idle bucket sweeper"
    );

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;
            sweep(&limiters, idle_windows);
        }
    })
}
