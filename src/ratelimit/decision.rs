//! The outcome of a single rate limit check.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Unit in which `resetTime` is reported to clients.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResetUnits {
    /// Whole seconds on both allowed and denied responses.
    #[default]
    Seconds,
    /// Seconds when allowed, milliseconds when denied. Matches the response
    /// shape of the API this limiter was first deployed in.
    Legacy,
}

/// Allow/deny decision plus remaining-quota metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    /// Whether the request may proceed
    pub allowed: bool,
    /// Whole tokens left in the bucket after this check
    pub remaining: u64,
    /// When allowed: time until the bucket is full again, rounded up to a
    /// whole second. When denied: time until the next token, rounded up to
    /// a whole millisecond.
    pub reset_after: Duration,
}

impl Decision {
    /// `reset_after` rounded up to whole seconds.
    pub fn reset_secs(&self) -> u64 {
        let secs = self.reset_after.as_secs();
        if self.reset_after.subsec_nanos() > 0 {
            secs + 1
        } else {
            secs
        }
    }

    /// `reset_after` in the legacy mixed units: seconds when allowed,
    /// milliseconds when denied.
    pub fn legacy_reset_time(&self) -> u64 {
        if self.allowed {
            self.reset_after.as_secs()
        } else {
            self.reset_after.as_millis() as u64
        }
    }

    /// The `resetTime` value to report in the given units.
    pub fn reset_time(&self, units: ResetUnits) -> u64 {
        match units {
            ResetUnits::Seconds => self.reset_secs(),
            ResetUnits::Legacy => self.legacy_reset_time(),
        }
    }
}
