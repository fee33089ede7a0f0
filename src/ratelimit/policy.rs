//! Rate limit policies and the endpoint tiers they apply to.
//!
//! A [`Policy`] is the immutable `(capacity, refill_rate)` pair a limiter
//! runs with. [`PolicySet`] is its serialized form, one [`PolicyRule`] per
//! [`Tier`], loadable from YAML with every tier defaulting to the preset
//! the API ships with.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Result, TollgateError};

/// Capacity and refill rate of a token bucket.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Policy {
    capacity: f64,
    refill_rate: f64,
}

impl Policy {
    /// Create a policy from a burst capacity and a refill rate in tokens/sec.
    pub const fn new(capacity: f64, refill_rate: f64) -> Self {
        Self {
            capacity,
            refill_rate,
        }
    }

    /// Create a policy that admits `capacity` requests per `window`.
    pub fn per_window(capacity: f64, window: Duration) -> Self {
        Self::new(capacity, capacity / window.as_secs_f64())
    }

    /// Maximum tokens a bucket can hold.
    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    /// Tokens added per second.
    pub fn refill_rate(&self) -> f64 {
        self.refill_rate
    }

    /// Time for an empty bucket to fill back up to capacity.
    pub fn refill_window(&self) -> Duration {
        Duration::try_from_secs_f64(self.capacity / self.refill_rate).unwrap_or(Duration::MAX)
    }

    /// 100 requests per 15 minutes.
    pub fn general() -> Self {
        Self::per_window(100.0, Duration::from_secs(900))
    }

    /// 5 requests per 15 minutes.
    pub fn auth() -> Self {
        Self::per_window(5.0, Duration::from_secs(900))
    }

    /// 20 requests per minute.
    pub fn write() -> Self {
        Self::per_window(20.0, Duration::from_secs(60))
    }

    /// 1000 requests per minute.
    pub fn health_check() -> Self {
        Self::per_window(1000.0, Duration::from_secs(60))
    }
}

/// Endpoint class a policy applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Tier {
    /// Every API route
    General,
    /// Login, registration and token refresh
    Auth,
    /// Mutating requests
    Write,
    /// Liveness probes
    #[serde(alias = "health_check")]
    HealthCheck,
}

impl Tier {
    /// All tiers, in a stable order.
    pub const ALL: [Tier; 4] = [Tier::General, Tier::Auth, Tier::Write, Tier::HealthCheck];

    /// Name used in configuration, URLs and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::General => "general",
            Tier::Auth => "auth",
            Tier::Write => "write",
            Tier::HealthCheck => "health-check",
        }
    }

    /// The preset policy for this tier.
    pub fn default_policy(&self) -> Policy {
        match self {
            Tier::General => Policy::general(),
            Tier::Auth => Policy::auth(),
            Tier::Write => Policy::write(),
            Tier::HealthCheck => Policy::health_check(),
        }
    }

    /// Message returned to clients that exceed this tier.
    pub fn default_message(&self) -> &'static str {
        match self {
            Tier::General => "Too many requests, please try again later.",
            Tier::Auth => "Too many authentication attempts, please try again later.",
            Tier::Write => "Too many write operations, please slow down.",
            Tier::HealthCheck => "Too many health check requests.",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = TollgateError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "general" => Ok(Tier::General),
            "auth" => Ok(Tier::Auth),
            "write" => Ok(Tier::Write),
            "health-check" | "health_check" => Ok(Tier::HealthCheck),
            other => Err(TollgateError::UnknownTier(other.to_string())),
        }
    }
}

/// Serialized form of a policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyRule {
    /// Burst allowance
    pub capacity: f64,
    /// Window over which `capacity` tokens are refilled
    pub window_secs: f64,
    /// Explicit refill rate in tokens/sec, overriding `capacity / window_secs`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refill_rate: Option<f64>,
    /// Error message for denied requests
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl PolicyRule {
    /// Rule admitting `capacity` requests per `window_secs`.
    pub fn new(capacity: f64, window_secs: f64) -> Self {
        Self {
            capacity,
            window_secs,
            refill_rate: None,
            message: None,
        }
    }

    /// Build the runtime policy.
    pub fn to_policy(&self) -> Policy {
        let refill_rate = self
            .refill_rate
            .unwrap_or(self.capacity / self.window_secs);
        Policy::new(self.capacity, refill_rate)
    }

    /// Reject rules that would leave a bucket unable to admit or refill.
    pub fn validate(&self, tier: Tier) -> Result<()> {
        if !(self.capacity.is_finite() && self.capacity >= 1.0) {
            return Err(TollgateError::Config(format!(
                "{tier}: capacity must be at least 1, got {}",
                self.capacity
            )));
        }
        if !(self.window_secs.is_finite() && self.window_secs > 0.0) {
            return Err(TollgateError::Config(format!(
                "{tier}: window_secs must be positive, got {}",
                self.window_secs
            )));
        }
        if let Some(rate) = self.refill_rate {
            if !(rate.is_finite() && rate > 0.0) {
                return Err(TollgateError::Config(format!(
                    "{tier}: refill_rate must be positive, got {rate}"
                )));
            }
        }
        Ok(())
    }
}

/// One rule per tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicySet {
    #[serde(default = "default_general")]
    pub general: PolicyRule,
    #[serde(default = "default_auth")]
    pub auth: PolicyRule,
    #[serde(default = "default_write")]
    pub write: PolicyRule,
    #[serde(default = "default_health_check", alias = "health-check")]
    pub health_check: PolicyRule,
}

fn default_general() -> PolicyRule {
    PolicyRule::new(100.0, 900.0)
}

fn default_auth() -> PolicyRule {
    PolicyRule::new(5.0, 900.0)
}

fn default_write() -> PolicyRule {
    PolicyRule::new(20.0, 60.0)
}

fn default_health_check() -> PolicyRule {
    PolicyRule::new(1000.0, 60.0)
}

impl Default for PolicySet {
    fn default() -> Self {
        Self {
            general: default_general(),
            auth: default_auth(),
            write: default_write(),
            health_check: default_health_check(),
        }
    }
}

impl PolicySet {
    /// Parse a policy set from YAML. Tiers left out keep their presets.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| TollgateError::Config(format!("Failed to parse policies: {}", e)))
    }

    /// The rule for a tier.
    pub fn get(&self, tier: Tier) -> &PolicyRule {
        match tier {
            Tier::General => &self.general,
            Tier::Auth => &self.auth,
            Tier::Write => &self.write,
            Tier::HealthCheck => &self.health_check,
        }
    }

    /// Validate every rule.
    pub fn validate(&self) -> Result<()> {
        Tier::ALL
            .iter()
            .try_for_each(|tier| self.get(*tier).validate(*tier))
    }
}
