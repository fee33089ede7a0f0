//! Request and response bodies.

use serde::{Deserialize, Serialize};

use crate::ratelimit::Tier;

/// Body of a `429 Too Many Requests` response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitedBody {
    pub error: String,
    pub retry_after: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}

/// Ask for a decision on behalf of a client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckRequest {
    pub tier: Tier,
    pub key: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckResponse {
    pub allowed: bool,
    /// The tier's capacity
    pub limit: f64,
    pub tokens_remaining: u64,
    pub reset_time: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TierStats {
    pub tier: Tier,
    pub capacity: f64,
    pub refill_rate: f64,
    pub buckets: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsResponse {
    pub tiers: Vec<TierStats>,
}
