//! Decision service endpoints.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use std::sync::Arc;
use tracing::{debug, info, instrument};

use super::models::{CheckRequest, CheckResponse, HealthResponse, StatsResponse, TierStats};
use crate::ratelimit::{ResetUnits, Tier, TieredLimiters};

/// Shared state for the decision service routes.
#[derive(Clone)]
pub struct AppState {
    pub limiters: Arc<TieredLimiters>,
    pub reset_units: ResetUnits,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

/// Check a client against a tier on behalf of a remote caller.
///
/// Denials are reported in the body with a 200; the caller decides how to
/// reject its own request.
#[instrument(skip(state, request), fields(tier = %request.tier, key = %request.key))]
pub async fn check(
    State(state): State<AppState>,
    request: Json<CheckRequest>,
) -> Json<CheckResponse> {
    let Json(req) = request;
    let limiter = state.limiters.get(req.tier);
    let decision = limiter.check(&req.key);

    debug!(allowed = decision.allowed, remaining = decision.remaining, "Decision made");

    Json(CheckResponse {
        allowed: decision.allowed,
        limit: limiter.policy().capacity(),
        tokens_remaining: decision.remaining,
        reset_time: decision.reset_time(state.reset_units),
    })
}

/// Drop a client's bucket so its next request starts with a full quota.
pub async fn reset_bucket(
    State(state): State<AppState>,
    Path((tier, key)): Path<(Tier, String)>,
) -> StatusCode {
    info!(tier = %tier, key = %key, "Resetting rate limit bucket");
    state.limiters.get(tier).reset(&key);
    StatusCode::NO_CONTENT
}

pub async fn stats(State(state): State<AppState>) -> Json<StatsResponse> {
    let tiers = state
        .limiters
        .iter()
        .map(|(tier, limiter)| {
            let policy = limiter.policy();
            TierStats {
                tier,
                capacity: policy.capacity(),
                refill_rate: policy.refill_rate(),
                buckets: limiter.bucket_count(),
            }
        })
        .collect();

    Json(StatsResponse { tiers })
}
