//! Axum middleware enforcing one rate limit tier on a group of routes.
//!
//! ```ignore
//! let guard = RateLimitGuard::for_tier(&limiters, Tier::Auth);
//! let app = Router::new()
//!     .route("/auth/login", post(login))
//!     .route_layer(axum::middleware::from_fn_with_state(guard, enforce));
//! ```

use axum::extract::{ConnectInfo, Request, State};
use axum::http::header::HeaderName;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::warn;

use super::models::RateLimitedBody;
use crate::ratelimit::{Decision, RateLimiter, ResetUnits, Tier, TieredLimiters};

/// Key shared by every client whose address cannot be resolved.
pub const UNKNOWN_CLIENT: &str = "unknown";

pub static RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("ratelimit-limit");
pub static RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("ratelimit-remaining");
pub static RATELIMIT_RESET: HeaderName = HeaderName::from_static("ratelimit-reset");

/// Middleware state: the limiter for one tier plus how to report on it.
#[derive(Clone)]
pub struct RateLimitGuard {
    tier: Tier,
    limiter: Arc<RateLimiter>,
    message: Arc<str>,
    reset_units: ResetUnits,
    trust_forwarded_for: bool,
}

impl RateLimitGuard {
    /// Guard a tier with an explicit limiter and denial message.
    pub fn new(tier: Tier, limiter: Arc<RateLimiter>, message: impl Into<Arc<str>>) -> Self {
        Self {
            tier,
            limiter,
            message: message.into(),
            reset_units: ResetUnits::default(),
            trust_forwarded_for: false,
        }
    }

    /// Guard a tier using the shared tier limiters.
    pub fn for_tier(limiters: &TieredLimiters, tier: Tier) -> Self {
        Self::new(tier, limiters.get(tier).clone(), limiters.message(tier))
    }

    /// Report `resetTime` in these units.
    pub fn reset_units(mut self, units: ResetUnits) -> Self {
        self.reset_units = units;
        self
    }

    /// Key clients by `X-Forwarded-For` when present.
    pub fn trust_forwarded_for(mut self, trust: bool) -> Self {
        self.trust_forwarded_for = trust;
        self
    }
}

/// Resolve the rate limit key for a request: the forwarded client address
/// when trusted, else the socket peer, else [`UNKNOWN_CLIENT`].
pub fn client_key<B>(req: &axum::http::Request<B>, trust_forwarded_for: bool) -> String {
    if trust_forwarded_for {
        let forwarded = req
            .headers()
            .get("x-forwarded-for")
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(',').next())
            .map(str::trim)
            .filter(|ip| !ip.is_empty());

        if let Some(ip) = forwarded {
            return ip.to_string();
        }
    }

    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| UNKNOWN_CLIENT.to_string())
}

/// Check the request against the guard's tier before running the handler.
///
/// Denied requests get a 429 with `{"error", "retryAfter"}`; admitted ones
/// get `RateLimit-*` headers on the handler's response.
pub async fn enforce(State(guard): State<RateLimitGuard>, req: Request, next: Next) -> Response {
    let key = client_key(&req, guard.trust_forwarded_for);
    let decision = guard.limiter.check(&key);
    let reset_time = decision.reset_time(guard.reset_units);

    if !decision.allowed {
        warn!(
            tier = %guard.tier,
            key = %key,
            retry_after = reset_time,
            "Rejecting rate limited request"
        );
        let body = RateLimitedBody {
            error: guard.message.to_string(),
            retry_after: reset_time,
        };
        return (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
    }

    let mut response = next.run(req).await;
    insert_headers(
        response.headers_mut(),
        guard.limiter.policy().capacity(),
        &decision,
        reset_time,
    );
    response
}

fn insert_headers(headers: &mut HeaderMap, capacity: f64, decision: &Decision, reset_time: u64) {
    let now_secs = chrono::Utc::now().timestamp().max(0) as u64;

    if let Ok(limit) = HeaderValue::from_str(&capacity.to_string()) {
        headers.insert(RATELIMIT_LIMIT.clone(), limit);
    }
    headers.insert(RATELIMIT_REMAINING.clone(), HeaderValue::from(decision.remaining));
    headers.insert(
        RATELIMIT_RESET.clone(),
        HeaderValue::from(now_secs.saturating_add(reset_time)),
    );
}
