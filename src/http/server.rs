//! HTTP server for the rate limit decision service.

use axum::routing::{delete, get, post};
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use super::handlers::{self, AppState};
use super::middleware::{enforce, RateLimitGuard};
use crate::error::{Result, TollgateError};
use crate::ratelimit::{ResetUnits, Tier, TieredLimiters};

/// HTTP server exposing the tier limiters.
pub struct HttpServer {
    /// Address to bind to
    addr: SocketAddr,
    /// One limiter per tier
    limiters: Arc<TieredLimiters>,
    reset_units: ResetUnits,
    trust_forwarded_for: bool,
}

impl HttpServer {
    /// Create a new server.
    pub fn new(addr: SocketAddr, limiters: Arc<TieredLimiters>) -> Self {
        Self {
            addr,
            limiters,
            reset_units: ResetUnits::default(),
            trust_forwarded_for: false,
        }
    }

    /// Report `resetTime` in these units.
    pub fn reset_units(mut self, units: ResetUnits) -> Self {
        self.reset_units = units;
        self
    }

    /// Key health-check clients by `X-Forwarded-For` when present.
    pub fn trust_forwarded_for(mut self, trust: bool) -> Self {
        self.trust_forwarded_for = trust;
        self
    }

    /// Build the router.
    ///
    /// `/health` is throttled by the health-check tier; the `/v1` routes are
    /// the decision API and are not throttled themselves.
    pub fn router(&self) -> Router {
        let health_guard = RateLimitGuard::for_tier(&self.limiters, Tier::HealthCheck)
            .reset_units(self.reset_units)
            .trust_forwarded_for(self.trust_forwarded_for);

        let state = AppState {
            limiters: self.limiters.clone(),
            reset_units: self.reset_units,
        };

        Router::new()
            .route("/health", get(handlers::health))
            .route_layer(axum::middleware::from_fn_with_state(health_guard, enforce))
            .route("/v1/check", post(handlers::check))
            .route("/v1/buckets/:tier/:key", delete(handlers::reset_bucket))
            .route("/v1/stats", get(handlers::stats))
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }

    /// Start the server with graceful shutdown.
    ///
    /// The server will shut down when the provided signal resolves.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let app = self.router();
        let listener = tokio::net::TcpListener::bind(self.addr).await?;

        info!(
            addr = %listener.local_addr()?,
            "Starting HTTP server for rate limit decisions"
        );

        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(signal)
        .await
        .map_err(|e| {
            error!(error = %e, "HTTP server failed");
            TollgateError::Io(e)
        })
    }
}
