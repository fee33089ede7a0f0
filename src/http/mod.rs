//! HTTP surfaces for the rate limiter.
//!
//! [`middleware`] enforces a tier in front of an axum application's own
//! routes. [`HttpServer`] runs the standalone decision service for callers
//! that cannot embed the limiter in-process.

pub mod handlers;
pub mod middleware;
pub mod models;
mod server;

pub use handlers::AppState;
pub use middleware::{client_key, enforce, RateLimitGuard};
pub use server::HttpServer;
