//! Tollgate - Token Bucket Rate Limiting
//!
//! This crate implements per-client token bucket rate limiting for HTTP
//! APIs. Each endpoint tier (general, auth, write, health-check) owns an
//! independent limiter whose buckets refill continuously and lazily on
//! access. The limiters can be embedded as axum middleware or run as a
//! standalone decision service.

pub mod config;
pub mod error;
pub mod http;
pub mod ratelimit;
