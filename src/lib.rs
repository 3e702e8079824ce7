//! Turnstile - Sliding Window Admission Control
//!
//! This crate implements per-client request admission control for HTTP
//! services. Each client gets a sliding window of recent request timestamps;
//! requests beyond the configured quota are answered with `429 Too Many
//! Requests` and a `Retry-After` hint, and idle clients are evicted by a
//! background sweep.

pub mod config;
pub mod error;
pub mod http;
pub mod ratelimit;
