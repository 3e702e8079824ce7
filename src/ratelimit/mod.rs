//! Sliding window rate limiting and per-client state management.

mod client;
mod counter;
mod limiter;
mod registry;
mod sweeper;

pub use client::{
    identify, ClientKey, RequestInfo, FORWARDED_FOR_HEADER, REAL_IP_HEADER, UNKNOWN_CLIENT,
};
pub use counter::{Decision, SlidingWindowCounter, WindowLimit};
pub use limiter::{RateLimiter, DEFAULT_BYPASS_PATHS};
pub use registry::LimiterRegistry;
pub use sweeper::EvictionSweeper;
