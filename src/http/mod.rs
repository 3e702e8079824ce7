//! HTTP surface: admission middleware, request logging, routes and server.

mod middleware;
mod request_log;
mod routes;
mod server;

pub use middleware::{
    admission_control, RateLimitExceeded, ResponseSink, RATE_LIMIT_ERROR_CODE, RATE_LIMIT_MESSAGE,
};
pub use request_log::{request_tracing, RequestIds, CORRELATION_ID_HEADER, REQUEST_ID_HEADER};
pub use routes::{routes, ProbeStatus, ServiceInfo};
pub use server::HttpServer;
