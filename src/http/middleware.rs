//! Admission control middleware for axum routers.

use axum::body::{Body, Bytes};
use axum::extract::{ConnectInfo, Request, State};
use axum::http::header::{CONTENT_TYPE, RETRY_AFTER};
use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;

use crate::ratelimit::{Decision, RateLimiter, RequestInfo};

/// Stable error code in the body of a rejected request.
pub const RATE_LIMIT_ERROR_CODE: &str = "rate_limit_exceeded";
/// Human-readable message in the body of a rejected request.
pub const RATE_LIMIT_MESSAGE: &str = "Too many requests. Please try again later.";

/// Write-only view of an outgoing response.
pub trait ResponseSink {
    /// Set the status code.
    fn set_status(&mut self, status: StatusCode);

    /// Set a header, replacing any existing value.
    fn set_header(&mut self, name: HeaderName, value: HeaderValue);

    /// Replace the body.
    fn write_body(&mut self, body: Bytes);
}

impl ResponseSink for Response {
    fn set_status(&mut self, status: StatusCode) {
        *self.status_mut() = status;
    }

    fn set_header(&mut self, name: HeaderName, value: HeaderValue) {
        self.headers_mut().insert(name, value);
    }

    fn write_body(&mut self, body: Bytes) {
        *self.body_mut() = Body::from(body);
    }
}

impl<B> RequestInfo for axum::http::Request<B> {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers().get(name).and_then(|v| v.to_str().ok())
    }

    fn path(&self) -> &str {
        self.uri().path()
    }

    fn peer_addr(&self) -> Option<String> {
        self.extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.to_string())
    }
}

/// Rejection produced when a client has used up its window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitExceeded {
    retry_after_secs: u64,
}

impl RateLimitExceeded {
    /// Create a rejection advising a wait of `retry_after_secs` (at least 1).
    pub fn new(retry_after_secs: u64) -> Self {
        Self {
            retry_after_secs: retry_after_secs.max(1),
        }
    }

    /// Seconds advertised in `Retry-After`.
    pub fn retry_after_secs(&self) -> u64 {
        self.retry_after_secs
    }

    /// Write the 429 status, headers and JSON body into `sink`.
    pub fn write_to<S: ResponseSink + ?Sized>(&self, sink: &mut S) {
        let body = json!({
            "error": RATE_LIMIT_ERROR_CODE,
            "message": RATE_LIMIT_MESSAGE,
        });

        sink.set_header(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        sink.set_header(RETRY_AFTER, HeaderValue::from(self.retry_after_secs));
        sink.set_status(StatusCode::TOO_MANY_REQUESTS);
        sink.write_body(Bytes::from(body.to_string()));
    }
}

impl IntoResponse for RateLimitExceeded {
    fn into_response(self) -> Response {
        let mut response = Response::default();
        self.write_to(&mut response);
        response
    }
}

/// Admission control for every request passing through the router.
///
/// Install with `axum::middleware::from_fn_with_state(limiter, admission_control)`.
/// Bypassed paths and admitted requests are forwarded unchanged; denied
/// requests never reach the inner handler.
pub async fn admission_control(
    State(limiter): State<Arc<RateLimiter>>,
    request: Request,
    next: Next,
) -> Response {
    match limiter.admit(&request) {
        Decision::Allowed => next.run(request).await,
        Decision::Denied { retry_after_secs } => {
            RateLimitExceeded::new(retry_after_secs).into_response()
        }
    }
}
