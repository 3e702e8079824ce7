//! Request identifiers and access logging.

use axum::extract::Request;
use axum::http::header::USER_AGENT;
use axum::http::{HeaderMap, HeaderValue};
use axum::middleware::Next;
use axum::response::Response;
use std::time::Instant;
use tracing::{debug, info, info_span, Instrument};
use uuid::Uuid;

use crate::ratelimit::RequestInfo;

/// Header carrying the caller's correlation identifier.
pub const CORRELATION_ID_HEADER: &str = "x-correlation-id";
/// Header carrying the per-request identifier.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Identifiers attached to a request, available to handlers as an extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestIds {
    pub correlation_id: String,
    pub request_id: String,
}

impl RequestIds {
    /// Reuse the identifiers sent by the caller, generating any that are
    /// missing, blank or `null`.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        Self {
            correlation_id: id_or_new(headers, CORRELATION_ID_HEADER),
            request_id: id_or_new(headers, REQUEST_ID_HEADER),
        }
    }

    fn write_to(&self, headers: &mut HeaderMap) {
        for (name, id) in [
            (CORRELATION_ID_HEADER, &self.correlation_id),
            (REQUEST_ID_HEADER, &self.request_id),
        ] {
            if let Ok(value) = HeaderValue::from_str(id) {
                headers.insert(name, value);
            }
        }
    }
}

fn id_or_new(headers: &HeaderMap, name: &str) -> String {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|id| !id.is_empty() && !id.eq_ignore_ascii_case("null"))
        .map_or_else(|| Uuid::new_v4().to_string(), str::to_owned)
}

/// Tag every request with correlation and request IDs and log its outcome.
///
/// The IDs are forwarded to inner layers in the request headers and as a
/// [`RequestIds`] extension, and echoed on the response. Everything logged
/// while the request is in flight belongs to an `http_request` span carrying
/// both IDs.
///
/// Install outermost with `axum::middleware::from_fn(request_tracing)` so
/// rejected requests are logged too.
pub async fn request_tracing(mut request: Request, next: Next) -> Response {
    let started = Instant::now();
    let ids = RequestIds::from_headers(request.headers());

    let method = request.method().clone();
    let path = request.uri().path().to_owned();
    let query = request.uri().query().unwrap_or_default().to_owned();
    let remote_addr = request.peer_addr().unwrap_or_default();
    let user_agent = request
        .header(USER_AGENT.as_str())
        .unwrap_or_default()
        .to_owned();

    ids.write_to(request.headers_mut());
    request.extensions_mut().insert(ids.clone());

    let span = info_span!(
        "http_request",
        method = %method,
        path = %path,
        correlation_id = %ids.correlation_id,
        request_id = %ids.request_id
    );
    span.in_scope(|| debug!("Request started"));

    let mut response = next.run(request).instrument(span.clone()).await;
    ids.write_to(response.headers_mut());

    let elapsed = started.elapsed();
    span.in_scope(|| {
        info!(
            query = %query,
            remote_addr = %remote_addr,
            user_agent = %user_agent,
            status = response.status().as_u16(),
            duration_ms = elapsed.as_millis() as u64,
            "HTTP request"
        )
    });

    response
}
