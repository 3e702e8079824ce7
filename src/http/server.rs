//! HTTP server implementation.

use axum::Router;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

use super::middleware::admission_control;
use super::request_log::request_tracing;
use super::routes::routes;
use crate::error::Result;
use crate::ratelimit::RateLimiter;

/// HTTP server fronted by admission control.
pub struct HttpServer {
    /// Address to bind to
    addr: SocketAddr,
    /// The rate limiter instance
    rate_limiter: Arc<RateLimiter>,
}

impl HttpServer {
    /// Create a new HTTP server.
    pub fn new(addr: SocketAddr, rate_limiter: Arc<RateLimiter>) -> Self {
        Self { addr, rate_limiter }
    }

    /// Build the application router with admission control applied to every route.
    ///
    /// Request tracing wraps admission control, so rejected requests are
    /// logged and carry correlation and request IDs as well.
    pub fn router(&self) -> Router {
        routes()
            .layer(axum::middleware::from_fn_with_state(
                Arc::clone(&self.rate_limiter),
                admission_control,
            ))
            .layer(axum::middleware::from_fn(request_tracing))
    }

    /// Bind and serve until `signal` resolves, then drain open connections.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.addr).await.map_err(|e| {
            error!(addr = %self.addr, error = %e, "Failed to bind HTTP listener");
            e
        })?;

        info!(
            addr = %listener.local_addr()?,
            "Starting HTTP server with graceful shutdown"
        );

        let app = self.router();
        axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
            .with_graceful_shutdown(signal)
            .await
            .map_err(|e| {
                error!(error = %e, "HTTP server failed");
                e.into()
            })
    }
}
