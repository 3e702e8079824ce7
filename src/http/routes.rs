//! Probe and application routes.

use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

/// Body returned by the liveness/readiness/health probes.
#[derive(Debug, Clone, Serialize)]
pub struct ProbeStatus {
    pub status: &'static str,
}

/// Body returned by the home route.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceInfo {
    pub name: &'static str,
    pub version: &'static str,
}

/// Routes served by the application, without any middleware.
pub fn routes() -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/livez", get(livez))
        .route("/readyz", get(readyz))
        .route("/", get(home))
}

async fn healthz() -> Json<ProbeStatus> {
    Json(ProbeStatus { status: "ok" })
}

async fn livez() -> Json<ProbeStatus> {
    Json(ProbeStatus { status: "alive" })
}

async fn readyz() -> Json<ProbeStatus> {
    Json(ProbeStatus { status: "ready" })
}

async fn home() -> Json<ServiceInfo> {
    Json(ServiceInfo {
        name: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    async fn get_json(path: &str) -> (StatusCode, serde_json::Value) {
        let request = Request::builder().uri(path).body(Body::empty()).unwrap();
        let response = routes().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_probe_routes() {
        for (path, expected) in [("/healthz", "ok"), ("/livez", "alive"), ("/readyz", "ready")] {
            let (status, body) = get_json(path).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body["status"], expected);
        }
    }

    #[tokio::test]
    async fn test_home_reports_version() {
        let (status, body) = get_json("/").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["name"], "turnstile");
        assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    }
}
