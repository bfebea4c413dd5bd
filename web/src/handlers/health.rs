//! Health and metrics endpoints.
//!
//! Load balancers poll `GET /health`; Prometheus scrapes `GET /metrics`.

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use catalog_runtime::metrics::MetricsServer;
use std::sync::Arc;

/// Liveness check. Always `200 ok` while the process serves requests.
#[allow(clippy::unused_async)]
pub async fn health_check() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}

/// Prometheus text exposition, or 503 if no recorder is installed.
#[allow(clippy::unused_async)]
pub async fn render_metrics(State(metrics): State<Arc<MetricsServer>>) -> Response {
    match metrics.render() {
        Some(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        None => (StatusCode::SERVICE_UNAVAILABLE, "metrics recorder not installed").into_response(),
    }
}

/// `/health` and `/metrics`, ready to merge into a service router.
pub fn ops_router(metrics: Arc<MetricsServer>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(render_metrics))
        .with_state(metrics)
}
