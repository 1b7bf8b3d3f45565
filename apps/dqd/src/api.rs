//! Operational API: aggregated health and Prometheus metrics.

use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use eyre::{Result, WrapErr};
use pipe_worker::metrics::render_metrics;
use pipe_worker::{HealthChecker, HealthRegistry};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// `GET /health` and `GET /metrics`.
pub fn router(registry: HealthRegistry) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(registry)
}

/// Aggregated status of every registered pipe.
///
/// 200 when every component is healthy, 503 otherwise.
async fn health_handler(State(registry): State<HealthRegistry>) -> Response {
    let status = registry.health_status();
    let code = if status.is_healthy() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(status)).into_response()
}

async fn metrics_handler() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        render_metrics(),
    )
}

/// Serve the API on `0.0.0.0:port` until `cancel` fires.
pub async fn serve(port: u16, registry: HealthRegistry, cancel: CancellationToken) -> Result<()> {
    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr)
        .await
        .wrap_err_with(|| format!("Failed to bind API server to {}", addr))?;

    info!(port = %port, "Health and metrics server listening");

    axum::serve(listener, router(registry))
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await
        .wrap_err("API server failed")
}
