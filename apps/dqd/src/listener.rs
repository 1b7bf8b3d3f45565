//! HTTP listener: `POST /{source}` writes the request body to that source.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use eyre::{Result, WrapErr};
use pipe_worker::{Producer, RawMessage, Source};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// One route per source whose producer can be created.
///
/// Sources that cannot produce (or whose producer fails to start) are
/// skipped with a warning.
pub async fn router(sources: &BTreeMap<String, Arc<Source>>) -> Router {
    let mut router = Router::new();
    for (name, source) in sources {
        match source.create_producer().await {
            Ok(producer) => {
                info!(source = %name, "Adding source route");
                router = router.route(&format!("/{}", name), post(produce).with_state(producer));
            }
            Err(e) => {
                warn!(source = %name, error = %e, "Skipping source without producer");
            }
        }
    }
    router
}

async fn produce(State(producer): State<Arc<dyn Producer>>, body: Body) -> StatusCode {
    let bytes = match to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(error = %e, "Failed to read request body");
            return StatusCode::INTERNAL_SERVER_ERROR;
        }
    };

    let message = RawMessage::new(String::from_utf8_lossy(&bytes));
    match producer.produce(&message).await {
        Ok(()) => StatusCode::OK,
        Err(e) => {
            warn!(error = %e, "Error producing item");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

/// Serve the listener on `addr` until `cancel` fires.
pub async fn serve(addr: &str, router: Router, cancel: CancellationToken) -> Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .wrap_err_with(|| format!("Failed to bind listener to {}", addr))?;

    info!(addr = %addr, "HTTP listener listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await
        .wrap_err("HTTP listener failed")
}
