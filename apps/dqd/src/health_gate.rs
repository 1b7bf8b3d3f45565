//! Start-up gate: wait for a dependency to report healthy before any pipe
//! starts consuming.

use core_config::health_gate::HealthGateConfig;
use eyre::{Result, WrapErr, eyre};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Poll the configured endpoint until it answers with a success status.
///
/// Returns immediately when no endpoint is configured, and with `Ok` when
/// `cancel` fires first; callers check the token before starting work.
pub async fn wait_for_health(config: &HealthGateConfig, cancel: &CancellationToken) -> Result<()> {
    let Some(endpoint) = config.endpoint.as_deref() else {
        return Ok(());
    };

    let client = reqwest::Client::builder()
        .timeout(config.timeout)
        .build()
        .wrap_err("Failed to build health gate client")?;

    info!(endpoint = %endpoint, "Waiting for health endpoint");
    for attempt in 1..=config.retries {
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return stopped(endpoint),
            response = client.get(endpoint).send() => response,
        };
        match response {
            Ok(response) if response.status().is_success() => {
                info!(endpoint = %endpoint, attempt, "Health endpoint is ready");
                return Ok(());
            }
            Ok(response) => {
                debug!(endpoint = %endpoint, attempt, status = response.status().as_u16(), "Not ready yet");
            }
            Err(e) => {
                debug!(endpoint = %endpoint, attempt, error = %e, "Not ready yet");
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => return stopped(endpoint),
            _ = tokio::time::sleep(config.interval) => {}
        }
    }

    Err(eyre!(
        "{} did not become healthy after {} attempts",
        endpoint,
        config.retries
    ))
}

fn stopped(endpoint: &str) -> Result<()> {
    info!(endpoint = %endpoint, "Shutdown requested while waiting for health endpoint");
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use axum::Router;
    use axum::http::StatusCode;
    use axum::routing::get;

    use super::*;

    fn gate(endpoint: String, retries: u32) -> HealthGateConfig {
        HealthGateConfig {
            retries,
            interval: Duration::from_millis(10),
            timeout: Duration::from_secs(1),
            ..HealthGateConfig::new(endpoint)
        }
    }

    /// Serves 503 for the first `failures` requests, then 200.
    async fn flaky_server(failures: usize) -> (String, Arc<AtomicUsize>) {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let app = Router::new().route(
            "/health",
            get(move || {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < failures {
                        StatusCode::SERVICE_UNAVAILABLE
                    } else {
                        StatusCode::OK
                    }
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{}/health", addr), hits)
    }

    #[tokio::test]
    async fn test_disabled_gate_passes() {
        let cancel = CancellationToken::new();
        assert!(wait_for_health(&HealthGateConfig::default(), &cancel).await.is_ok());
    }

    #[tokio::test]
    async fn test_waits_until_healthy() {
        let (endpoint, hits) = flaky_server(2).await;
        let cancel = CancellationToken::new();

        wait_for_health(&gate(endpoint, 5), &cancel).await.unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_retries() {
        let (endpoint, hits) = flaky_server(usize::MAX).await;
        let cancel = CancellationToken::new();

        let err = wait_for_health(&gate(endpoint, 3), &cancel).await.unwrap_err();
        assert!(err.to_string().contains("after 3 attempts"));
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_cancel_stops_waiting_cleanly() {
        let (endpoint, hits) = flaky_server(usize::MAX).await;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = wait_for_health(&gate(endpoint, 100), &cancel).await;
        assert!(result.is_ok());
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cancel_during_retries() {
        let (endpoint, hits) = flaky_server(usize::MAX).await;
        let cancel = CancellationToken::new();
        let config = HealthGateConfig {
            interval: Duration::from_secs(60),
            ..gate(endpoint, 100)
        };

        let waiting = tokio::spawn({
            let cancel = cancel.clone();
            async move { wait_for_health(&config, &cancel).await }
        });
        while hits.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        cancel.cancel();

        let result = tokio::time::timeout(Duration::from_secs(1), waiting)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
    }
}
