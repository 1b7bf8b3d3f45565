//! Prometheus metrics for pipe workers

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;
use std::time::Duration;
use tracing::info;

use crate::error::PipeError;
use crate::handler::Severity;

static PROMETHEUS_HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

/// Install the Prometheus recorder.
///
/// Call this once at startup. Subsequent calls return the existing handle.
pub fn init_metrics() -> Result<&'static PrometheusHandle, PipeError> {
    PROMETHEUS_HANDLE.get_or_try_init(|| {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .map_err(|e| PipeError::Metrics(e.to_string()))?;
        info!("Prometheus metrics initialized");
        Ok(handle)
    })
}

/// Get the Prometheus handle for rendering metrics
pub fn prometheus_handle() -> Option<&'static PrometheusHandle> {
    PROMETHEUS_HANDLE.get()
}

/// Render metrics in Prometheus format
pub fn render_metrics() -> String {
    prometheus_handle().map(|h| h.render()).unwrap_or_default()
}

/// Pipe metrics helper
#[derive(Debug, Clone)]
pub struct PipeMetrics {
    pipe: String,
}

impl PipeMetrics {
    pub fn new(pipe: impl Into<String>) -> Self {
        Self { pipe: pipe.into() }
    }

    /// Current concurrency limit
    pub fn concurrency_limit(&self, limit: usize) {
        gauge!("worker_concurrent_max", "pipe" => self.pipe.clone()).set(limit as f64);
    }

    /// Messages processed in the last controller window
    pub fn window_size(&self, processed: u64) {
        gauge!("worker_concurrent_size", "pipe" => self.pipe.clone()).set(processed as f64);
    }

    pub fn in_flight(&self, in_flight: usize) {
        gauge!("worker_in_flight", "pipe" => self.pipe.clone()).set(in_flight as f64);
    }

    /// Time spent inside the handler
    pub fn handler_processed(&self, source: &str, success: bool, duration: Duration) {
        histogram!(
            "worker_handler_processing_seconds",
            "pipe" => self.pipe.clone(),
            "source" => source.to_string(),
            "success" => success.to_string()
        )
        .record(duration.as_secs_f64());
    }

    /// Time from dequeue to resolution
    pub fn pipe_processed(&self, source: &str, success: bool, duration: Duration) {
        histogram!(
            "worker_pipe_processing_seconds",
            "pipe" => self.pipe.clone(),
            "source" => source.to_string(),
            "success" => success.to_string()
        )
        .record(duration.as_secs_f64());
    }

    pub fn resolution(&self, source: &str, outcome: &str) {
        counter!(
            "worker_resolutions_total",
            "pipe" => self.pipe.clone(),
            "source" => source.to_string(),
            "outcome" => outcome.to_string()
        )
        .increment(1);
    }

    pub fn handler_error(&self, source: &str, severity: Severity) {
        counter!(
            "worker_handler_errors_total",
            "pipe" => self.pipe.clone(),
            "source" => source.to_string(),
            "severity" => severity.as_ref().to_string()
        )
        .increment(1);
    }
}
