//! Write-only provider that appends payloads to stdout or a file.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use pipe_worker::{
    Consumer, ConsumerFactory, HealthChecker, HealthState, HealthStatus, Producer,
    ProducerFactory, RawMessage, SourceError,
};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::debug;

use crate::config::model::IoConfig;

/// Where an io source writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IoTarget {
    Stdout,
    File(PathBuf),
}

#[derive(Debug, Clone)]
pub struct IoProvider {
    target: IoTarget,
}

impl IoProvider {
    pub fn new(config: &IoConfig) -> Self {
        let target = match &config.file {
            Some(file) if !file.is_empty() => IoTarget::File(PathBuf::from(file)),
            _ => IoTarget::Stdout,
        };
        Self { target }
    }

    pub fn stdout() -> Self {
        Self {
            target: IoTarget::Stdout,
        }
    }

    pub fn target(&self) -> &IoTarget {
        &self.target
    }
}

#[async_trait]
impl ConsumerFactory for IoProvider {
    async fn create_consumer(&self, source_name: &str) -> Result<Arc<dyn Consumer>, SourceError> {
        Err(SourceError::unsupported(source_name, "consuming"))
    }
}

#[async_trait]
impl ProducerFactory for IoProvider {
    async fn create_producer(&self, _source_name: &str) -> Result<Arc<dyn Producer>, SourceError> {
        let writer: Box<dyn AsyncWrite + Send + Unpin> = match &self.target {
            IoTarget::Stdout => Box::new(tokio::io::stdout()),
            IoTarget::File(path) => {
                let file = tokio::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .await
                    .map_err(SourceError::provider)?;
                Box::new(file)
            }
        };
        Ok(Arc::new(IoProducer {
            writer: Mutex::new(writer),
        }))
    }
}

/// Newline-terminated payload writer.
pub struct IoProducer {
    writer: Mutex<Box<dyn AsyncWrite + Send + Unpin>>,
}

impl HealthChecker for IoProducer {
    fn health_status(&self) -> HealthStatus {
        HealthStatus::single("io", HealthState::Healthy)
    }
}

#[async_trait]
impl Producer for IoProducer {
    async fn produce(&self, message: &RawMessage) -> Result<(), SourceError> {
        let mut writer = self.writer.lock().await;
        writer
            .write_all(message.data.as_bytes())
            .await
            .map_err(SourceError::provider)?;
        if !message.data.ends_with('\n') {
            writer.write_all(b"\n").await.map_err(SourceError::provider)?;
        }
        writer.flush().await.map_err(SourceError::provider)?;
        debug!(bytes = message.data.len(), "Wrote message");
        Ok(())
    }
}
