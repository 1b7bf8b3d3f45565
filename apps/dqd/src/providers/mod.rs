//! Queue providers a source can be backed by.

pub mod io;
pub mod redis_stream;

use std::sync::Arc;

use async_trait::async_trait;
use pipe_worker::{Consumer, ConsumerFactory, Producer, ProducerFactory, SourceError};

use crate::config::model::SourceConfig;
pub use io::{IoProvider, IoTarget};
pub use redis_stream::RedisStreamProvider;

/// Closed set of provider kinds, selected by a source's `type`.
#[derive(Debug)]
pub enum ProviderKind {
    RedisStream(RedisStreamProvider),
    Io(IoProvider),
}

impl ProviderKind {
    pub fn from_config(config: &SourceConfig) -> Result<Self, SourceError> {
        Ok(match config {
            SourceConfig::RedisStream(redis) => {
                ProviderKind::RedisStream(RedisStreamProvider::new(redis.clone())?)
            }
            SourceConfig::Io(io) => ProviderKind::Io(IoProvider::new(io)),
        })
    }

    /// Provider type as written in configuration.
    pub fn kind(&self) -> &'static str {
        match self {
            ProviderKind::RedisStream(_) => "redis-stream",
            ProviderKind::Io(_) => "io",
        }
    }
}

#[async_trait]
impl ConsumerFactory for ProviderKind {
    async fn create_consumer(&self, source_name: &str) -> Result<Arc<dyn Consumer>, SourceError> {
        match self {
            ProviderKind::RedisStream(p) => p.create_consumer(source_name).await,
            ProviderKind::Io(p) => p.create_consumer(source_name).await,
        }
    }
}

#[async_trait]
impl ProducerFactory for ProviderKind {
    async fn create_producer(&self, source_name: &str) -> Result<Arc<dyn Producer>, SourceError> {
        match self {
            ProviderKind::RedisStream(p) => p.create_producer(source_name).await,
            ProviderKind::Io(p) => p.create_producer(source_name).await,
        }
    }
}
