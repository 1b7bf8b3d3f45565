//! Source, consumer and producer contracts
//!
//! A [`Source`] is a named queue endpoint. It hands out a [`Consumer`] for
//! reading messages and a [`Producer`] for writing them; both are created
//! through provider factories so that one provider configuration can serve
//! several workers.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::context::RequestContext;
use crate::error::SourceError;
use crate::health::HealthChecker;
use crate::message::{Message, RawMessage};

/// Reads messages from a queue and delivers them into a pipe.
#[async_trait]
pub trait Consumer: HealthChecker + Send + Sync {
    /// Consume until `cancel` fires or the provider fails.
    ///
    /// Every dequeued message is handed to `sink.deliver`. Returning `Ok(())`
    /// means the consumer stopped cleanly; the worker restarts it unless the
    /// pipe is shutting down.
    async fn iter(&self, cancel: CancellationToken, sink: MessageSink) -> Result<(), SourceError>;
}

/// Writes payloads to a queue.
#[async_trait]
pub trait Producer: HealthChecker + Send + Sync {
    async fn produce(&self, message: &RawMessage) -> Result<(), SourceError>;
}

/// Builds consumers for a named source.
#[async_trait]
pub trait ConsumerFactory: Send + Sync {
    async fn create_consumer(&self, source_name: &str) -> Result<Arc<dyn Consumer>, SourceError>;
}

/// Builds producers for a named source.
#[async_trait]
pub trait ProducerFactory: Send + Sync {
    async fn create_producer(&self, source_name: &str) -> Result<Arc<dyn Producer>, SourceError>;
}

/// A named queue endpoint.
#[derive(Clone)]
pub struct Source {
    name: String,
    consumers: Arc<dyn ConsumerFactory>,
    producers: Arc<dyn ProducerFactory>,
}

impl Source {
    pub fn new(
        name: impl Into<String>,
        consumers: Arc<dyn ConsumerFactory>,
        producers: Arc<dyn ProducerFactory>,
    ) -> Self {
        Self {
            name: name.into(),
            consumers,
            producers,
        }
    }

    /// Build a source from a provider that implements both factories.
    pub fn from_provider<P>(name: impl Into<String>, provider: P) -> Self
    where
        P: ConsumerFactory + ProducerFactory + 'static,
    {
        let provider = Arc::new(provider);
        Self::new(name, provider.clone(), provider)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn create_consumer(&self) -> Result<Arc<dyn Consumer>, SourceError> {
        self.consumers.create_consumer(&self.name).await
    }

    pub async fn create_producer(&self) -> Result<Arc<dyn Producer>, SourceError> {
        self.producers.create_producer(&self.name).await
    }
}

impl fmt::Debug for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Source").field("name", &self.name).finish()
    }
}

/// Delivery side of a pipe's intake channel, bound to one source.
#[derive(Clone)]
pub struct MessageSink {
    source: Arc<str>,
    cancel: CancellationToken,
    tx: mpsc::Sender<RequestContext>,
}

impl MessageSink {
    pub fn new(
        source: impl Into<Arc<str>>,
        cancel: CancellationToken,
        tx: mpsc::Sender<RequestContext>,
    ) -> Self {
        Self {
            source: source.into(),
            cancel,
            tx,
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Wrap `message` in a request context and hand it to the pipe.
    ///
    /// Waits while the intake channel is full. Returns `false` if the pipe
    /// was cancelled or has stopped receiving, in which case the message is
    /// dropped un-acknowledged and left to the provider's redelivery.
    pub async fn deliver(&self, message: Box<dyn Message>) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        let ctx = RequestContext::new(self.cancel.clone(), self.source.clone(), message);
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            sent = self.tx.send(ctx) => sent.is_ok(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::HandlerError;
    use crate::health::HealthStatus;

    struct NoopMessage;

    #[async_trait]
    impl Message for NoopMessage {
        fn id(&self) -> &str {
            "1-0"
        }
        fn data(&self) -> &str {
            "{}"
        }
        async fn complete(&self) -> Result<(), SourceError> {
            Ok(())
        }
        async fn abort(&self, _error: &HandlerError) -> bool {
            false
        }
    }

    struct NamedProvider;

    struct NamedConsumer;

    impl HealthChecker for NamedConsumer {
        fn health_status(&self) -> HealthStatus {
            HealthStatus::default()
        }
    }

    #[async_trait]
    impl Consumer for NamedConsumer {
        async fn iter(
            &self,
            _cancel: CancellationToken,
            _sink: MessageSink,
        ) -> Result<(), SourceError> {
            Ok(())
        }
    }

    #[async_trait]
    impl ConsumerFactory for NamedProvider {
        async fn create_consumer(
            &self,
            _source_name: &str,
        ) -> Result<Arc<dyn Consumer>, SourceError> {
            Ok(Arc::new(NamedConsumer))
        }
    }

    #[async_trait]
    impl ProducerFactory for NamedProvider {
        async fn create_producer(
            &self,
            source_name: &str,
        ) -> Result<Arc<dyn Producer>, SourceError> {
            Err(SourceError::unsupported(source_name, "producing"))
        }
    }

    #[tokio::test]
    async fn test_source_passes_its_name_to_factories() {
        let source = Source::from_provider("orders", NamedProvider);
        assert_eq!(source.name(), "orders");
        assert!(source.create_consumer().await.is_ok());

        let err = source.create_producer().await.err().unwrap();
        assert_eq!(err.to_string(), "source 'orders' does not support producing");
    }

    #[tokio::test]
    async fn test_deliver_wraps_message_in_context() {
        let (tx, mut rx) = mpsc::channel(1);
        let sink = MessageSink::new("orders", CancellationToken::new(), tx);

        assert!(sink.deliver(Box::new(NoopMessage)).await);

        let ctx = rx.recv().await.unwrap();
        assert_eq!(ctx.source(), "orders");
        assert_eq!(ctx.message().id(), "1-0");
    }

    #[tokio::test]
    async fn test_deliver_after_cancel_is_rejected() {
        let (tx, mut rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        let sink = MessageSink::new("orders", cancel.clone(), tx);

        cancel.cancel();
        assert!(!sink.deliver(Box::new(NoopMessage)).await);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_deliver_unblocks_on_cancel_when_full() {
        let (tx, _rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        let sink = MessageSink::new("orders", cancel.clone(), tx);

        assert!(sink.deliver(Box::new(NoopMessage)).await);

        let blocked = tokio::spawn({
            let sink = sink.clone();
            async move { sink.deliver(Box::new(NoopMessage)).await }
        });
        tokio::task::yield_now().await;
        cancel.cancel();

        assert!(!blocked.await.unwrap());
    }
}
