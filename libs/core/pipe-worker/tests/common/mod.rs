//! In-memory sources, messages and handlers for driving a worker end-to-end.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use pipe_worker::{
    Consumer, ConsumerFactory, Handler, HandlerError, HandlerResult, HealthChecker, HealthState,
    HealthStatus, Message, MessageSink, Producer, ProducerFactory, RawMessage, RequestContext,
    Source, SourceError,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Record of terminal actions taken on fake messages.
#[derive(Default)]
pub struct Ledger {
    completed: Mutex<Vec<String>>,
    aborted: Mutex<Vec<String>>,
}

impl Ledger {
    pub fn completed(&self) -> Vec<String> {
        self.completed.lock().unwrap().clone()
    }

    pub fn aborted(&self) -> Vec<String> {
        self.aborted.lock().unwrap().clone()
    }
}

pub struct FakeMessage {
    id: String,
    data: String,
    retry: bool,
    ledger: Arc<Ledger>,
}

impl FakeMessage {
    pub fn new(id: &str, data: &str, retry: bool, ledger: Arc<Ledger>) -> Self {
        Self {
            id: id.to_string(),
            data: data.to_string(),
            retry,
            ledger,
        }
    }
}

#[async_trait]
impl Message for FakeMessage {
    fn id(&self) -> &str {
        &self.id
    }

    fn data(&self) -> &str {
        &self.data
    }

    async fn complete(&self) -> Result<(), SourceError> {
        self.ledger.completed.lock().unwrap().push(self.id.clone());
        Ok(())
    }

    async fn abort(&self, _error: &HandlerError) -> bool {
        self.ledger.aborted.lock().unwrap().push(self.id.clone());
        self.retry
    }
}

/// Consumer fed from an in-memory channel. Idles until cancelled once the
/// channel is drained.
pub struct ChannelConsumer {
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<FakeMessage>>,
}

impl ChannelConsumer {
    pub fn new() -> (mpsc::UnboundedSender<FakeMessage>, Arc<Self>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            tx,
            Arc::new(Self {
                rx: tokio::sync::Mutex::new(rx),
            }),
        )
    }
}

impl HealthChecker for ChannelConsumer {
    fn health_status(&self) -> HealthStatus {
        HealthStatus::single("conn", HealthState::Healthy)
    }
}

#[async_trait]
impl Consumer for ChannelConsumer {
    async fn iter(&self, cancel: CancellationToken, sink: MessageSink) -> Result<(), SourceError> {
        let mut rx = self.rx.lock().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                message = rx.recv() => match message {
                    Some(message) => {
                        if !sink.deliver(Box::new(message)).await {
                            return Ok(());
                        }
                    }
                    None => {
                        cancel.cancelled().await;
                        return Ok(());
                    }
                },
            }
        }
    }
}

/// Consumer that fails after a delay.
pub struct FailingConsumer {
    pub after: Duration,
}

impl HealthChecker for FailingConsumer {
    fn health_status(&self) -> HealthStatus {
        HealthStatus::default()
    }
}

#[async_trait]
impl Consumer for FailingConsumer {
    async fn iter(&self, cancel: CancellationToken, _sink: MessageSink) -> Result<(), SourceError> {
        tokio::select! {
            _ = cancel.cancelled() => Ok(()),
            _ = tokio::time::sleep(self.after) => Err(SourceError::provider("connection reset")),
        }
    }
}

/// Producer that keeps everything it is given.
#[derive(Default)]
pub struct RecordingProducer {
    produced: Mutex<Vec<RawMessage>>,
}

impl RecordingProducer {
    pub fn produced(&self) -> Vec<RawMessage> {
        self.produced.lock().unwrap().clone()
    }
}

impl HealthChecker for RecordingProducer {
    fn health_status(&self) -> HealthStatus {
        HealthStatus::default()
    }
}

#[async_trait]
impl Producer for RecordingProducer {
    async fn produce(&self, message: &RawMessage) -> Result<(), SourceError> {
        self.produced.lock().unwrap().push(message.clone());
        Ok(())
    }
}

/// Provider handing out a fixed consumer and producer.
pub struct FakeProvider {
    pub consumer: Option<Arc<dyn Consumer>>,
    pub producer: Arc<RecordingProducer>,
}

#[async_trait]
impl ConsumerFactory for FakeProvider {
    async fn create_consumer(&self, source_name: &str) -> Result<Arc<dyn Consumer>, SourceError> {
        self.consumer
            .clone()
            .ok_or_else(|| SourceError::unsupported(source_name, "consuming"))
    }
}

#[async_trait]
impl ProducerFactory for FakeProvider {
    async fn create_producer(&self, _source_name: &str) -> Result<Arc<dyn Producer>, SourceError> {
        Ok(self.producer.clone())
    }
}

/// Input source backed by a channel consumer.
pub fn input_source(name: &str) -> (mpsc::UnboundedSender<FakeMessage>, Arc<Source>) {
    let (tx, consumer) = ChannelConsumer::new();
    let source = Source::from_provider(
        name,
        FakeProvider {
            consumer: Some(consumer),
            producer: Arc::new(RecordingProducer::default()),
        },
    );
    (tx, Arc::new(source))
}

/// Write-only source recording what is produced to it.
pub fn sink_source(name: &str) -> (Arc<RecordingProducer>, Arc<Source>) {
    let producer = Arc::new(RecordingProducer::default());
    let source = Source::from_provider(
        name,
        FakeProvider {
            consumer: None,
            producer: producer.clone(),
        },
    );
    (producer, Arc::new(source))
}

pub fn failing_source(name: &str, after: Duration) -> Arc<Source> {
    Arc::new(Source::from_provider(
        name,
        FakeProvider {
            consumer: Some(Arc::new(FailingConsumer { after })),
            producer: Arc::new(RecordingProducer::default()),
        },
    ))
}

/// Returns the payload upper-cased.
pub struct EchoHandler;

#[async_trait]
impl Handler for EchoHandler {
    async fn handle(&self, _ctx: &RequestContext, message: &dyn Message) -> HandlerResult {
        Ok(Some(RawMessage::new(message.data().to_uppercase())))
    }

    fn name(&self) -> &'static str {
        "echo"
    }
}

/// Always fails with a server-class error.
pub struct FailingHandler;

#[async_trait]
impl Handler for FailingHandler {
    async fn handle(&self, _ctx: &RequestContext, _message: &dyn Message) -> HandlerResult {
        Err(HandlerError::server("invalid server response: 503"))
    }

    fn name(&self) -> &'static str {
        "failing"
    }
}

/// Never finishes on its own.
pub struct StuckHandler {
    pub started: AtomicUsize,
}

#[async_trait]
impl Handler for StuckHandler {
    async fn handle(&self, _ctx: &RequestContext, _message: &dyn Message) -> HandlerResult {
        self.started.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(None)
    }

    fn name(&self) -> &'static str {
        "stuck"
    }
}

/// Sleeps per message and records the highest concurrency it observed.
#[derive(Default)]
pub struct TrackingHandler {
    running: AtomicUsize,
    peak: AtomicUsize,
    pub delay: Duration,
}

impl TrackingHandler {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            ..Default::default()
        }
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Handler for TrackingHandler {
    async fn handle(&self, _ctx: &RequestContext, _message: &dyn Message) -> HandlerResult {
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.running.fetch_sub(1, Ordering::SeqCst);
        Ok(None)
    }

    fn name(&self) -> &'static str {
        "tracking"
    }
}

/// Poll `check` until it holds, panicking after five seconds.
pub async fn eventually(what: &str, check: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !check() {
        if Instant::now() > deadline {
            panic!("timed out waiting for {}", what);
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
