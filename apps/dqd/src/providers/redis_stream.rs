//! Redis Streams provider
//!
//! Reads through a consumer group and treats the pending entries list as
//! the visibility mechanism:
//! - new entries are read with `XREADGROUP ... BLOCK`
//! - entries left unacknowledged longer than the visibility timeout are
//!   reclaimed with `XPENDING` + `XCLAIM`, bumping their delivery count
//! - `complete` acknowledges and deletes the entry (`XACK` + `XDEL`)
//! - `abort` leaves the entry pending until its delivery count reaches
//!   `maxDequeueCount`; entries already at that count when they come up for
//!   reclaim are acknowledged and deleted without another delivery

use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use pipe_worker::{
    Consumer, ConsumerFactory, HandlerError, HealthChecker, HealthState, HealthStatus, Message,
    MessageSink, Producer, ProducerFactory, RawMessage, SourceError,
};
use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use redis::{RedisError, RedisResult};
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::model::RedisStreamConfig;

/// Field holding the payload of a stream entry.
pub const DATA_FIELD: &str = "data";

/// Time allowed for a reply on top of the `XREADGROUP` block.
const RESPONSE_MARGIN: Duration = Duration::from_secs(2);

const MAX_BACKOFF_SECS: u64 = 30;

type StreamEntries = Vec<(String, Vec<(String, String)>)>;
type StreamReadReply = Vec<(String, StreamEntries)>;
/// `XPENDING` extended form: id, consumer, idle ms, delivery count.
type PendingEntry = (String, String, u64, u64);

pub struct RedisStreamProvider {
    client: redis::Client,
    config: RedisStreamConfig,
    connection: OnceCell<ConnectionManager>,
}

impl RedisStreamProvider {
    /// Validate the URL. The connection is opened on first use.
    pub fn new(config: RedisStreamConfig) -> Result<Self, SourceError> {
        let client = redis::Client::open(config.url.as_str()).map_err(SourceError::provider)?;
        Ok(Self {
            client,
            config,
            connection: OnceCell::new(),
        })
    }

    pub fn config(&self) -> &RedisStreamConfig {
        &self.config
    }

    fn stream_key(&self, source_name: &str) -> String {
        stream_key(&self.config, source_name)
    }

    async fn connection(&self) -> Result<ConnectionManager, SourceError> {
        let config = ConnectionManagerConfig::new()
            .set_response_timeout(Some(response_timeout(self.config.block)));
        let conn = self
            .connection
            .get_or_try_init(|| ConnectionManager::new_with_config(self.client.clone(), config))
            .await
            .map_err(SourceError::provider)?;
        Ok(conn.clone())
    }
}

impl std::fmt::Debug for RedisStreamProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStreamProvider")
            .field("config", &self.config)
            .finish()
    }
}

/// Replies to a blocking read arrive only after the block elapses.
fn response_timeout(block: Duration) -> Duration {
    block + RESPONSE_MARGIN
}

fn stream_key(config: &RedisStreamConfig, source_name: &str) -> String {
    match &config.stream {
        Some(stream) if !stream.is_empty() => stream.clone(),
        _ => source_name.to_string(),
    }
}

#[async_trait]
impl ConsumerFactory for RedisStreamProvider {
    async fn create_consumer(&self, source_name: &str) -> Result<Arc<dyn Consumer>, SourceError> {
        let consumer = RedisStreamConsumer {
            conn: self.connection().await?,
            stream: self.stream_key(source_name),
            group: self.config.group.clone(),
            consumer_id: format!("dqd-{}", uuid::Uuid::new_v4()),
            visibility_timeout: self.config.visibility_timeout,
            block: self.config.block,
            batch_size: self.config.batch_size.max(1),
            max_dequeue_count: self.config.max_dequeue_count,
            state: RwLock::new(HealthState::Init),
        };
        consumer.init_consumer_group().await?;
        Ok(Arc::new(consumer))
    }
}

#[async_trait]
impl ProducerFactory for RedisStreamProvider {
    async fn create_producer(&self, source_name: &str) -> Result<Arc<dyn Producer>, SourceError> {
        Ok(Arc::new(RedisStreamProducer {
            conn: self.connection().await?,
            stream: self.stream_key(source_name),
            max_len: self.config.max_len,
            state: RwLock::new(HealthState::Healthy),
        }))
    }
}

/// Consumer-group reader for one stream.
pub struct RedisStreamConsumer {
    conn: ConnectionManager,
    stream: String,
    group: String,
    consumer_id: String,
    visibility_timeout: Duration,
    block: Duration,
    batch_size: usize,
    max_dequeue_count: u64,
    state: RwLock<HealthState>,
}

impl RedisStreamConsumer {
    fn set_state(&self, state: HealthState) {
        if let Ok(mut current) = self.state.write() {
            *current = state;
        }
    }

    /// Create the consumer group, tolerating one that already exists.
    async fn init_consumer_group(&self) -> Result<(), SourceError> {
        let mut conn = self.conn.clone();
        let result: RedisResult<()> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.stream)
            .arg(&self.group)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match result {
            Ok(()) => {
                info!(stream = %self.stream, group = %self.group, "Created consumer group");
            }
            Err(e) if e.to_string().contains("BUSYGROUP") => {
                debug!(stream = %self.stream, group = %self.group, "Consumer group already exists");
            }
            Err(e) => {
                self.set_state(HealthState::error(&e));
                return Err(SourceError::provider(e));
            }
        }
        Ok(())
    }

    /// Claim entries idle past the visibility timeout.
    async fn claim_expired(&self) -> RedisResult<Vec<Delivery>> {
        let mut conn = self.conn.clone();
        let idle_ms = self.visibility_timeout.as_millis() as u64;

        let pending: Vec<PendingEntry> = redis::cmd("XPENDING")
            .arg(&self.stream)
            .arg(&self.group)
            .arg("IDLE")
            .arg(idle_ms)
            .arg("-")
            .arg("+")
            .arg(self.batch_size)
            .query_async(&mut conn)
            .await?;

        let (pending, exhausted) = partition_exhausted(pending, self.max_dequeue_count);
        if !exhausted.is_empty() {
            warn!(
                stream = %self.stream,
                count = exhausted.len(),
                max_dequeue_count = self.max_dequeue_count,
                "Dropping messages past their delivery limit"
            );
            self.discard(&exhausted).await?;
        }
        if pending.is_empty() {
            return Ok(Vec::new());
        }

        let mut cmd = redis::cmd("XCLAIM");
        cmd.arg(&self.stream)
            .arg(&self.group)
            .arg(&self.consumer_id)
            .arg(idle_ms);
        for (id, _, _, _) in &pending {
            cmd.arg(id);
        }
        let entries: StreamEntries = cmd.query_async(&mut conn).await?;

        let deliveries = self
            .accept(entries, |id| {
                // XCLAIM increments the delivery counter reported by XPENDING.
                pending
                    .iter()
                    .find(|(pending_id, _, _, _)| pending_id == id)
                    .map(|(_, _, _, count)| *count)
                    .unwrap_or(0)
                    + 1
            })
            .await?;

        if !deliveries.is_empty() {
            warn!(stream = %self.stream, count = deliveries.len(), "Reclaimed expired messages");
        }
        Ok(deliveries)
    }

    /// Read entries never delivered to this group.
    async fn read_new(&self) -> RedisResult<Vec<Delivery>> {
        let mut conn = self.conn.clone();
        let reply: Option<StreamReadReply> = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(&self.group)
            .arg(&self.consumer_id)
            .arg("BLOCK")
            .arg(self.block.as_millis() as u64)
            .arg("COUNT")
            .arg(self.batch_size)
            .arg("STREAMS")
            .arg(&self.stream)
            .arg(">")
            .query_async(&mut conn)
            .await?;

        let entries = reply
            .unwrap_or_default()
            .into_iter()
            .flat_map(|(_, entries)| entries)
            .collect();
        self.accept(entries, |_| 1).await
    }

    /// Turn entries into deliveries, discarding any without a payload.
    async fn accept(
        &self,
        entries: StreamEntries,
        count_of: impl Fn(&str) -> u64,
    ) -> RedisResult<Vec<Delivery>> {
        let mut deliveries = Vec::with_capacity(entries.len());
        let mut malformed = Vec::new();
        for (id, fields) in entries {
            let count = count_of(&id);
            match Delivery::from_entry(&id, fields, count) {
                Ok(delivery) => deliveries.push(delivery),
                Err(e) => {
                    warn!(stream = %self.stream, stream_id = %id, error = %e, "Discarding entry");
                    malformed.push(id);
                }
            }
        }
        self.discard(&malformed).await?;
        Ok(deliveries)
    }

    async fn discard(&self, ids: &[String]) -> RedisResult<()> {
        if ids.is_empty() {
            return Ok(());
        }
        ack_and_delete(&self.conn, &self.stream, &self.group, ids).await
    }

    fn message(&self, delivery: Delivery) -> Box<dyn Message> {
        Box::new(RedisStreamMessage {
            conn: self.conn.clone(),
            stream: self.stream.clone(),
            group: self.group.clone(),
            id: delivery.id,
            data: delivery.data,
            budget: DeliveryBudget::new(delivery.count, self.max_dequeue_count),
        })
    }
}

impl HealthChecker for RedisStreamConsumer {
    fn health_status(&self) -> HealthStatus {
        let state = self
            .state
            .read()
            .map(|s| s.clone())
            .unwrap_or_else(|_| HealthState::error("health state poisoned"));
        HealthStatus::single("redis", state)
    }
}

#[async_trait]
impl Consumer for RedisStreamConsumer {
    async fn iter(&self, cancel: CancellationToken, sink: MessageSink) -> Result<(), SourceError> {
        debug!(stream = %self.stream, consumer = %self.consumer_id, "Consuming");

        let mut failures: u32 = 0;
        while !cancel.is_cancelled() {
            let read = async {
                let mut batch = self.claim_expired().await?;
                if batch.is_empty() {
                    batch = self.read_new().await?;
                }
                Ok::<_, redis::RedisError>(batch)
            };

            let batch = tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                batch = read => batch,
            };

            let batch = match batch {
                Ok(batch) => {
                    if failures > 0 {
                        info!(stream = %self.stream, failures, "Redis connection recovered");
                        failures = 0;
                    }
                    self.set_state(HealthState::Healthy);
                    batch
                }
                Err(e) => match ReadFailure::of(&e) {
                    ReadFailure::Idle => {
                        debug!(stream = %self.stream, "Read timed out, no messages");
                        continue;
                    }
                    ReadFailure::MissingGroup => {
                        warn!(
                            stream = %self.stream,
                            group = %self.group,
                            "Consumer group missing, recreating"
                        );
                        self.init_consumer_group().await?;
                        continue;
                    }
                    ReadFailure::Connection => {
                        failures += 1;
                        let delay = backoff(failures);
                        self.set_state(HealthState::error(&e));
                        warn!(
                            stream = %self.stream,
                            error = %e,
                            consecutive_errors = failures,
                            backoff_secs = delay.as_secs(),
                            "Redis connection error, backing off"
                        );
                        tokio::select! {
                            _ = cancel.cancelled() => return Ok(()),
                            _ = tokio::time::sleep(delay) => {}
                        }
                        continue;
                    }
                    ReadFailure::Fatal => {
                        self.set_state(HealthState::error(&e));
                        return Err(SourceError::provider(e));
                    }
                },
            };

            for delivery in batch {
                if !sink.deliver(self.message(delivery)).await {
                    return Ok(());
                }
            }
        }
        Ok(())
    }
}

/// How a failed read is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadFailure {
    /// No reply in time; treated as an empty batch.
    Idle,
    /// The stream or group was deleted underneath the consumer.
    MissingGroup,
    /// Transient; retried after a back-off.
    Connection,
    Fatal,
}

impl ReadFailure {
    fn of(e: &RedisError) -> Self {
        if e.is_timeout() {
            ReadFailure::Idle
        } else if e.code() == Some("NOGROUP") {
            ReadFailure::MissingGroup
        } else if e.is_connection_dropped() || e.is_connection_refusal() || e.is_io_error() {
            ReadFailure::Connection
        } else {
            ReadFailure::Fatal
        }
    }
}

fn backoff(failures: u32) -> Duration {
    Duration::from_secs(2u64.pow(failures.min(5)).min(MAX_BACKOFF_SECS))
}

/// Split pending entries into those still deliverable and those that have
/// already been delivered `max_deliveries` times.
fn partition_exhausted(
    pending: Vec<PendingEntry>,
    max_deliveries: u64,
) -> (Vec<PendingEntry>, Vec<String>) {
    let mut exhausted = Vec::new();
    let mut deliverable = Vec::with_capacity(pending.len());
    for entry in pending {
        if entry.3 >= max_deliveries {
            exhausted.push(entry.0);
        } else {
            deliverable.push(entry);
        }
    }
    (deliverable, exhausted)
}

async fn ack_and_delete(
    conn: &ConnectionManager,
    stream: &str,
    group: &str,
    ids: &[String],
) -> RedisResult<()> {
    let mut conn = conn.clone();
    redis::pipe()
        .atomic()
        .cmd("XACK")
        .arg(stream)
        .arg(group)
        .arg(ids)
        .ignore()
        .cmd("XDEL")
        .arg(stream)
        .arg(ids)
        .ignore()
        .query_async::<()>(&mut conn)
        .await
}

/// One entry as read from the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Delivery {
    id: String,
    data: String,
    count: u64,
}

impl Delivery {
    fn from_entry(
        id: &str,
        fields: Vec<(String, String)>,
        count: u64,
    ) -> Result<Self, SourceError> {
        let data = payload(fields).ok_or_else(|| {
            SourceError::InvalidMessage(format!("entry {} has no '{}' field", id, DATA_FIELD))
        })?;
        Ok(Self {
            id: id.to_string(),
            data,
            count,
        })
    }
}

fn payload(fields: Vec<(String, String)>) -> Option<String> {
    fields
        .into_iter()
        .find(|(key, _)| key == DATA_FIELD)
        .map(|(_, value)| value)
}

/// How many times an entry has been delivered against its limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryBudget {
    count: u64,
    max: u64,
}

impl DeliveryBudget {
    pub fn new(count: u64, max: u64) -> Self {
        Self { count, max }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    /// Whether another delivery is allowed.
    pub fn has_retries(&self) -> bool {
        self.count < self.max
    }
}

pub struct RedisStreamMessage {
    conn: ConnectionManager,
    stream: String,
    group: String,
    id: String,
    data: String,
    budget: DeliveryBudget,
}

#[async_trait]
impl Message for RedisStreamMessage {
    fn id(&self) -> &str {
        &self.id
    }

    fn data(&self) -> &str {
        &self.data
    }

    async fn complete(&self) -> Result<(), SourceError> {
        ack_and_delete(&self.conn, &self.stream, &self.group, std::slice::from_ref(&self.id))
            .await
            .map_err(SourceError::provider)?;

        debug!(stream_id = %self.id, "Acknowledged message");
        Ok(())
    }

    async fn abort(&self, error: &HandlerError) -> bool {
        let retry = self.budget.has_retries();
        debug!(
            stream_id = %self.id,
            deliveries = self.budget.count(),
            retry,
            error = %error,
            "Message aborted"
        );
        retry
    }
}

/// Appends payloads with `XADD`.
pub struct RedisStreamProducer {
    conn: ConnectionManager,
    stream: String,
    max_len: Option<usize>,
    state: RwLock<HealthState>,
}

impl HealthChecker for RedisStreamProducer {
    fn health_status(&self) -> HealthStatus {
        let state = self
            .state
            .read()
            .map(|s| s.clone())
            .unwrap_or_else(|_| HealthState::error("health state poisoned"));
        HealthStatus::single("redis", state)
    }
}

#[async_trait]
impl Producer for RedisStreamProducer {
    async fn produce(&self, message: &RawMessage) -> Result<(), SourceError> {
        let mut conn = self.conn.clone();

        let mut cmd = redis::cmd("XADD");
        cmd.arg(&self.stream);
        if let Some(max_len) = self.max_len {
            cmd.arg("MAXLEN").arg("~").arg(max_len);
        }
        cmd.arg("*").arg(DATA_FIELD).arg(&message.data);

        let result: RedisResult<String> = cmd.query_async(&mut conn).await;
        let state = match &result {
            Ok(_) => HealthState::Healthy,
            Err(e) => HealthState::error(e),
        };
        if let Ok(mut current) = self.state.write() {
            *current = state;
        }

        let stream_id = result.map_err(SourceError::provider)?;
        debug!(stream = %self.stream, stream_id = %stream_id, "Produced message");
        Ok(())
    }
}
