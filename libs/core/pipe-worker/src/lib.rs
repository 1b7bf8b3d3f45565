//! Pipe Worker
//!
//! Queue-to-handler dispatch engine. A pipe pulls messages from one or more
//! sources, runs a handler per message under an adaptive concurrency limit,
//! and resolves every message to completion, redelivery or dead-letter.
//!
//! ## Features
//!
//! - **Multi-source intake**: one consumer task per input source, fail-fast on fatal errors
//! - **Admission gate**: notification-driven in-flight limit
//! - **Hill-climb controller**: limit moves ±1 per window following throughput
//! - **Result forwarding**: optional output sink and error (dead-letter) sink
//! - **Health probe**: serialized aggregation of component health
//! - **Prometheus metrics**: concurrency and processing-time instruments
//!
//! ## Example
//!
//! ```ignore
//! use pipe_worker::{Source, Worker, WorkerConfig};
//!
//! let orders = Arc::new(Source::from_provider("orders", provider));
//! let config = WorkerConfig::new("orders")
//!     .with_dynamic_rate(10, 1, Duration::from_secs(30))
//!     .with_error_source(dead_letters);
//!
//! let worker = Worker::new(vec![orders], Arc::new(handler), config)?;
//! worker.start(cancel).await?;
//! ```

mod config;
mod context;
mod controller;
mod error;
mod gate;
mod handler;
mod health;
mod message;
pub mod metrics;
mod probe;
mod resolver;
mod source;
mod worker;

// Re-export main types
pub use config::{
    DEFAULT_RATE_INIT, DEFAULT_RATE_MIN, DEFAULT_RATE_WINDOW, RateConfig, WorkerConfig,
};
pub use context::RequestContext;
pub use controller::{Adjustment, RateController, Tick};
pub use error::{BoxError, PipeError, SourceError};
pub use gate::{AdmissionGate, Permit};
pub use handler::{Handler, HandlerError, HandlerResult, Severity};
pub use health::{HealthChecker, HealthRegistry, HealthState, HealthStatus};
pub use message::{Message, RawMessage};
pub use metrics::{PipeMetrics, init_metrics};
pub use probe::HealthProbe;
pub use resolver::{Resolution, ResultResolver};
pub use source::{Consumer, ConsumerFactory, MessageSink, Producer, ProducerFactory, Source};
pub use worker::Worker;
