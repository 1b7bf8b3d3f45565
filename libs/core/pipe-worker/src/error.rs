//! Pipe error types
//!
//! Two layers of errors flow through the engine:
//! - **SourceError**: raised by queue providers behind the `Consumer`/`Producer`/`Message` contracts
//! - **PipeError**: raised by the worker itself (bad configuration, fatal intake failure)
//!
//! Handler failures are modelled separately by [`HandlerError`](crate::HandlerError)
//! because they are a normal outcome of dispatch, not a failure of the pipe.

use thiserror::Error;

/// Boxed error used to carry provider-specific failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors raised by queue providers.
#[derive(Error, Debug)]
pub enum SourceError {
    /// The underlying queue client failed.
    #[error("provider error: {0}")]
    Provider(#[source] BoxError),

    /// The provider kind cannot perform the requested operation.
    #[error("source '{source_name}' does not support {operation}")]
    Unsupported {
        source_name: String,
        operation: &'static str,
    },

    /// A delivered entry could not be turned into a message.
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}

impl SourceError {
    /// Wrap any provider error.
    pub fn provider(err: impl Into<BoxError>) -> Self {
        SourceError::Provider(err.into())
    }

    /// Build an `Unsupported` error for a source.
    pub fn unsupported(source_name: impl Into<String>, operation: &'static str) -> Self {
        SourceError::Unsupported {
            source_name: source_name.into(),
            operation,
        }
    }
}

/// Errors raised by a pipe worker.
#[derive(Error, Debug)]
pub enum PipeError {
    /// The worker configuration violates an invariant.
    #[error("invalid worker configuration: {0}")]
    Config(String),

    /// A source's consumer terminated with a non-cancellation error.
    #[error("intake from source '{source_name}' failed: {error}")]
    Intake {
        source_name: String,
        #[source]
        error: SourceError,
    },

    /// An output or error sink producer could not be created.
    #[error("sink '{source_name}' unavailable: {error}")]
    Sink {
        source_name: String,
        #[source]
        error: SourceError,
    },

    /// An owned task panicked or was aborted.
    #[error("pipe task failed: {0}")]
    Task(String),

    /// The Prometheus recorder could not be installed.
    #[error("metrics error: {0}")]
    Metrics(String),
}

impl PipeError {
    /// Whether this error came from a source's intake loop.
    pub fn is_intake(&self) -> bool {
        matches!(self, PipeError::Intake { .. })
    }
}
