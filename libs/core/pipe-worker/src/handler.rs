//! Handler contract
//!
//! The handler is the downstream collaborator invoked once per admitted
//! message (an HTTP forwarder, an echo, ...).

use async_trait::async_trait;
use strum::{AsRefStr, Display};
use thiserror::Error;

use crate::context::RequestContext;
use crate::message::{Message, RawMessage};

/// Severity class of a handler failure.
///
/// Only used for logging and metrics. Retry and dead-letter decisions are
/// made by the provider through [`Message::abort`], not by severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum Severity {
    /// The request was rejected by the handler (4xx-like).
    Client,
    /// The handler or its transport failed (5xx-like).
    Server,
}

/// Failure returned by a [`Handler`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct HandlerError {
    severity: Severity,
    message: String,
}

impl HandlerError {
    /// Client-class failure.
    pub fn bad_request(err: impl std::fmt::Display) -> Self {
        Self {
            severity: Severity::Client,
            message: err.to_string(),
        }
    }

    /// Server-class failure.
    pub fn server(err: impl std::fmt::Display) -> Self {
        Self {
            severity: Severity::Server,
            message: err.to_string(),
        }
    }

    pub fn severity(&self) -> Severity {
        self.severity
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Outcome of one handler invocation.
pub type HandlerResult = Result<Option<RawMessage>, HandlerError>;

/// Trait for message handlers.
///
/// # Example
///
/// ```rust,ignore
/// use pipe_worker::{Handler, HandlerError, Message, RawMessage, RequestContext};
///
/// struct Upper;
///
/// #[async_trait]
/// impl Handler for Upper {
///     async fn handle(
///         &self,
///         _ctx: &RequestContext,
///         message: &dyn Message,
///     ) -> Result<Option<RawMessage>, HandlerError> {
///         Ok(Some(RawMessage::new(message.data().to_uppercase())))
///     }
///
///     fn name(&self) -> &'static str {
///         "upper"
///     }
/// }
/// ```
#[async_trait]
pub trait Handler: Send + Sync {
    /// Handle one message.
    ///
    /// The worker imposes no timeout; handlers enforce their own deadline
    /// and should observe `ctx.cancellation()` if shutdown latency matters.
    async fn handle(&self, ctx: &RequestContext, message: &dyn Message) -> HandlerResult;

    /// Handler name for logging.
    fn name(&self) -> &'static str;
}
