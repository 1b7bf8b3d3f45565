//! Per-message request context
//!
//! Created when a message is dequeued, carried through dispatch and handed to
//! result resolution once the handler has produced a result.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::handler::HandlerResult;
use crate::message::Message;

/// Carrier for one message through the pipe.
///
/// Source name, dequeue time and message handle are fixed at creation.
/// The result is set at most once, by the handling task.
pub struct RequestContext {
    cancel: CancellationToken,
    source: Arc<str>,
    dequeued_at: DateTime<Utc>,
    dequeued: Instant,
    message: Box<dyn Message>,
    result: Option<HandlerResult>,
}

impl RequestContext {
    /// Create a context for a freshly dequeued message.
    pub fn new(
        cancel: CancellationToken,
        source: impl Into<Arc<str>>,
        message: Box<dyn Message>,
    ) -> Self {
        Self {
            cancel,
            source: source.into(),
            dequeued_at: Utc::now(),
            dequeued: Instant::now(),
            message,
            result: None,
        }
    }

    /// Name of the source the message was read from.
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn message(&self) -> &dyn Message {
        self.message.as_ref()
    }

    /// Wall-clock dequeue time.
    pub fn dequeued_at(&self) -> DateTime<Utc> {
        self.dequeued_at
    }

    /// Time since dequeue.
    pub fn elapsed(&self) -> Duration {
        self.dequeued.elapsed()
    }

    /// Cancellation token of the owning pipe.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Record the handler result.
    ///
    /// Returns `false` (and keeps the first result) if a result was already set.
    pub(crate) fn set_result(&mut self, result: HandlerResult) -> bool {
        if self.result.is_some() {
            warn!(
                source = %self.source,
                message_id = %self.message.id(),
                "Result already recorded, ignoring second result"
            );
            return false;
        }
        self.result = Some(result);
        true
    }

    /// Handler result, if one has been recorded.
    pub fn result(&self) -> Option<&HandlerResult> {
        self.result.as_ref()
    }
}

impl fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestContext")
            .field("source", &self.source)
            .field("message_id", &self.message.id())
            .field("dequeued_at", &self.dequeued_at)
            .field("result", &self.result)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SourceError;
    use crate::handler::HandlerError;
    use crate::message::RawMessage;
    use async_trait::async_trait;

    struct StaticMessage;

    #[async_trait]
    impl Message for StaticMessage {
        fn id(&self) -> &str {
            "m-1"
        }
        fn data(&self) -> &str {
            "payload"
        }
        async fn complete(&self) -> Result<(), SourceError> {
            Ok(())
        }
        async fn abort(&self, _error: &HandlerError) -> bool {
            true
        }
    }

    #[test]
    fn test_context_fields() {
        let before = Utc::now();
        let ctx = RequestContext::new(CancellationToken::new(), "orders", Box::new(StaticMessage));

        assert_eq!(ctx.source(), "orders");
        assert_eq!(ctx.message().id(), "m-1");
        assert_eq!(ctx.message().data(), "payload");
        assert!(ctx.dequeued_at() >= before);
        assert!(ctx.result().is_none());
    }

    #[test]
    fn test_result_is_set_once() {
        let mut ctx =
            RequestContext::new(CancellationToken::new(), "orders", Box::new(StaticMessage));

        assert!(ctx.set_result(Ok(Some(RawMessage::new("first")))));
        assert!(!ctx.set_result(Err(HandlerError::server("second"))));

        match ctx.result() {
            Some(Ok(Some(payload))) => assert_eq!(payload.data, "first"),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_cancellation_is_shared() {
        let token = CancellationToken::new();
        let ctx = RequestContext::new(token.clone(), "orders", Box::new(StaticMessage));

        assert!(!ctx.is_cancelled());
        token.cancel();
        assert!(ctx.is_cancelled());
        assert!(ctx.cancellation().is_cancelled());
    }
}
