//! Message model
//!
//! A [`Message`] is a provider-owned handle on one delivery from a queue.
//! A [`RawMessage`] is the plain payload used for handler output and for
//! forwarding to output/error sinks.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::SourceError;
use crate::handler::HandlerError;

/// Plain message payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawMessage {
    pub data: String,
}

impl RawMessage {
    pub fn new(data: impl Into<String>) -> Self {
        Self { data: data.into() }
    }
}

impl From<String> for RawMessage {
    fn from(data: String) -> Self {
        Self { data }
    }
}

impl From<&str> for RawMessage {
    fn from(data: &str) -> Self {
        Self::new(data)
    }
}

/// A single delivery from a queue provider.
///
/// Providers decide what acknowledgement and retry mean for their queue:
/// `complete` removes the message, `abort` reports whether the message still
/// has retry budget (and should be left for redelivery).
#[async_trait]
pub trait Message: Send + Sync {
    /// Provider message id.
    fn id(&self) -> &str;

    /// Decoded payload.
    fn data(&self) -> &str;

    /// Acknowledge and delete the message from its queue.
    async fn complete(&self) -> Result<(), SourceError>;

    /// Record a failed handling attempt.
    ///
    /// Returns `true` when the message should be left un-acknowledged for
    /// redelivery, `false` when its retry budget is exhausted.
    async fn abort(&self, error: &HandlerError) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_message_conversions() {
        assert_eq!(RawMessage::from("a"), RawMessage::new("a"));
        assert_eq!(RawMessage::from("b".to_string()).data, "b");
    }

    #[test]
    fn test_raw_message_serialization() {
        let json = serde_json::to_string(&RawMessage::new("payload")).unwrap();
        assert_eq!(json, r#"{"data":"payload"}"#);
    }
}
