//! Result resolution
//!
//! Turns a handled [`RequestContext`] into exactly one terminal action on its
//! message: complete it, leave it for redelivery, or hand its payload to the
//! error sink. Forwarding is best effort and never undoes a completion.

use std::sync::Arc;

use strum::AsRefStr;
use tracing::{debug, error, warn};

use crate::context::RequestContext;
use crate::message::RawMessage;
use crate::metrics::PipeMetrics;
use crate::source::Producer;

/// How a message was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum Resolution {
    /// Handler succeeded and the message was completed.
    Completed { forwarded: bool },
    /// Handler succeeded but the provider failed to complete the message.
    CompleteFailed,
    /// Handler failed and the provider kept the message for redelivery.
    Retry,
    /// Retries exhausted; payload written to the error sink and the message completed.
    DeadLettered,
    /// Retries exhausted; no error sink, or writing to it failed.
    Exhausted,
    /// No result was recorded.
    Missing,
}

/// Resolves handled messages for one pipe.
#[derive(Clone)]
pub struct ResultResolver {
    pipe: Arc<str>,
    output: Option<Arc<dyn Producer>>,
    errors: Option<Arc<dyn Producer>>,
    metrics: PipeMetrics,
}

impl ResultResolver {
    pub fn new(
        pipe: impl Into<Arc<str>>,
        output: Option<Arc<dyn Producer>>,
        errors: Option<Arc<dyn Producer>>,
        metrics: PipeMetrics,
    ) -> Self {
        Self {
            pipe: pipe.into(),
            output,
            errors,
            metrics,
        }
    }

    pub async fn resolve(&self, ctx: RequestContext) -> Resolution {
        let message = ctx.message();
        let resolution = match ctx.result() {
            None => {
                error!(pipe = %self.pipe, source = %ctx.source(), message_id = %message.id(), "Message reached resolution without a result");
                Resolution::Missing
            }
            Some(Ok(payload)) => match message.complete().await {
                Err(e) => {
                    error!(
                        pipe = %self.pipe,
                        source = %ctx.source(),
                        message_id = %message.id(),
                        error = %e,
                        "Failed to complete message"
                    );
                    Resolution::CompleteFailed
                }
                Ok(()) => {
                    let forwarded = match (&self.output, payload) {
                        (Some(output), Some(payload)) => {
                            self.forward(output.as_ref(), payload, &ctx, "output").await
                        }
                        _ => false,
                    };
                    Resolution::Completed { forwarded }
                }
            },
            Some(Err(handler_error)) => {
                if message.abort(handler_error).await {
                    debug!(
                        pipe = %self.pipe,
                        source = %ctx.source(),
                        message_id = %message.id(),
                        error = %handler_error,
                        "Message left for redelivery"
                    );
                    Resolution::Retry
                } else if let Some(errors) = &self.errors {
                    let original = RawMessage::new(message.data());
                    if self.forward(errors.as_ref(), &original, &ctx, "error").await {
                        if let Err(e) = message.complete().await {
                            warn!(
                                pipe = %self.pipe,
                                source = %ctx.source(),
                                message_id = %message.id(),
                                error = %e,
                                "Failed to complete dead-lettered message"
                            );
                        }
                        Resolution::DeadLettered
                    } else {
                        Resolution::Exhausted
                    }
                } else {
                    warn!(
                        pipe = %self.pipe,
                        source = %ctx.source(),
                        message_id = %message.id(),
                        error = %handler_error,
                        "Retries exhausted and no error source configured"
                    );
                    Resolution::Exhausted
                }
            }
        };

        let success = matches!(resolution, Resolution::Completed { .. });
        self.metrics
            .pipe_processed(ctx.source(), success, ctx.elapsed());
        self.metrics.resolution(ctx.source(), resolution.as_ref());
        resolution
    }

    async fn forward(
        &self,
        producer: &dyn Producer,
        payload: &RawMessage,
        ctx: &RequestContext,
        sink: &'static str,
    ) -> bool {
        match producer.produce(payload).await {
            Ok(()) => true,
            Err(e) => {
                error!(
                    pipe = %self.pipe,
                    source = %ctx.source(),
                    message_id = %ctx.message().id(),
                    sink,
                    error = %e,
                    "Failed to forward message"
                );
                false
            }
        }
    }
}
