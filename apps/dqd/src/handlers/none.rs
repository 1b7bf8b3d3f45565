//! Echo handler: the payload is its own result.

use async_trait::async_trait;
use pipe_worker::{Handler, HandlerResult, Message, RawMessage, RequestContext};

#[derive(Debug, Clone, Copy, Default)]
pub struct NoneHandler;

#[async_trait]
impl Handler for NoneHandler {
    async fn handle(&self, _ctx: &RequestContext, message: &dyn Message) -> HandlerResult {
        Ok(Some(RawMessage::new(message.data())))
    }

    fn name(&self) -> &'static str {
        "none"
    }
}
