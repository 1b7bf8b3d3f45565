//! HTTP handler: POST the payload to an endpoint.

use std::time::Duration;

use async_trait::async_trait;
use pipe_worker::{Handler, HandlerError, HandlerResult, Message, RawMessage, RequestContext};
use reqwest::header::CONTENT_TYPE;
use tracing::debug;

/// Header carrying the name of the source a message came from.
pub const SOURCE_HEADER: &str = "x-dqd-source";

/// Per-request deadline.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Clone)]
pub struct HttpHandler {
    client: reqwest::Client,
    url: String,
}

impl HttpHandler {
    pub fn new(url: impl Into<String>) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Handler for HttpHandler {
    async fn handle(&self, ctx: &RequestContext, message: &dyn Message) -> HandlerResult {
        let response = self
            .client
            .post(&self.url)
            .header(SOURCE_HEADER, ctx.source())
            .header(CONTENT_TYPE, "application/json")
            .body(message.data().to_string())
            .send()
            .await
            .map_err(HandlerError::server)?;

        let status = response.status();
        if status.is_server_error() {
            return Err(HandlerError::server(format!(
                "invalid server response: {}",
                status.as_u16()
            )));
        }
        if status.is_client_error() {
            return Err(HandlerError::bad_request(format!(
                "invalid client response: {}",
                status.as_u16()
            )));
        }

        let body = response.text().await.map_err(HandlerError::server)?;
        debug!(url = %self.url, status = status.as_u16(), "Handler responded");
        Ok(Some(RawMessage::new(body)))
    }

    fn name(&self) -> &'static str {
        "http"
    }
}
