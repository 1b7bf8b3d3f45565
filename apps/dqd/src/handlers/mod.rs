//! Handler kinds a pipe can dispatch to.

pub mod http;
pub mod none;

use async_trait::async_trait;
use pipe_worker::{Handler, HandlerResult, Message, RequestContext};

use crate::config::model::HandlerConfig;
pub use http::HttpHandler;
pub use none::NoneHandler;

/// Closed set of handler kinds, selected by the key under `handler`.
#[derive(Debug, Clone)]
pub enum HandlerKind {
    None(NoneHandler),
    Http(HttpHandler),
}

/// Why a handler section could not be turned into a handler.
#[derive(thiserror::Error, Debug)]
pub enum HandlerBuildError {
    #[error("no handler kind configured, expected one of: none, http")]
    Missing,

    #[error("more than one handler kind configured")]
    Ambiguous,

    #[error("failed to build http client: {0}")]
    Client(#[from] reqwest::Error),
}

impl HandlerKind {
    pub fn from_config(config: &HandlerConfig) -> Result<Self, HandlerBuildError> {
        match (&config.none, &config.http) {
            (Some(_), Some(_)) => Err(HandlerBuildError::Ambiguous),
            (Some(_), None) => Ok(HandlerKind::None(NoneHandler)),
            (None, Some(http)) => Ok(HandlerKind::Http(HttpHandler::new(http.url())?)),
            (None, None) => Err(HandlerBuildError::Missing),
        }
    }
}

#[async_trait]
impl Handler for HandlerKind {
    async fn handle(&self, ctx: &RequestContext, message: &dyn Message) -> HandlerResult {
        match self {
            HandlerKind::None(h) => h.handle(ctx, message).await,
            HandlerKind::Http(h) => h.handle(ctx, message).await,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            HandlerKind::None(h) => h.name(),
            HandlerKind::Http(h) => h.name(),
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use async_trait::async_trait;
    use pipe_worker::{HandlerError, Message, RequestContext, SourceError};
    use tokio_util::sync::CancellationToken;

    pub struct StaticMessage(pub String);

    #[async_trait]
    impl Message for StaticMessage {
        fn id(&self) -> &str {
            "1"
        }

        fn data(&self) -> &str {
            &self.0
        }

        async fn complete(&self) -> Result<(), SourceError> {
            Ok(())
        }

        async fn abort(&self, _error: &HandlerError) -> bool {
            true
        }
    }

    pub fn context(source: &str, data: &str) -> RequestContext {
        RequestContext::new(
            CancellationToken::new(),
            source,
            Box::new(StaticMessage(data.to_string())),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(yaml: &str) -> HandlerConfig {
        serde_yaml_ng::from_str(yaml).unwrap()
    }

    #[test]
    fn test_from_config() {
        let none = HandlerKind::from_config(&config("none: {}")).unwrap();
        assert_eq!(none.name(), "none");

        let http = HandlerKind::from_config(&config("http: {port: 8080}")).unwrap();
        match &http {
            HandlerKind::Http(h) => assert_eq!(h.url(), "http://localhost:8080/"),
            other => panic!("unexpected handler: {:?}", other),
        }
    }

    #[test]
    fn test_missing_and_ambiguous() {
        assert!(matches!(
            HandlerKind::from_config(&config("{}")),
            Err(HandlerBuildError::Missing)
        ));
        assert!(matches!(
            HandlerKind::from_config(&config("none: {}\nhttp: {}")),
            Err(HandlerBuildError::Ambiguous)
        ));
    }
}
