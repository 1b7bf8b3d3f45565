//! Configuration: loading, typed model and wiring into runnable pipes.

pub mod duration;
pub mod loader;
pub mod model;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use pipe_worker::{Handler, PipeError, Source, SourceError, Worker, WorkerConfig};
use thiserror::Error;
use tracing::{debug, info};

use crate::handlers::{HandlerBuildError, HandlerKind};
use crate::providers::{IoProvider, ProviderKind};
pub use loader::{ConfigInputs, DEFAULT_CONFIG_FILE};
pub use model::{DqdConfig, PipeConfig, STDOUT_SOURCE, SourceConfig};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse '{path}': {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml_ng::Error,
    },

    #[error("invalid override '{0}', expected key.path=value")]
    InvalidOverride(String),

    #[error("'{singular}' and '{plural}' cannot both be defined")]
    Conflict {
        singular: &'static str,
        plural: &'static str,
    },

    #[error("configuration root must be a mapping")]
    NotAMapping,

    #[error("invalid configuration: {0}")]
    Invalid(#[source] serde_yaml_ng::Error),

    #[error("source '{name}' is invalid: {error}")]
    InvalidSource {
        name: String,
        #[source]
        error: SourceError,
    },

    #[error("pipe '{pipe}' references unknown source '{source_name}'")]
    UnknownSource { pipe: String, source_name: String },

    #[error("pipe '{pipe}' handler is invalid: {error}")]
    Handler {
        pipe: String,
        #[source]
        error: HandlerBuildError,
    },

    #[error(transparent)]
    Pipe(#[from] PipeError),
}

/// Load every input and deserialize the result.
pub fn load(inputs: &ConfigInputs) -> Result<DqdConfig, ConfigError> {
    parse(loader::load(inputs)?)
}

/// Deserialize a normalized document.
pub fn parse(root: serde_yaml_ng::Value) -> Result<DqdConfig, ConfigError> {
    serde_yaml_ng::from_value(root).map_err(ConfigError::Invalid)
}

/// Runnable process state built from configuration.
pub struct App {
    pub log_level: String,
    pub metrics_port: u16,
    pub listener_host: String,
    pub sources: BTreeMap<String, Arc<Source>>,
    pub workers: Vec<Arc<Worker>>,
}

impl App {
    /// Build sources and workers.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn build(config: DqdConfig) -> Result<Self, ConfigError> {
        let sources = build_sources(&config.sources)?;

        let workers = config
            .pipes
            .iter()
            .map(|(name, pipe)| build_worker(name, pipe, &sources).map(Arc::new))
            .collect::<Result<Vec<_>, _>>()?;

        info!(
            sources = sources.len(),
            pipes = workers.len(),
            "Configuration loaded"
        );

        Ok(Self {
            log_level: config.log_level,
            metrics_port: config.metrics_port,
            listener_host: config.listeners.http.host,
            sources,
            workers,
        })
    }
}

fn build_sources(
    configs: &BTreeMap<String, SourceConfig>,
) -> Result<BTreeMap<String, Arc<Source>>, ConfigError> {
    let mut sources = BTreeMap::new();
    for (name, config) in configs {
        let provider =
            ProviderKind::from_config(config).map_err(|error| ConfigError::InvalidSource {
                name: name.clone(),
                error,
            })?;
        debug!(source = %name, kind = provider.kind(), "Source defined");
        sources.insert(
            name.clone(),
            Arc::new(Source::from_provider(name.clone(), provider)),
        );
    }

    sources.entry(STDOUT_SOURCE.to_string()).or_insert_with(|| {
        Arc::new(Source::from_provider(
            STDOUT_SOURCE,
            ProviderKind::Io(IoProvider::stdout()),
        ))
    });
    Ok(sources)
}

fn build_worker(
    name: &str,
    pipe: &PipeConfig,
    sources: &BTreeMap<String, Arc<Source>>,
) -> Result<Worker, ConfigError> {
    let lookup = |source_name: &str| {
        sources
            .get(source_name)
            .cloned()
            .ok_or_else(|| ConfigError::UnknownSource {
                pipe: name.to_string(),
                source_name: source_name.to_string(),
            })
    };

    let inputs = pipe
        .input_sources()
        .iter()
        .map(|source_name| lookup(source_name.as_str()))
        .collect::<Result<Vec<_>, _>>()?;

    let handler_config = pipe.handler.clone().unwrap_or_default();
    let handler =
        HandlerKind::from_config(&handler_config).map_err(|error| ConfigError::Handler {
            pipe: name.to_string(),
            error,
        })?;

    let mut worker_config = WorkerConfig::new(name).with_rate(pipe.rate.to_rate());
    if let Some(output) = &pipe.output {
        worker_config = worker_config.with_output(lookup(output.as_str())?);
    }
    if let Some(error_source) = pipe.error_source() {
        worker_config = worker_config.with_error_source(lookup(error_source)?);
    }

    debug!(pipe = %name, handler = handler.name(), "Pipe defined");
    Ok(Worker::new(inputs, Arc::new(handler), worker_config)?)
}
