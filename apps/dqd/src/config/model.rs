//! Typed view of the merged, normalized configuration document.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;

use super::duration;

pub const DEFAULT_SOURCE: &str = "default";
pub const STDOUT_SOURCE: &str = "stdout";

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_port() -> u16 {
    8888
}

fn default_listener_host() -> String {
    "0.0.0.0:9999".to_string()
}

/// Root document.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DqdConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
    #[serde(default)]
    pub listeners: ListenersConfig,
    #[serde(default)]
    pub sources: BTreeMap<String, SourceConfig>,
    #[serde(default)]
    pub pipes: BTreeMap<String, PipeConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListenersConfig {
    #[serde(default)]
    pub http: HttpListenerConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpListenerConfig {
    #[serde(default = "default_listener_host")]
    pub host: String,
}

impl Default for HttpListenerConfig {
    fn default() -> Self {
        Self {
            host: default_listener_host(),
        }
    }
}

/// Source definition, discriminated by `type`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SourceConfig {
    RedisStream(RedisStreamConfig),
    Io(IoConfig),
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_group() -> String {
    "dqd".to_string()
}

fn default_visibility_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_block() -> Duration {
    Duration::from_secs(5)
}

fn default_max_dequeue_count() -> u64 {
    5
}

fn default_batch_size() -> usize {
    10
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedisStreamConfig {
    #[serde(default = "default_redis_url")]
    pub url: String,
    /// Stream key; defaults to the source name.
    #[serde(default)]
    pub stream: Option<String>,
    #[serde(default = "default_group")]
    pub group: String,
    /// Idle time after which an unacknowledged entry is redelivered.
    #[serde(default = "default_visibility_timeout", deserialize_with = "duration::deserialize")]
    pub visibility_timeout: Duration,
    #[serde(default = "default_block", deserialize_with = "duration::deserialize")]
    pub block: Duration,
    #[serde(default = "default_max_dequeue_count")]
    pub max_dequeue_count: u64,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Approximate stream length cap applied on produce.
    #[serde(default)]
    pub max_len: Option<usize>,
}

impl Default for RedisStreamConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            stream: None,
            group: default_group(),
            visibility_timeout: default_visibility_timeout(),
            block: default_block(),
            max_dequeue_count: default_max_dequeue_count(),
            batch_size: default_batch_size(),
            max_len: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct IoConfig {
    /// Append to this file instead of stdout.
    #[serde(default)]
    pub file: Option<String>,
}

/// One pipe.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipeConfig {
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub sources: Vec<String>,
    #[serde(default)]
    pub output: Option<String>,
    #[serde(default)]
    pub on_error: Option<OnErrorConfig>,
    #[serde(default)]
    pub rate: RateSettings,
    #[serde(default)]
    pub handler: Option<HandlerConfig>,
}

impl PipeConfig {
    /// Input source names: `sources` if given, else `source`, else `default`.
    pub fn input_sources(&self) -> Vec<String> {
        if !self.sources.is_empty() {
            return self.sources.clone();
        }
        vec![
            self.source
                .clone()
                .unwrap_or_else(|| DEFAULT_SOURCE.to_string()),
        ]
    }

    pub fn error_source(&self) -> Option<&str> {
        self.on_error
            .as_ref()
            .and_then(|e| e.write_to.as_ref())
            .map(|w| w.source.as_str())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnErrorConfig {
    #[serde(default)]
    pub write_to: Option<WriteToConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WriteToConfig {
    pub source: String,
}

fn default_rate_init() -> usize {
    pipe_worker::DEFAULT_RATE_INIT
}

fn default_rate_min() -> usize {
    pipe_worker::DEFAULT_RATE_MIN
}

fn default_rate_window() -> Duration {
    pipe_worker::DEFAULT_RATE_WINDOW
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateSettings {
    #[serde(default)]
    pub fixed: Option<usize>,
    #[serde(default = "default_rate_init")]
    pub init: usize,
    #[serde(default = "default_rate_min")]
    pub min: usize,
    #[serde(default = "default_rate_window", deserialize_with = "duration::deserialize")]
    pub window: Duration,
}

impl Default for RateSettings {
    fn default() -> Self {
        Self {
            fixed: None,
            init: default_rate_init(),
            min: default_rate_min(),
            window: default_rate_window(),
        }
    }
}

impl RateSettings {
    pub fn to_rate(&self) -> pipe_worker::RateConfig {
        match self.fixed {
            Some(rate) => pipe_worker::RateConfig::Fixed(rate),
            None => pipe_worker::RateConfig::Dynamic {
                init: self.init,
                min: self.min,
                window: self.window,
            },
        }
    }
}

/// Handler section: exactly one of `none` or `http`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HandlerConfig {
    #[serde(default)]
    pub none: Option<serde_yaml_ng::Value>,
    #[serde(default)]
    pub http: Option<HttpHandlerConfig>,
}

fn default_http_host() -> String {
    "localhost".to_string()
}

fn default_http_port() -> u16 {
    80
}

fn default_http_path() -> String {
    "/".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpHandlerConfig {
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_http_host")]
    pub host: String,
    #[serde(default = "default_http_port")]
    pub port: u16,
    #[serde(default = "default_http_path")]
    pub path: String,
}

impl HttpHandlerConfig {
    /// Full URL the handler posts to.
    pub fn url(&self) -> String {
        match &self.endpoint {
            Some(endpoint) if !endpoint.is_empty() => endpoint.clone(),
            _ => format!("http://{}:{}{}", self.host, self.port, self.path),
        }
    }
}
