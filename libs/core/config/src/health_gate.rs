use crate::{ConfigError, FromEnv, env_optional, env_parse_or};
use std::time::Duration;

/// Start-up dependency gate.
///
/// When `endpoint` is set the process polls it until it answers with a
/// success status before any pipe starts.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HealthGateConfig {
    pub endpoint: Option<String>,
    pub retries: u32,
    pub interval: Duration,
    pub timeout: Duration,
}

impl HealthGateConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: Some(endpoint.into()),
            ..Default::default()
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.endpoint.is_some()
    }
}

impl Default for HealthGateConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            retries: 120,
            interval: Duration::from_secs(1),
            timeout: Duration::from_secs(5),
        }
    }
}

impl FromEnv for HealthGateConfig {
    /// Reads from environment variables:
    /// - HEALTH_ENDPOINT: URL to poll (gate disabled when unset)
    /// - HEALTH_RETRIES: attempts before giving up (default 120)
    fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            endpoint: env_optional("HEALTH_ENDPOINT"),
            retries: env_parse_or("HEALTH_RETRIES", defaults.retries)?,
            ..defaults
        })
    }
}
