//! Worker configuration

use std::sync::Arc;
use std::time::Duration;

use crate::error::PipeError;
use crate::source::Source;

/// Default starting concurrency in dynamic mode.
pub const DEFAULT_RATE_INIT: usize = 10;
/// Default minimum concurrency in dynamic mode.
pub const DEFAULT_RATE_MIN: usize = 1;
/// Default controller window.
pub const DEFAULT_RATE_WINDOW: Duration = Duration::from_secs(30);

/// Concurrency policy of a pipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateConfig {
    /// Pinned limit; the controller does not run.
    Fixed(usize),
    /// Hill-climb from `init`, never below `min`, one step per `window`.
    Dynamic {
        init: usize,
        min: usize,
        window: Duration,
    },
}

impl Default for RateConfig {
    fn default() -> Self {
        RateConfig::Dynamic {
            init: DEFAULT_RATE_INIT,
            min: DEFAULT_RATE_MIN,
            window: DEFAULT_RATE_WINDOW,
        }
    }
}

impl RateConfig {
    /// Starting concurrency limit.
    pub fn initial(&self) -> usize {
        match *self {
            RateConfig::Fixed(rate) => rate,
            RateConfig::Dynamic { init, .. } => init,
        }
    }

    /// Lowest limit the controller may reach. In fixed mode this is the rate.
    pub fn min(&self) -> usize {
        match *self {
            RateConfig::Fixed(rate) => rate,
            RateConfig::Dynamic { min, .. } => min,
        }
    }

    pub fn is_fixed(&self) -> bool {
        matches!(self, RateConfig::Fixed(_))
    }

    pub fn validate(&self) -> Result<(), PipeError> {
        match *self {
            RateConfig::Fixed(0) => Err(PipeError::Config(
                "fixed rate must be at least 1".to_string(),
            )),
            RateConfig::Fixed(_) => Ok(()),
            RateConfig::Dynamic { init, min, window } => {
                if min == 0 {
                    return Err(PipeError::Config(
                        "minimum concurrency must be at least 1".to_string(),
                    ));
                }
                if init < min {
                    return Err(PipeError::Config(format!(
                        "initial concurrency {} is below minimum {}",
                        init, min
                    )));
                }
                if window.is_zero() {
                    return Err(PipeError::Config(
                        "rate window must be greater than zero".to_string(),
                    ));
                }
                Ok(())
            }
        }
    }
}

/// Configuration for a [`Worker`](crate::Worker).
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Pipe name, used for logging, metrics and health keys.
    pub name: String,
    pub rate: RateConfig,
    /// Where successful handler results are forwarded.
    pub output: Option<Arc<Source>>,
    /// Where payloads with exhausted retries are forwarded.
    pub error_source: Option<Arc<Source>>,
    /// How long `start` waits for in-flight work after cancellation.
    pub drain_timeout: Duration,
    /// How often consumer health is polled into the probe.
    pub health_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            rate: RateConfig::default(),
            output: None,
            error_source: None,
            drain_timeout: Duration::from_secs(30),
            health_interval: Duration::from_secs(10),
        }
    }
}

impl WorkerConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_rate(mut self, rate: RateConfig) -> Self {
        self.rate = rate;
        self
    }

    pub fn with_fixed_rate(mut self, rate: usize) -> Self {
        self.rate = RateConfig::Fixed(rate);
        self
    }

    pub fn with_dynamic_rate(mut self, init: usize, min: usize, window: Duration) -> Self {
        self.rate = RateConfig::Dynamic { init, min, window };
        self
    }

    pub fn with_output(mut self, output: Arc<Source>) -> Self {
        self.output = Some(output);
        self
    }

    pub fn with_error_source(mut self, source: Arc<Source>) -> Self {
        self.error_source = Some(source);
        self
    }

    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    pub fn with_health_interval(mut self, interval: Duration) -> Self {
        self.health_interval = interval;
        self
    }

    pub fn validate(&self) -> Result<(), PipeError> {
        if self.name.is_empty() {
            return Err(PipeError::Config("pipe name must not be empty".to_string()));
        }
        if self.health_interval.is_zero() {
            return Err(PipeError::Config(
                "health interval must be greater than zero".to_string(),
            ));
        }
        self.rate.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_rate() {
        let rate = RateConfig::default();
        assert_eq!(rate.initial(), 10);
        assert_eq!(rate.min(), 1);
        assert!(!rate.is_fixed());
        assert!(rate.validate().is_ok());
    }

    #[test]
    fn test_fixed_rate_pins_min() {
        let rate = RateConfig::Fixed(4);
        assert_eq!(rate.initial(), 4);
        assert_eq!(rate.min(), 4);
        assert!(rate.is_fixed());
    }

    #[test]
    fn test_init_below_min_is_rejected() {
        let config = WorkerConfig::new("orders").with_dynamic_rate(1, 3, Duration::from_secs(1));
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("below minimum"));
    }

    #[test]
    fn test_zero_rates_are_rejected() {
        assert!(RateConfig::Fixed(0).validate().is_err());
        assert!(
            WorkerConfig::new("p")
                .with_dynamic_rate(1, 0, Duration::from_secs(1))
                .validate()
                .is_err()
        );
        assert!(
            WorkerConfig::new("p")
                .with_dynamic_rate(1, 1, Duration::ZERO)
                .validate()
                .is_err()
        );
    }

    #[test]
    fn test_builder() {
        let config = WorkerConfig::new("orders")
            .with_fixed_rate(2)
            .with_drain_timeout(Duration::from_secs(5));

        assert_eq!(config.name, "orders");
        assert_eq!(config.rate, RateConfig::Fixed(2));
        assert_eq!(config.drain_timeout, Duration::from_secs(5));
        assert!(config.output.is_none());
        assert!(config.validate().is_ok());
    }
}
