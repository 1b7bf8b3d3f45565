//! Health model
//!
//! Components report a [`HealthStatus`]: a flat map from dotted component
//! keys (`"orders.intake"`, `"redis.orders"`) to a [`HealthState`]. Statuses
//! from several components are merged under a prefix to build the process
//! view served on `/health`.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use serde::{Serialize, Serializer};

/// State of a single component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthState {
    Healthy,
    Init,
    Error(String),
}

impl HealthState {
    pub fn error(reason: impl fmt::Display) -> Self {
        HealthState::Error(reason.to_string())
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthState::Healthy)
    }
}

impl fmt::Display for HealthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthState::Healthy => f.write_str("Healthy"),
            HealthState::Init => f.write_str("Init"),
            HealthState::Error(reason) => write!(f, "Error - {}", reason),
        }
    }
}

impl Serialize for HealthState {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Component key to state map.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct HealthStatus(BTreeMap<String, HealthState>);

impl HealthStatus {
    /// Status with a single component.
    pub fn single(key: impl Into<String>, state: HealthState) -> Self {
        let mut status = Self::default();
        status.insert(key, state);
        status
    }

    /// Builder form of [`insert`](Self::insert).
    pub fn with(mut self, key: impl Into<String>, state: HealthState) -> Self {
        self.insert(key, state);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, state: HealthState) {
        self.0.insert(key.into(), state);
    }

    pub fn get(&self, key: &str) -> Option<&HealthState> {
        self.0.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &HealthState)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// True when every component is healthy. An empty status is healthy.
    pub fn is_healthy(&self) -> bool {
        self.0.values().all(HealthState::is_healthy)
    }

    /// Merge `other` into this status, keys prefixed with `"{prefix}."`.
    ///
    /// An empty prefix merges keys unchanged.
    pub fn add(&mut self, other: &HealthStatus, prefix: &str) {
        for (key, state) in &other.0 {
            self.0.insert(prefixed(prefix, key), state.clone());
        }
    }
}

fn prefixed(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", prefix, key)
    }
}

/// Anything that can report its health.
pub trait HealthChecker: Send + Sync {
    fn health_status(&self) -> HealthStatus;
}

/// Process-wide set of named health checkers.
#[derive(Clone, Default)]
pub struct HealthRegistry {
    checkers: Arc<RwLock<Vec<(String, Arc<dyn HealthChecker>)>>>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a checker whose keys are reported under `name`.
    pub fn register(&self, name: impl Into<String>, checker: Arc<dyn HealthChecker>) {
        if let Ok(mut checkers) = self.checkers.write() {
            checkers.push((name.into(), checker));
        }
    }
}

impl HealthChecker for HealthRegistry {
    fn health_status(&self) -> HealthStatus {
        let mut status = HealthStatus::default();
        if let Ok(checkers) = self.checkers.read() {
            for (name, checker) in checkers.iter() {
                status.add(&checker.health_status(), name);
            }
        }
        status
    }
}
