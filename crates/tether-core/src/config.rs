//! Scheduler configuration.
//!
//! All intervals are stored in milliseconds so the file format stays flat JSON.
//! Every field has a default; a config file only needs the keys it overrides.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Written into the lease row to tell participants apart.
    pub node_identity: String,
    pub version: String,
    pub heartbeat_interval_ms: u64,
    /// Silence after which a lease is dead (and after which it fails itself).
    pub reap_threshold_ms: u64,
    pub reap_interval_ms: u64,
    pub poll_interval_ms: u64,
    pub max_dispatch_jitter_ms: u64,
    pub max_workers: usize,
    pub max_release_attempts: u32,
    pub page_size: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            node_identity: format!("node-{}", std::process::id()),
            version: env!("CARGO_PKG_VERSION").to_string(),
            heartbeat_interval_ms: 10_000,
            reap_threshold_ms: 60_000,
            reap_interval_ms: 60_000,
            poll_interval_ms: 10_000,
            max_dispatch_jitter_ms: 1_000,
            max_workers: 16,
            max_release_attempts: 3,
            page_size: 100,
        }
    }
}

impl SchedulerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a JSON config file. Missing keys keep their defaults.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config: Self = serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let intervals = [
            ("heartbeat_interval_ms", self.heartbeat_interval_ms),
            ("reap_threshold_ms", self.reap_threshold_ms),
            ("reap_interval_ms", self.reap_interval_ms),
            ("poll_interval_ms", self.poll_interval_ms),
        ];
        if let Some((name, _)) = intervals.iter().find(|(_, ms)| *ms == 0) {
            return Err(ConfigError::Invalid(format!("{name} must be greater than zero")));
        }
        if self.reap_threshold_ms <= self.heartbeat_interval_ms {
            return Err(ConfigError::Invalid(format!(
                "reap_threshold_ms ({}) must exceed heartbeat_interval_ms ({})",
                self.reap_threshold_ms, self.heartbeat_interval_ms
            )));
        }
        if self.max_workers == 0 || self.page_size == 0 || self.max_release_attempts == 0 {
            return Err(ConfigError::Invalid(
                "max_workers, page_size and max_release_attempts must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn node_identity(mut self, node_identity: impl Into<String>) -> Self {
        self.node_identity = node_identity.into();
        self
    }

    /// Set the heartbeat and derive the reap threshold and interval (6x).
    pub fn heartbeat(mut self, interval: Duration) -> Self {
        let ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        self.heartbeat_interval_ms = ms;
        self.reap_threshold_ms = ms.saturating_mul(6);
        self.reap_interval_ms = ms.saturating_mul(6);
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn max_dispatch_jitter(mut self, jitter: Duration) -> Self {
        self.max_dispatch_jitter_ms = u64::try_from(jitter.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers.max(1);
        self
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn reap_threshold(&self) -> Duration {
        Duration::from_millis(self.reap_threshold_ms)
    }

    pub fn reap_interval(&self) -> Duration {
        Duration::from_millis(self.reap_interval_ms)
    }

    pub fn poll_interval_duration(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn max_dispatch_jitter_duration(&self) -> Duration {
        Duration::from_millis(self.max_dispatch_jitter_ms)
    }
}
