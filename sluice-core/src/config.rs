//! Engine Configuration
//!
//! Tunables for previews and streaming runs. The settings are plain data so
//! a controller can load them from JSON next to its own configuration:
//!
//! ```rust
//! use sluice_core::EngineConfig;
//!
//! let config = EngineConfig::from_json_str(r#"{ "mailbox_capacity": 8 }"#).unwrap();
//! assert_eq!(config.mailbox_capacity, 8);
//! assert_eq!(config.prerun_row_limit, sluice_core::config::PRERUN_ROW_LIMIT);
//! ```
//!
//! Missing fields fall back to their defaults.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Default capacity of every node's inbound mailbox.
pub const DEFAULT_MAILBOX_CAPACITY: usize = 3;

/// Default row cap for preview computations.
pub const PRERUN_ROW_LIMIT: usize = 100_000;

/// Default interval between progress reports during a run.
pub const DEFAULT_PROGRESS_INTERVAL_MS: u64 = 1_000;

/// Settings shared by every node of a graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Number of undelivered items a mailbox holds before senders block.
    pub mailbox_capacity: usize,

    /// Row cap used by `prerun` when no explicit limit is given.
    pub prerun_row_limit: usize,

    /// Size of the worker pool driving a streaming run.
    pub worker_threads: usize,

    /// Milliseconds between progress reports.
    pub progress_interval_ms: u64,
}

impl EngineConfig {
    /// Parse a configuration from JSON and validate it.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the settings are usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mailbox_capacity == 0 {
            return Err(ConfigError::Zero("mailbox_capacity"));
        }
        if self.worker_threads == 0 {
            return Err(ConfigError::Zero("worker_threads"));
        }
        Ok(())
    }

    pub fn with_mailbox_capacity(mut self, capacity: usize) -> Self {
        self.mailbox_capacity = capacity;
        self
    }

    pub fn with_prerun_row_limit(mut self, limit: usize) -> Self {
        self.prerun_row_limit = limit;
        self
    }

    pub fn with_worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = threads;
        self
    }

    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Interval between progress reports.
    pub fn progress_interval(&self) -> Duration {
        // tokio's interval panics on a zero period
        Duration::from_millis(self.progress_interval_ms.max(1))
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            mailbox_capacity: DEFAULT_MAILBOX_CAPACITY,
            prerun_row_limit: PRERUN_ROW_LIMIT,
            worker_threads: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            progress_interval_ms: DEFAULT_PROGRESS_INTERVAL_MS,
        }
    }
}
