//! `[watch]` section configuration.
//!
//! # Example
//!
//! ```toml
//! [watch]
//! use_polling = false       # Force polling for every watched directory
//! poll_interval_ms = 1000   # Polling granularity (minimum 1000)
//! debounce_ms = 300         # Quiet period before a change batch is emitted
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::ConfigDiagnostics;
use crate::watch::WatchOptions;

/// Shortest polling interval accepted.
pub const MIN_POLL_INTERVAL_MS: u64 = 1000;

/// File watcher settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Use polling instead of native notifications (network drives, containers).
    pub use_polling: bool,

    pub poll_interval_ms: u64,

    pub debounce_ms: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            use_polling: false,
            poll_interval_ms: MIN_POLL_INTERVAL_MS,
            debounce_ms: 300,
        }
    }
}

impl WatchConfig {
    pub fn options(&self) -> WatchOptions {
        WatchOptions {
            use_polling: self.use_polling,
            poll_interval: Duration::from_millis(self.poll_interval_ms),
        }
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn validate(&self, diag: &mut ConfigDiagnostics) {
        if self.poll_interval_ms < MIN_POLL_INTERVAL_MS {
            diag.error_with_hint(
                "watch.poll_interval_ms",
                format!("{} is below the polling granularity", self.poll_interval_ms),
                format!("use {MIN_POLL_INTERVAL_MS} or more"),
            );
        }
    }
}
