//! Session configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Session behaviour
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Master switch for capture and restore
    pub enabled: bool,
    /// Components scanned for opened tech; empty scans all
    pub unlock_components: Vec<String>,
    /// Period of the background flush
    pub flush_interval_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            unlock_components: Vec::new(),
            flush_interval_ms: 5_000,
        }
    }
}

impl SessionConfig {
    /// Flush period, at least one millisecond
    #[must_use]
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms.max(1))
    }
}
