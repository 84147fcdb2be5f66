use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Timing and queueing knobs for a sync session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// A download with no traffic for this long is abandoned
    /// Default: 8000 ms
    pub watchdog_ms: u64,

    /// A catalog fetch with no traffic for this long is considered complete
    /// Default: 1500 ms
    pub catalog_idle_ms: u64,

    /// Minimum spacing between progress reports (0% and 100% always go out)
    /// Default: 200 ms
    pub progress_interval_ms: u64,

    /// Pause between handshake requests after connecting
    /// Default: 100 ms
    pub handshake_delay_ms: u64,

    /// Capacity of the command channel into the connection task
    pub command_queue: usize,
}

impl SyncConfig {
    pub fn watchdog(&self) -> Duration {
        Duration::from_millis(self.watchdog_ms)
    }

    pub fn catalog_idle(&self) -> Duration {
        Duration::from_millis(self.catalog_idle_ms)
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }

    pub fn handshake_delay(&self) -> Duration {
        Duration::from_millis(self.handshake_delay_ms)
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            watchdog_ms: 8000,
            catalog_idle_ms: 1500,
            progress_interval_ms: 200,
            handshake_delay_ms: 100,
            command_queue: 16,
        }
    }
}
