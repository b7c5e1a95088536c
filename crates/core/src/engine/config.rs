//! Engine configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the orchestration engine (`[engine]`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Global acquisition slots.
    #[serde(default = "default_acquisition_ceiling")]
    pub acquisition_ceiling: usize,

    /// Fallback admission tick when no event wakes the scheduler (milliseconds).
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// How often running phases persist progress and check signals (milliseconds).
    #[serde(default = "default_progress_interval")]
    pub progress_interval_ms: u64,

    /// A phase with no byte progress for this long fails as stalled.
    #[serde(default = "default_stall_timeout")]
    pub stall_timeout_secs: u64,

    /// Local staging area for acquired artifacts, one directory per item.
    #[serde(default = "default_staging_dir")]
    pub staging_dir: PathBuf,
}

fn default_acquisition_ceiling() -> usize {
    3
}

fn default_poll_interval() -> u64 {
    1000 // 1 second
}

fn default_progress_interval() -> u64 {
    1000 // 1 second
}

fn default_stall_timeout() -> u64 {
    120 // 2 minutes
}

fn default_staging_dir() -> PathBuf {
    std::env::temp_dir().join("mediarelay-staging")
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            acquisition_ceiling: default_acquisition_ceiling(),
            poll_interval_ms: default_poll_interval(),
            progress_interval_ms: default_progress_interval(),
            stall_timeout_secs: default_stall_timeout(),
            staging_dir: default_staging_dir(),
        }
    }
}

impl EngineConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms.max(1))
    }

    pub fn stall_timeout(&self) -> Duration {
        Duration::from_secs(self.stall_timeout_secs)
    }

    pub fn with_staging_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.staging_dir = dir.into();
        self
    }

    pub fn with_acquisition_ceiling(mut self, ceiling: usize) -> Self {
        self.acquisition_ceiling = ceiling;
        self
    }
}
