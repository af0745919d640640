//! Engine configuration.

use std::time::Duration;

/// Configuration for the vault engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Days a trashed item remains recoverable before the sweeper purges it.
    pub retention_days: u32,
    /// Maximum expired-trash rows examined per sweep run.
    pub sweep_batch_limit: usize,
    /// Interval between scheduled sweep runs.
    pub sweep_interval: Duration,
    /// Whether sibling name collisions are detected case-insensitively.
    pub case_insensitive_names: bool,
    /// Maximum encoded materialized-path length (bounds index key size).
    pub max_path_len: usize,
    /// Per-owner storage quota in bytes (None = unlimited).
    pub quota_bytes: Option<u64>,
}

impl EngineConfig {
    /// Create a configuration with default settings.
    pub fn new() -> Self {
        Self {
            retention_days: 30,
            sweep_batch_limit: 500,
            sweep_interval: Duration::from_secs(24 * 60 * 60),
            case_insensitive_names: true,
            max_path_len: 4096,
            quota_bytes: None,
        }
    }

    /// Set the trash retention window in days.
    pub fn with_retention_days(mut self, days: u32) -> Self {
        self.retention_days = days;
        self
    }

    /// Set the per-run sweep batch limit.
    pub fn with_sweep_batch_limit(mut self, limit: usize) -> Self {
        self.sweep_batch_limit = limit;
        self
    }

    /// Set the interval between scheduled sweeps.
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Enable or disable case-insensitive sibling collision checks.
    pub fn with_case_insensitive_names(mut self, enabled: bool) -> Self {
        self.case_insensitive_names = enabled;
        self
    }

    /// Set the maximum encoded path length.
    pub fn with_max_path_len(mut self, len: usize) -> Self {
        self.max_path_len = len;
        self
    }

    /// Set a per-owner storage quota.
    pub fn with_quota_bytes(mut self, quota: u64) -> Self {
        self.quota_bytes = Some(quota);
        self
    }

    /// The retention window as a chrono duration.
    pub fn retention_window(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.retention_days))
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new()
    }
}
