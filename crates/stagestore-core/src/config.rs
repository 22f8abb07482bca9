//! Configuration management for StageStore
//!
//! Provides durability presets and validation. The on-disk layout is fixed
//! and never configurable.

use std::time::Duration;

/// How record files and directory changes reach persistent storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    /// Flush record files and sync parent directories after create/rename.
    Durable,
    /// Leave flushing to the OS page cache.
    OsBuffered,
}

impl SyncMode {
    /// True when files and directories are synced before operations return.
    pub fn is_durable(self) -> bool {
        matches!(self, SyncMode::Durable)
    }
}

/// StageStore configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Durability of saves and archive moves
    pub sync_mode: SyncMode,
    /// Maximum record size in bytes
    pub max_record_bytes: u64,
    /// How often a blocked scan producer re-checks for cancellation
    pub emit_poll_interval: Duration,
    /// Thread name for background scans
    pub scan_thread_name: String,
}

impl Config {
    /// Every save is flushed before it returns.
    pub fn durable() -> Self {
        Self {
            sync_mode: SyncMode::Durable,
            max_record_bytes: 64 * 1024 * 1024,
            emit_poll_interval: Duration::from_millis(1),
            scan_thread_name: "stagestore-scan".to_string(),
        }
    }

    /// No fsync. Suited to tests and bulk loads that can be replayed.
    pub fn buffered() -> Self {
        Self {
            sync_mode: SyncMode::OsBuffered,
            ..Self::durable()
        }
    }

    /// Validate all configuration parameters
    pub fn validate(&self) -> Result<(), String> {
        if self.max_record_bytes == 0 {
            return Err("max_record_bytes must be > 0".into());
        }
        if self.emit_poll_interval.is_zero() {
            return Err("emit_poll_interval must be > 0".into());
        }
        if self.emit_poll_interval > Duration::from_secs(1) {
            return Err("emit_poll_interval must be <= 1s".into());
        }
        if self.scan_thread_name.trim().is_empty() {
            return Err("scan_thread_name must not be empty".into());
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self { Self::durable() }
}
