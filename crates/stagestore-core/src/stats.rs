//! Operation counters and the metrics push interface
//!
//! Counters are plain atomics updated on the hot path. A metrics service
//! (not part of this crate) receives them through [`MetricsSink`].

use std::sync::atomic::{AtomicU64, Ordering};

/// Receives named gauge values pushed by the store.
pub trait MetricsSink {
    /// Record the current value of `name` with the given labels.
    fn set_gauge(&self, name: &str, value: f64, labels: &[(&str, &str)]);
}

/// Counters shared by every operation on a store.
#[derive(Debug, Default)]
pub struct StageStats {
    records_saved: AtomicU64,
    bytes_saved: AtomicU64,
    scans_started: AtomicU64,
    records_emitted: AtomicU64,
    scan_errors: AtomicU64,
    groups_archived: AtomicU64,
    groups_merged: AtomicU64,
    records_archived: AtomicU64,
}

/// Point-in-time copy of [`StageStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Successful saves
    pub records_saved: u64,
    /// Bytes written by successful saves
    pub bytes_saved: u64,
    /// `read_all` calls
    pub scans_started: u64,
    /// Descriptors delivered to consumers
    pub records_emitted: u64,
    /// Errors delivered on scan error streams
    pub scan_errors: u64,
    /// Successful archive operations (rename or merge)
    pub groups_archived: u64,
    /// Archive operations that merged into an existing archive group
    pub groups_merged: u64,
    /// Records moved into the archive partition
    pub records_archived: u64,
}

impl StatsSnapshot {
    /// Counter names and values, in a stable order.
    pub fn fields(&self) -> [(&'static str, u64); 8] {
        [
            ("stagestore_records_saved", self.records_saved),
            ("stagestore_bytes_saved", self.bytes_saved),
            ("stagestore_scans_started", self.scans_started),
            ("stagestore_records_emitted", self.records_emitted),
            ("stagestore_scan_errors", self.scan_errors),
            ("stagestore_groups_archived", self.groups_archived),
            ("stagestore_groups_merged", self.groups_merged),
            ("stagestore_records_archived", self.records_archived),
        ]
    }
}

impl StageStats {
    /// Create zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_save(&self, bytes: u64) {
        self.records_saved.fetch_add(1, Ordering::Relaxed);
        self.bytes_saved.fetch_add(bytes, Ordering::Relaxed);
    }

    pub(crate) fn record_scan_started(&self) {
        self.scans_started.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_emitted(&self) {
        self.records_emitted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_scan_error(&self) {
        self.scan_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_archive(&self, merged: bool, records_moved: u64) {
        self.groups_archived.fetch_add(1, Ordering::Relaxed);
        self.records_archived.fetch_add(records_moved, Ordering::Relaxed);
        if merged {
            self.groups_merged.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Copy all counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            records_saved: self.records_saved.load(Ordering::Relaxed),
            bytes_saved: self.bytes_saved.load(Ordering::Relaxed),
            scans_started: self.scans_started.load(Ordering::Relaxed),
            records_emitted: self.records_emitted.load(Ordering::Relaxed),
            scan_errors: self.scan_errors.load(Ordering::Relaxed),
            groups_archived: self.groups_archived.load(Ordering::Relaxed),
            groups_merged: self.groups_merged.load(Ordering::Relaxed),
            records_archived: self.records_archived.load(Ordering::Relaxed),
        }
    }

    /// Push every counter to `sink` with the given labels.
    pub fn report(&self, sink: &dyn MetricsSink, labels: &[(&str, &str)]) {
        for (name, value) in self.snapshot().fields() {
            sink.set_gauge(name, value as f64, labels);
        }
    }
}
