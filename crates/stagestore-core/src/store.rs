//! Storage handle and entry point of StageStore.
//!
//! `StageStore` owns a validated root and exposes the record lifecycle:
//!
//! **Save**: write a record into `current/<group>/`, flushed before returning
//! **Read**: stream every current record from a background thread
//! **Archive**: promote a group from `current/` to `archive/`, merging if needed
//!
//! `save` and `archive` run on the caller's thread. Within one process they are
//! serialized per group; scans are not, so archiving a group while a scan of it
//! is still being consumed makes later `content()` calls on its descriptors
//! fail. Drain a scan before archiving what it found.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, info};

use crate::access::check_storage_access;
use crate::archive::{archive_group, ArchiveMode, ArchiveReport};
use crate::config::Config;
use crate::error::{StageError, StageResult};
use crate::layout::{GroupName, Partition, RecordName, StageLayout};
use crate::locks::GroupLocks;
use crate::platform_durability::sync_dir_with;
use crate::scan::{RecordDescriptor, Scan};
use crate::stats::{MetricsSink, StageStats, StatsSnapshot};
use crate::writer::write_record;

/// Operations a caller needs from staged storage.
pub trait Persistence: Send + Sync {
    /// Persist `data` as record `record` of `group` in the current partition.
    fn save(&self, group: &str, record: &str, data: &[u8]) -> StageResult<()>;

    /// Start streaming every record of the current partition.
    fn read_all(&self) -> StageResult<Scan>;

    /// Promote `group` from the current partition to the archive partition.
    fn archive(&self, group: &str) -> StageResult<ArchiveReport>;
}

/// Filesystem-backed staged storage rooted at one directory.
///
/// All methods take `&self`; share the store between threads with `Arc`.
pub struct StageStore {
    layout: StageLayout,
    config: Config,
    locks: GroupLocks,
    stats: Arc<StageStats>,
}

impl StageStore {
    /// Open a store at `root` with the default (durable) configuration.
    pub fn open<P: AsRef<Path>>(root: P) -> StageResult<Self> {
        Self::open_with_config(root, Config::default())
    }

    /// Open a store at `root`.
    ///
    /// Validates the configuration, checks that `root` is readable and
    /// writable, then creates `current/` and `archive/` if missing. Nothing is
    /// returned unless every step succeeds.
    pub fn open_with_config<P: AsRef<Path>>(root: P, config: Config) -> StageResult<Self> {
        config.validate().map_err(StageError::InvalidConfig)?;

        let root = root.as_ref().to_path_buf();
        check_storage_access(&root)?;

        let layout = StageLayout::new(root);
        layout.ensure_partitions(config.sync_mode)?;

        info!("[StageStore] Opened storage at {}", layout.root().display());

        Ok(Self {
            layout,
            config,
            locks: GroupLocks::new(),
            stats: Arc::new(StageStats::new()),
        })
    }

    /// Write `data` as `record` in `group`, replacing a record of the same name.
    ///
    /// `record` may carry one leading `/` (`"/f1"` is stored as `f1`).
    pub fn save(&self, group: &str, record: &str, data: &[u8]) -> StageResult<()> {
        let group = GroupName::new(group)?;
        let record = RecordName::new(record)?;
        self.save_record(&group, &record, data)
    }

    /// [`save`](Self::save) with pre-validated names.
    pub fn save_record(&self, group: &GroupName, record: &RecordName, data: &[u8]) -> StageResult<()> {
        let size = data.len() as u64;
        if size > self.config.max_record_bytes {
            return Err(StageError::OversizedRecord {
                size,
                max: self.config.max_record_bytes,
            });
        }

        let mode = self.config.sync_mode;
        self.locks.with_group(group, || {
            let dir = self.layout.ensure_group(Partition::Current, group, mode)?;
            let path = self.layout.record_path(Partition::Current, group, record);
            write_record(&path, data, mode)?;
            // the new name lives in the group directory, not in the file
            sync_dir_with(mode, &dir).map_err(|e| StageError::io(&dir, e, "Failed to sync group directory"))
        })?;

        self.stats.record_save(size);
        debug!("saved {}/{} ({} bytes)", group, record, size);
        Ok(())
    }

    /// Stream every record in the current partition.
    ///
    /// Returns as soon as the background walk has started.
    pub fn read_all(&self) -> StageResult<Scan> {
        Scan::start(
            self.layout.partition_dir(Partition::Current),
            &self.config,
            Arc::clone(&self.stats),
        )
    }

    /// Promote `group` to the archive partition.
    ///
    /// Fails with [`StageError::GroupNotFound`] when the group has no
    /// current-side directory.
    pub fn archive(&self, group: &str) -> StageResult<ArchiveReport> {
        let group = GroupName::new(group)?;
        self.archive_group(&group)
    }

    /// [`archive`](Self::archive) with a pre-validated name.
    pub fn archive_group(&self, group: &GroupName) -> StageResult<ArchiveReport> {
        let report = self.locks.with_group(group, || {
            archive_group(&self.layout, group, self.config.sync_mode)
        })?;

        let merged = report.mode == ArchiveMode::Merged;
        self.stats.record_archive(merged, report.records_moved as u64);
        info!(
            "[StageStore] Archived group {} ({}, {} records)",
            group,
            if merged { "merged" } else { "renamed" },
            report.records_moved
        );
        Ok(report)
    }

    /// Group names present in `partition`, sorted.
    pub fn list_groups(&self, partition: Partition) -> StageResult<Vec<GroupName>> {
        let dir = self.layout.partition_dir(partition);
        let entries = std::fs::read_dir(&dir)
            .map_err(|e| StageError::io(&dir, e, "Failed to list partition"))?;

        let mut groups = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| StageError::io(&dir, e, "Failed to read partition entry"))?;
            if !entry.file_type().map_or(false, |kind| kind.is_dir()) {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if let Ok(group) = GroupName::new(name) {
                    groups.push(group);
                }
            }
        }
        groups.sort();
        Ok(groups)
    }

    /// Descriptors for every record archived under `group`, sorted by name.
    ///
    /// A group that was never archived has no records.
    pub fn archived_records(&self, group: &str) -> StageResult<Vec<RecordDescriptor>> {
        let group = GroupName::new(group)?;
        let dir = self.layout.group_dir(Partition::Archive, &group);
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StageError::io(&dir, e, "Failed to list archived group")),
        };

        let mut records = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| StageError::io(&dir, e, "Failed to read archived entry"))?;
            if entry.file_type().map_or(false, |kind| kind.is_dir()) {
                continue;
            }
            records.push(RecordDescriptor::new(
                entry.file_name().to_string_lossy().into_owned(),
                group.to_string(),
                entry.path(),
            ));
        }
        records.sort_by(|a, b| a.name().cmp(b.name()));
        Ok(records)
    }

    /// Storage root.
    pub fn root(&self) -> &Path {
        self.layout.root()
    }

    /// Path builder for this root.
    pub fn layout(&self) -> &StageLayout {
        &self.layout
    }

    /// Directory of `group` in `partition`.
    pub fn group_path(&self, partition: Partition, group: &GroupName) -> PathBuf {
        self.layout.group_dir(partition, group)
    }

    /// Active configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Counter snapshot.
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Push all counters to `sink`, labelled with the storage root.
    pub fn report_metrics(&self, sink: &dyn MetricsSink) {
        let root = self.layout.root().display().to_string();
        self.stats.report(sink, &[("root", root.as_str())]);
    }
}

impl Persistence for StageStore {
    fn save(&self, group: &str, record: &str, data: &[u8]) -> StageResult<()> {
        StageStore::save(self, group, record, data)
    }

    fn read_all(&self) -> StageResult<Scan> {
        StageStore::read_all(self)
    }

    fn archive(&self, group: &str) -> StageResult<ArchiveReport> {
        StageStore::archive(self, group)
    }
}

impl std::fmt::Debug for StageStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageStore")
            .field("root", &self.layout.root())
            .field("sync_mode", &self.config.sync_mode)
            .finish()
    }
}
