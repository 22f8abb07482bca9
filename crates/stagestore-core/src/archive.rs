//! Archiver: promotes a group from `current` to `archive`
//!
//! Two paths:
//! 1. No archive-side group yet: rename the whole directory (atomic).
//! 2. Archive-side group exists from an earlier cycle: move records one by
//!    one into it (same-name records are overwritten), then remove the empty
//!    current-side directory.
//!
//! The merge path is not transactional. The first failed move aborts the
//! operation and records already moved stay in the archive.

use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use crate::config::SyncMode;
use crate::error::{StageError, StageResult};
use crate::layout::{GroupName, Partition, StageLayout};
use crate::platform_durability::sync_dir_with;

/// How a group reached the archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveMode {
    /// Whole directory renamed into an empty slot
    Renamed,
    /// Records merged into an existing archive-side group
    Merged,
}

/// Result of a successful archive operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveReport {
    /// Archived group
    pub group: GroupName,
    /// Path taken
    pub mode: ArchiveMode,
    /// Entries that moved from `current` to `archive`
    pub records_moved: usize,
}

/// What occupies a path, looked up without following symlinks.
enum Slot {
    Missing,
    Dir,
    Other,
}

fn probe(path: &Path) -> StageResult<Slot> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => Ok(Slot::Dir),
        Ok(_) => Ok(Slot::Other),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(Slot::Missing),
        Err(e) => Err(StageError::io(path, e, "Failed to stat group directory")),
    }
}

fn not_a_directory(path: &Path) -> StageError {
    StageError::Io {
        path: Some(path.to_path_buf()),
        kind: ErrorKind::Other,
        message: "Group path exists and is not a directory".to_string(),
    }
}

/// Move `group` from the current partition into the archive partition.
///
/// A group with no current-side directory yields [`StageError::GroupNotFound`].
pub fn archive_group(layout: &StageLayout, group: &GroupName, mode: SyncMode) -> StageResult<ArchiveReport> {
    let from = layout.group_dir(Partition::Current, group);
    let to = layout.group_dir(Partition::Archive, group);

    match probe(&from)? {
        Slot::Dir => {}
        Slot::Missing => {
            return Err(StageError::GroupNotFound { group: group.to_string() });
        }
        Slot::Other => return Err(not_a_directory(&from)),
    }

    let (archive_mode, records_moved) = match probe(&to)? {
        Slot::Missing => (ArchiveMode::Renamed, rename_group(layout, &from, &to, mode)?),
        Slot::Dir => (ArchiveMode::Merged, merge_group(layout, &from, &to, mode)?),
        Slot::Other => return Err(not_a_directory(&to)),
    };

    Ok(ArchiveReport {
        group: group.clone(),
        mode: archive_mode,
        records_moved,
    })
}

fn rename_group(layout: &StageLayout, from: &Path, to: &Path, mode: SyncMode) -> StageResult<usize> {
    let records = fs::read_dir(from)
        .map_err(|e| StageError::io(from, e, "Failed to list group directory"))?
        .count();

    fs::rename(from, to).map_err(|e| StageError::io(from, e, "Failed to move group directory"))?;

    for partition in Partition::all() {
        let dir = layout.partition_dir(partition);
        sync_dir_with(mode, &dir).map_err(|e| StageError::io(&dir, e, "Failed to sync partition"))?;
    }
    Ok(records)
}

fn merge_group(layout: &StageLayout, from: &Path, to: &Path, mode: SyncMode) -> StageResult<usize> {
    let entries = fs::read_dir(from)
        .map_err(|e| StageError::io(from, e, "Failed to list group directory"))?;

    let mut moved = 0usize;
    for entry in entries {
        let entry = entry.map_err(|e| StageError::io(from, e, "Failed to read group entry"))?;
        let src = entry.path();
        let dest = to.join(entry.file_name());
        fs::rename(&src, &dest).map_err(|e| StageError::io(&src, e, "Failed to move record"))?;
        moved += 1;
    }

    sync_dir_with(mode, to).map_err(|e| StageError::io(to, e, "Failed to sync archive group"))?;

    // non-recursive: anything that appeared since the listing stays put and fails the call
    fs::remove_dir(from).map_err(|e| StageError::io(from, e, "Failed to remove archived group directory"))?;

    let current = layout.partition_dir(Partition::Current);
    sync_dir_with(mode, &current).map_err(|e| StageError::io(&current, e, "Failed to sync partition"))?;
    Ok(moved)
}
