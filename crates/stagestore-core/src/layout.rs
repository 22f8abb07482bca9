//! On-disk layout: partitions, validated names, and directory lifecycle
//!
//! ```text
//! <root>/current/<group>/<record>
//! <root>/archive/<group>/<record>
//! ```
//!
//! Group and record names are always single path components, so a record can
//! only ever land inside its group directory.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::config::SyncMode;
use crate::error::{StageError, StageResult};
use crate::platform_durability::sync_dir_with;

/// Name of the partition holding unarchived groups
pub const CURRENT_DIR: &str = "current";
/// Name of the partition holding archived groups
pub const ARCHIVE_DIR: &str = "archive";

/// One of the two lifecycle partitions under the storage root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Partition {
    /// Active groups still receiving writes
    Current,
    /// Promoted groups
    Archive,
}

impl Partition {
    /// Directory name of the partition under the root.
    pub fn dir_name(self) -> &'static str {
        match self {
            Partition::Current => CURRENT_DIR,
            Partition::Archive => ARCHIVE_DIR,
        }
    }

    /// Both partitions, in creation order.
    pub fn all() -> [Partition; 2] {
        [Partition::Current, Partition::Archive]
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

fn check_component(name: &str) -> Result<(), &'static str> {
    if name.is_empty() {
        return Err("name is empty");
    }
    if name == "." || name == ".." {
        return Err("name is a relative path component");
    }
    if name.contains('/') || name.contains('\\') {
        return Err("name contains a path separator");
    }
    if name.contains('\0') {
        return Err("name contains a NUL byte");
    }
    Ok(())
}

/// Validated group identifier, used verbatim as a directory name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupName(String);

impl GroupName {
    /// Validate `name` as a group identifier.
    pub fn new(name: &str) -> StageResult<Self> {
        check_component(name).map_err(|reason| StageError::InvalidName {
            name: name.to_string(),
            reason,
        })?;
        Ok(Self(name.to_string()))
    }

    /// The identifier as given.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GroupName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for GroupName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for GroupName {
    type Err = StageError;

    fn from_str(s: &str) -> StageResult<Self> {
        Self::new(s)
    }
}

impl TryFrom<&str> for GroupName {
    type Error = StageError;

    fn try_from(s: &str) -> StageResult<Self> {
        Self::new(s)
    }
}

/// Validated record file name.
///
/// Older callers name records `"/f1"`; one leading `/` is accepted and
/// stripped, so `"/f1"` and `"f1"` name the same file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordName(String);

impl RecordName {
    /// Validate `name` as a record file name.
    pub fn new(name: &str) -> StageResult<Self> {
        let bare = name.strip_prefix('/').unwrap_or(name);
        check_component(bare).map_err(|reason| StageError::InvalidName {
            name: name.to_string(),
            reason,
        })?;
        Ok(Self(bare.to_string()))
    }

    /// File name without any leading separator.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for RecordName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for RecordName {
    type Err = StageError;

    fn from_str(s: &str) -> StageResult<Self> {
        Self::new(s)
    }
}

impl TryFrom<&str> for RecordName {
    type Error = StageError;

    fn try_from(s: &str) -> StageResult<Self> {
        Self::new(s)
    }
}

/// Builds every path under a storage root.
#[derive(Debug, Clone)]
pub struct StageLayout {
    root: PathBuf,
}

impl StageLayout {
    /// Layout rooted at `root`. Nothing is touched on disk.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The storage root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `<root>/<partition>`
    pub fn partition_dir(&self, partition: Partition) -> PathBuf {
        self.root.join(partition.dir_name())
    }

    /// `<root>/<partition>/<group>`
    pub fn group_dir(&self, partition: Partition, group: &GroupName) -> PathBuf {
        self.partition_dir(partition).join(group.as_str())
    }

    /// `<root>/<partition>/<group>/<record>`
    pub fn record_path(&self, partition: Partition, group: &GroupName, record: &RecordName) -> PathBuf {
        self.group_dir(partition, group).join(record.as_str())
    }

    /// Create both partitions if they are missing.
    pub fn ensure_partitions(&self, mode: SyncMode) -> StageResult<()> {
        for partition in Partition::all() {
            ensure_dir(&self.partition_dir(partition), mode)?;
        }
        Ok(())
    }

    /// Create the group directory in `partition` if it is missing.
    pub fn ensure_group(&self, partition: Partition, group: &GroupName, mode: SyncMode) -> StageResult<PathBuf> {
        let dir = self.group_dir(partition, group);
        ensure_dir(&dir, mode)?;
        Ok(dir)
    }
}

/// Create a single directory if it does not exist.
///
/// Returns `true` when the directory was created by this call. An existing
/// directory (including one created concurrently) is success; an existing
/// non-directory is an error. In durable mode the parent is synced after a
/// creation so the new entry survives a crash.
pub fn ensure_dir(path: &Path, mode: SyncMode) -> StageResult<bool> {
    match fs::create_dir(path) {
        Ok(()) => {
            if let Some(parent) = path.parent() {
                sync_dir_with(mode, parent)
                    .map_err(|e| StageError::io(parent, e, "Failed to sync parent directory"))?;
            }
            Ok(true)
        }
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
            if path.is_dir() {
                Ok(false)
            } else {
                Err(StageError::Io {
                    path: Some(path.to_path_buf()),
                    kind: std::io::ErrorKind::AlreadyExists,
                    message: "Path exists and is not a directory".to_string(),
                })
            }
        }
        Err(e) => Err(StageError::io(path, e, "Failed to create directory")),
    }
}
