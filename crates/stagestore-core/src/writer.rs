//! Record writer
//!
//! A record is written in place: create (or truncate) the file, write every
//! byte, then flush before returning. There is no temp-file + rename step, so
//! a failed save may leave a partial file behind; the caller always sees the
//! error.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

use crate::config::SyncMode;
use crate::error::{StageError, StageResult};
use crate::platform_durability::sync_file_with;

/// Write `data` to `path`, replacing any previous content.
///
/// WRITE ORDERING:
/// 1. create/truncate the file
/// 2. write all bytes
/// 3. flush to persistent storage (durable mode)
/// 4. return
pub fn write_record(path: &Path, data: &[u8], mode: SyncMode) -> StageResult<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)
        .map_err(|e| StageError::io(path, e, "Failed to create record file"))?;

    file.write_all(data)
        .map_err(|e| StageError::io(path, e, "Record write failed"))?;

    sync_file_with(mode, &file)
        .map_err(|e| StageError::io(path, e, "Record durable_sync failed"))?;

    Ok(())
}

/// Read a whole record file.
pub fn read_record(path: &Path) -> StageResult<Vec<u8>> {
    std::fs::read(path).map_err(|e| StageError::io(path, e, "Failed to read record"))
}

/// Size of a record on disk, without reading it.
pub fn record_len(path: &Path) -> StageResult<u64> {
    let file = File::open(path).map_err(|e| StageError::io(path, e, "Failed to open record"))?;
    let meta = file.metadata().map_err(|e| StageError::io(path, e, "Failed to stat record"))?;
    Ok(meta.len())
}
