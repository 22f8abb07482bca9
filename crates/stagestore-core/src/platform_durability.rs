//! Platform-specific durable sync for record files and directories
//!
//! Record files are flushed with the strongest primitive each platform offers.
//! Directory entries (new group directories, renamed groups, moved records)
//! are made durable by syncing the parent directory handle where the platform
//! supports it.

use std::fs::File;
use std::io;
use std::path::Path;

use crate::config::SyncMode;

/// Flush a file's data to persistent storage before returning.
///
/// - Linux: `fdatasync()`
/// - macOS/iOS: `fcntl(F_FULLFSYNC)`, since plain `fsync` stops at the drive cache
/// - Windows: `FlushFileBuffers()`
/// - Other: `File::sync_data()`
pub fn durable_sync(file: &File) -> io::Result<()> {
    #[cfg(target_os = "linux")]
    {
        use std::os::unix::io::AsRawFd;
        let fd = file.as_raw_fd();
        // SAFETY: fd comes from a live `File`, so it is open for the duration of the call.
        let result = unsafe { libc::fdatasync(fd) };
        if result == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }

    #[cfg(any(target_os = "macos", target_os = "ios"))]
    {
        use std::os::unix::io::AsRawFd;
        let fd = file.as_raw_fd();
        // SAFETY: fd comes from a live `File`, so it is open for the duration of the call.
        let result = unsafe { libc::fcntl(fd, libc::F_FULLFSYNC) };
        if result == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }

    #[cfg(target_os = "windows")]
    {
        use std::os::windows::io::AsRawHandle;
        use winapi::um::fileapi::FlushFileBuffers;
        let handle = file.as_raw_handle();
        // SAFETY: handle comes from a live `File`.
        let result = unsafe { FlushFileBuffers(handle as *mut _) };
        if result != 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "ios", target_os = "windows")))]
    {
        file.sync_data()
    }
}

/// Sync a directory so that entries created, renamed or removed inside it survive a crash.
///
/// Windows cannot open directories as files; there this is a no-op and NTFS
/// metadata journaling is relied upon.
pub fn sync_dir(path: &Path) -> io::Result<()> {
    #[cfg(unix)]
    {
        let dir = File::open(path)?;
        dir.sync_all()
    }

    #[cfg(not(unix))]
    {
        let _ = path;
        Ok(())
    }
}

/// Flush `file` only when `mode` asks for durability.
pub fn sync_file_with(mode: SyncMode, file: &File) -> io::Result<()> {
    if mode.is_durable() {
        durable_sync(file)
    } else {
        Ok(())
    }
}

/// Sync directory `path` only when `mode` asks for durability.
pub fn sync_dir_with(mode: SyncMode, path: &Path) -> io::Result<()> {
    if mode.is_durable() {
        sync_dir(path)
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_durable_sync_success() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"record bytes").unwrap();

        let result = durable_sync(file.as_file());
        assert!(result.is_ok(), "durable_sync failed: {:?}", result.err());
    }

    #[test]
    fn test_sync_dir_success() {
        let dir = tempfile::TempDir::new().unwrap();
        assert!(sync_dir(dir.path()).is_ok());
        assert!(sync_dir_with(SyncMode::OsBuffered, &dir.path().join("missing")).is_ok());
    }

    #[cfg(unix)]
    #[test]
    fn test_sync_dir_missing_path_fails_when_durable() {
        let dir = tempfile::TempDir::new().unwrap();
        let err = sync_dir_with(SyncMode::Durable, &dir.path().join("missing")).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}
