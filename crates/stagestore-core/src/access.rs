//! Storage root validation
//!
//! A root is usable when it can be listed and a probe file can be created
//! and removed inside it. Both checks run before any directory is created.

use std::fs;
use std::path::Path;

use log::debug;

use crate::error::{StageError, StageResult};

const PROBE_PREFIX: &str = "write-test.";
const PROBE_SUFFIX: &str = ".tmp";

/// Verify that `root` is a readable and writable directory.
pub fn check_storage_access(root: &Path) -> StageResult<()> {
    fs::read_dir(root).map_err(|e| StageError::PermissionDenied {
        path: root.to_path_buf(),
        reason: format!("cannot read from the storage directory: {}", e),
    })?;

    let probe = tempfile::Builder::new()
        .prefix(PROBE_PREFIX)
        .suffix(PROBE_SUFFIX)
        .tempfile_in(root)
        .map_err(|e| StageError::PermissionDenied {
            path: root.to_path_buf(),
            reason: format!("cannot write to the storage directory: {}", e),
        })?;

    debug!("write probe {} created", probe.path().display());

    probe.close().map_err(|e| StageError::PermissionDenied {
        path: root.to_path_buf(),
        reason: format!("cannot remove write probe from the storage directory: {}", e),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn leftover_probes(dir: &Path) -> usize {
        fs::read_dir(dir).unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_str().map_or(false, |n| n.starts_with(PROBE_PREFIX)))
            .count()
    }

    #[test]
    fn test_accessible_dir_passes() {
        let tmp = TempDir::new().unwrap();
        check_storage_access(tmp.path()).unwrap();
        assert_eq!(leftover_probes(tmp.path()), 0, "probe file must be removed");
    }

    #[test]
    fn test_missing_dir_is_permission_error() {
        let tmp = TempDir::new().unwrap();
        let err = check_storage_access(&tmp.path().join("nope")).unwrap_err();
        assert!(matches!(err, StageError::PermissionDenied { .. }), "got {:?}", err);
    }

    #[test]
    fn test_file_root_is_permission_error() {
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join("root.bin");
        fs::write(&file, b"x").unwrap();

        match check_storage_access(&file).unwrap_err() {
            StageError::PermissionDenied { path, reason } => {
                assert_eq!(path, file);
                assert!(reason.contains("cannot read"));
            }
            other => panic!("Expected PermissionDenied, got {:?}", other),
        }
    }
}
