//! Error types for StageStore operations
//!
//! Every fallible operation returns [`StageError`]. Errors are `Clone` so they
//! can travel over the scan error stream and be kept by consumers, which is
//! why the I/O variant stores the error kind and message instead of the
//! original `std::io::Error`.

use std::path::{Path, PathBuf};

use thiserror::Error;

/// StageStore error types with path context
#[derive(Debug, Clone, Error)]
pub enum StageError {
    /// Storage root cannot be listed or written at open time
    #[error("storage root {} is not accessible: {reason}", path.display())]
    PermissionDenied {
        /// The storage root that failed validation
        path: PathBuf,
        /// What the probe could not do
        reason: String,
    },

    /// I/O operation failed
    #[error("{}", fmt_io(path.as_deref(), *kind, message))]
    Io {
        /// The file or directory where the error occurred
        path: Option<PathBuf>,
        /// The underlying I/O error kind
        kind: std::io::ErrorKind,
        /// Human-readable description
        message: String,
    },

    /// Archiving a group that has no current-side directory
    #[error("group {group} has no current records to archive")]
    GroupNotFound {
        /// Requested group
        group: String,
    },

    /// Group or record name is not usable as a single path component
    #[error("invalid name {name:?}: {reason}")]
    InvalidName {
        /// The rejected name
        name: String,
        /// Why it was rejected
        reason: &'static str,
    },

    /// Record exceeds the configured size limit
    #[error("record too large: {size} bytes exceeds limit of {max} bytes")]
    OversizedRecord {
        /// Size of the rejected record
        size: u64,
        /// Configured maximum
        max: u64,
    },

    /// Configuration failed validation
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

fn fmt_io(path: Option<&Path>, kind: std::io::ErrorKind, message: &str) -> String {
    match path {
        Some(path) => format!("I/O error in {}: {} ({})", path.display(), message, kind),
        None => format!("I/O error: {} ({})", message, kind),
    }
}

impl StageError {
    /// Build an `Io` error for `path` with a short description of the step that failed.
    pub fn io(path: impl Into<PathBuf>, err: std::io::Error, context: &str) -> Self {
        StageError::Io {
            path: Some(path.into()),
            kind: err.kind(),
            message: format!("{}: {}", context, err),
        }
    }

    /// The I/O error kind, if this is an I/O error.
    pub fn io_kind(&self) -> Option<std::io::ErrorKind> {
        match self {
            StageError::Io { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// True for `GroupNotFound` and for I/O errors of kind `NotFound`.
    pub fn is_not_found(&self) -> bool {
        match self {
            StageError::GroupNotFound { .. } => true,
            StageError::Io { kind, .. } => *kind == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }

    /// Path the error refers to, when known.
    pub fn path(&self) -> Option<&Path> {
        match self {
            StageError::PermissionDenied { path, .. } => Some(path),
            StageError::Io { path, .. } => path.as_deref(),
            _ => None,
        }
    }
}

/// Result type alias for StageStore operations
pub type StageResult<T> = Result<T, StageError>;
