//! Error types shared by every treesync component.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::node::NodeId;

/// Errors surfaced by scans, git refreshes and file operations.
///
/// None of these are fatal to the process: the worst outcome is a stale tree
/// that heals on the next scan or refresh.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Path vanished between observation and use.
    #[error("Path not found: {path}")]
    NotFound { path: PathBuf },

    /// Permission denied for a path.
    #[error("Permission denied: {path}")]
    PermissionDenied { path: PathBuf },

    /// Expanding a symlink would re-enter a directory already on the chain.
    #[error("Symlink cycle: {path} resolves to {target}, already being expanded")]
    SymlinkCycle { path: PathBuf, target: PathBuf },

    /// Git could not be queried (no repository, failure or timeout).
    #[error("Git unavailable for {root}: {message}")]
    GitUnavailable { root: PathBuf, message: String },

    /// Move/copy/rename/create target already exists.
    #[error("Destination already exists: {path}")]
    ConflictingDestination { path: PathBuf },

    /// Some items of a non-atomic batch failed.
    #[error("{failed} of {total} operations failed")]
    PartialBatchFailure { failed: usize, total: usize },

    /// Generic I/O error.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Operation was cancelled before it could finish.
    #[error("Operation interrupted")]
    Interrupted,

    /// A directory moved while it was being read, so its listing was dropped.
    #[error("Directory moved while being read: {path}")]
    StaleListing { path: PathBuf },

    /// A file name failed validation.
    #[error("Invalid name '{name}': {reason}")]
    InvalidName { name: String, reason: String },

    /// A node identifier that is not (or no longer) in the tree.
    #[error("Unknown node {id}")]
    UnknownNode { id: NodeId },

    /// Path is not a directory.
    #[error("Not a directory: {path}")]
    NotADirectory { path: PathBuf },

    /// Invalid configuration.
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },
}

impl SyncError {
    /// Create an I/O error with path context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        match source.kind() {
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied { path },
            std::io::ErrorKind::NotFound => Self::NotFound { path },
            std::io::ErrorKind::AlreadyExists => Self::ConflictingDestination { path },
            _ => Self::Io { path, source },
        }
    }

    /// Whether the error means the path simply is not there any more.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Kind of scan warning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WarningKind {
    /// Permission was denied.
    PermissionDenied,
    /// Symbolic link target does not exist.
    BrokenSymlink,
    /// Error reading a directory.
    ReadError,
    /// Error reading metadata.
    MetadataError,
}

/// Non-fatal warning encountered during scan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanWarning {
    /// Path where the warning occurred.
    pub path: PathBuf,
    /// Human-readable message.
    pub message: String,
    /// Kind of warning.
    pub kind: WarningKind,
}

impl ScanWarning {
    /// Create a new scan warning.
    pub fn new(path: impl Into<PathBuf>, message: impl Into<String>, kind: WarningKind) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
            kind,
        }
    }

    /// Create a broken symlink warning.
    pub fn broken_symlink(path: impl Into<PathBuf>, target: &std::path::Path) -> Self {
        let path = path.into();
        Self {
            message: format!("Broken symlink: {} -> {}", path.display(), target.display()),
            path,
            kind: WarningKind::BrokenSymlink,
        }
    }

    /// Build a warning from an entry-level error.
    pub fn from_error(error: &SyncError) -> Self {
        let (path, kind) = match error {
            SyncError::PermissionDenied { path } => (path.clone(), WarningKind::PermissionDenied),
            SyncError::NotFound { path } | SyncError::Io { path, .. } => {
                (path.clone(), WarningKind::MetadataError)
            }
            _ => (PathBuf::new(), WarningKind::ReadError),
        };
        Self {
            path,
            message: error.to_string(),
            kind,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_error_io() {
        let err = SyncError::io(
            "/test/path",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        assert!(matches!(err, SyncError::PermissionDenied { .. }));

        let err = SyncError::io(
            "/test/path",
            std::io::Error::new(std::io::ErrorKind::AlreadyExists, "exists"),
        );
        assert!(matches!(err, SyncError::ConflictingDestination { .. }));
    }

    #[test]
    fn test_scan_warning_from_error() {
        let warning = ScanWarning::from_error(&SyncError::PermissionDenied {
            path: "/locked".into(),
        });
        assert_eq!(warning.kind, WarningKind::PermissionDenied);
        assert!(warning.message.contains("Permission denied"));
    }
}
