//! Compensation log for atomic batches.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use treesync_core::SyncError;

use crate::delete::remove_entry;
use crate::move_op::move_entry;

/// A change applied to disk that can be undone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum UndoableOperation {
    /// `path` was created; `topmost` is the outermost directory created
    /// along with it (or `path` itself).
    Created { path: PathBuf, topmost: PathBuf },
    /// An entry was moved or renamed.
    Moved { from: PathBuf, to: PathBuf },
    /// An entry was copied to `created`.
    Copied { created: PathBuf },
    /// An entry was deleted. `staged` holds it when the deletion is still
    /// reversible.
    Deleted {
        original: PathBuf,
        staged: Option<PathBuf>,
    },
}

impl UndoableOperation {
    /// Paths whose parent directories this change touches in the tree.
    pub fn affected_paths(&self) -> Vec<&Path> {
        match self {
            Self::Created { topmost, .. } => vec![topmost.as_path()],
            Self::Moved { from, to } => vec![from.as_path(), to.as_path()],
            Self::Copied { created } => vec![created.as_path()],
            Self::Deleted { original, .. } => vec![original.as_path()],
        }
    }

    /// The path the change is about: what was created, moved from, copied
    /// to or deleted.
    pub fn primary_path(&self) -> &Path {
        match self {
            Self::Created { path, .. } => path,
            Self::Moved { from, .. } => from,
            Self::Copied { created } => created,
            Self::Deleted { original, .. } => original,
        }
    }

    /// A delete that is still reversible until finalized.
    pub(crate) fn is_staged_delete(&self) -> bool {
        matches!(self, Self::Deleted { staged: Some(_), .. })
    }

    /// Undo the change on disk. Blocking.
    pub(crate) fn compensate(&self) -> Result<(), SyncError> {
        match self {
            Self::Created { topmost, .. } => remove_entry(topmost),
            Self::Moved { from, to } => move_entry(to, from),
            Self::Copied { created } => remove_entry(created),
            Self::Deleted {
                original,
                staged: Some(staged),
            } => fs::rename(staged, original).map_err(|e| SyncError::io(original, e)),
            Self::Deleted { original, .. } => Err(SyncError::Io {
                path: original.clone(),
                source: std::io::Error::other("permanently deleted"),
            }),
        }
    }

    /// Make the change permanent. Blocking.
    pub(crate) fn finalize(&self) -> Result<(), SyncError> {
        match self {
            Self::Deleted {
                staged: Some(staged),
                ..
            } => remove_entry(staged),
            _ => Ok(()),
        }
    }
}

/// One applied item of an atomic batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UndoEntry {
    /// Position of the item in its batch.
    pub index: usize,
    pub operation: UndoableOperation,
}

/// Changes applied so far by an atomic batch, oldest first.
#[derive(Debug, Default)]
pub struct UndoLog {
    entries: Vec<UndoEntry>,
}

impl UndoLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an applied item.
    pub fn record(&mut self, index: usize, operation: UndoableOperation) {
        self.entries.push(UndoEntry { index, operation });
    }

    /// Get the number of entries in the log.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the log is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries oldest first, the order they are committed in.
    pub fn into_entries(self) -> Vec<UndoEntry> {
        self.entries
    }
}
