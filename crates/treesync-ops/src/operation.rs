//! File operation types.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// What a [`FileOperation::Create`] makes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CreateKind {
    File,
    Directory,
}

/// A single file operation within a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileOperation {
    /// Create an empty file or directory, with any missing parents.
    Create { path: PathBuf, kind: CreateKind },
    /// Delete a file or directory tree.
    Delete { path: PathBuf },
    /// Move an entry to an exact destination path.
    Move {
        source: PathBuf,
        destination: PathBuf,
    },
    /// Copy an entry to an exact destination path.
    Copy {
        source: PathBuf,
        destination: PathBuf,
    },
    /// Rename an entry within its directory.
    Rename { source: PathBuf, new_name: String },
}

impl FileOperation {
    /// Create a file creation operation.
    pub fn create_file(path: impl Into<PathBuf>) -> Self {
        Self::Create {
            path: path.into(),
            kind: CreateKind::File,
        }
    }

    /// Create a directory creation operation.
    pub fn create_directory(path: impl Into<PathBuf>) -> Self {
        Self::Create {
            path: path.into(),
            kind: CreateKind::Directory,
        }
    }

    /// Create a delete operation.
    pub fn delete(path: impl Into<PathBuf>) -> Self {
        Self::Delete { path: path.into() }
    }

    /// Create a move operation.
    pub fn move_to(source: impl Into<PathBuf>, destination: impl Into<PathBuf>) -> Self {
        Self::Move {
            source: source.into(),
            destination: destination.into(),
        }
    }

    /// Create a copy operation.
    pub fn copy(source: impl Into<PathBuf>, destination: impl Into<PathBuf>) -> Self {
        Self::Copy {
            source: source.into(),
            destination: destination.into(),
        }
    }

    /// Create a rename operation.
    pub fn rename(source: impl Into<PathBuf>, new_name: impl Into<String>) -> Self {
        Self::Rename {
            source: source.into(),
            new_name: new_name.into(),
        }
    }

    /// Path the operation reads from or acts on.
    pub fn source(&self) -> &Path {
        match self {
            Self::Create { path, .. } | Self::Delete { path } => path,
            Self::Move { source, .. } | Self::Copy { source, .. } | Self::Rename { source, .. } => {
                source
            }
        }
    }

    /// Path that comes into existence, if any.
    pub fn destination(&self) -> Option<PathBuf> {
        match self {
            Self::Create { path, .. } => Some(path.clone()),
            Self::Delete { .. } => None,
            Self::Move { destination, .. } | Self::Copy { destination, .. } => {
                Some(destination.clone())
            }
            Self::Rename { source, new_name } => {
                Some(source.parent().unwrap_or(Path::new("")).join(new_name))
            }
        }
    }

    /// Every path the operation touches on disk.
    pub fn touched_paths(&self) -> Vec<PathBuf> {
        let mut paths = vec![self.source().to_path_buf()];
        if let Some(destination) = self.destination() {
            if destination != paths[0] {
                paths.push(destination);
            }
        }
        paths
    }

    /// Path that no longer exists once the operation succeeds.
    pub fn vacated(&self) -> Option<&Path> {
        match self {
            Self::Delete { path } => Some(path),
            Self::Move { source, .. } | Self::Rename { source, .. } => Some(source),
            Self::Create { .. } | Self::Copy { .. } => None,
        }
    }
}

impl std::fmt::Display for FileOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Create { path, kind } => {
                write!(f, "create {:?} {}", kind, path.display())
            }
            Self::Delete { path } => write!(f, "delete {}", path.display()),
            Self::Move {
                source,
                destination,
            } => write!(f, "move {} -> {}", source.display(), destination.display()),
            Self::Copy {
                source,
                destination,
            } => write!(f, "copy {} -> {}", source.display(), destination.display()),
            Self::Rename { source, new_name } => {
                write!(f, "rename {} -> {}", source.display(), new_name)
            }
        }
    }
}

/// An ordered batch of operations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
    /// Operations in submission order.
    pub operations: Vec<FileOperation>,
    /// Undo already-applied items if any item fails.
    #[serde(default)]
    pub atomic: bool,
}

impl Batch {
    /// A batch where failures are reported per item.
    pub fn new(operations: Vec<FileOperation>) -> Self {
        Self {
            operations,
            atomic: false,
        }
    }

    /// A batch that is applied entirely or not at all.
    pub fn atomic(operations: Vec<FileOperation>) -> Self {
        Self {
            operations,
            atomic: true,
        }
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rename_destination() {
        let op = FileOperation::rename("/a/b/old.txt", "new.txt");
        assert_eq!(op.destination(), Some(PathBuf::from("/a/b/new.txt")));
        assert_eq!(
            op.touched_paths(),
            vec![PathBuf::from("/a/b/old.txt"), PathBuf::from("/a/b/new.txt")]
        );
    }

    #[test]
    fn test_vacated_paths() {
        assert_eq!(FileOperation::delete("/x").vacated(), Some(Path::new("/x")));
        assert_eq!(FileOperation::copy("/a", "/b").vacated(), None);
        assert_eq!(FileOperation::create_file("/a").touched_paths().len(), 1);
    }
}
