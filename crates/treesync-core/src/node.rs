//! Node types for the mirrored tree.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::fs::{self, Metadata};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use compact_str::CompactString;
use serde::{Deserialize, Serialize};
use strum::Display;

use crate::error::SyncError;

/// Stable identifier for a path within a tree's lifetime.
///
/// Identifiers are allocated monotonically and never reused once retired.
/// A rename rebinds the path of an existing identifier instead of minting a
/// new one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u64);

impl NodeId {
    /// Create a new NodeId from a u64.
    pub fn new(id: u64) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Version-control status of a node.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, Display,
)]
pub enum GitStatus {
    /// Tracked and clean.
    Unmodified,
    /// Present on disk but not tracked.
    Untracked,
    /// Tracked with unstaged changes.
    Modified,
    /// Changes staged in the index.
    Staged,
    /// Matched by an ignore rule.
    Ignored,
    /// Outside any discovered repository.
    #[default]
    NotInRepo,
}

impl GitStatus {
    /// Rank used when several signals apply to one path.
    ///
    /// `Staged > Modified > Untracked > Ignored > Unmodified > NotInRepo`.
    pub fn precedence(self) -> u8 {
        match self {
            Self::Staged => 5,
            Self::Modified => 4,
            Self::Untracked => 3,
            Self::Ignored => 2,
            Self::Unmodified => 1,
            Self::NotInRepo => 0,
        }
    }

    /// Pick whichever of two statuses wins under [`precedence`](Self::precedence).
    pub fn combine(self, other: Self) -> Self {
        if other.precedence() > self.precedence() {
            other
        } else {
            self
        }
    }
}

/// Where a symbolic link points.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SymlinkTarget {
    /// Fully resolved, existing target.
    Resolved(PathBuf),
    /// Broken or looping link; holds the raw link text.
    Unresolved(PathBuf),
}

impl SymlinkTarget {
    /// Whether the target could not be resolved.
    pub fn is_broken(&self) -> bool {
        matches!(self, Self::Unresolved(_))
    }

    /// The resolved path, if any.
    pub fn resolved(&self) -> Option<&Path> {
        match self {
            Self::Resolved(path) => Some(path),
            Self::Unresolved(_) => None,
        }
    }
}

/// Type of file system node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeKind {
    /// Regular file.
    File {
        /// Whether the file is executable.
        executable: bool,
    },
    /// Directory.
    Directory,
    /// Symbolic link. The node keeps this kind even when the target is a directory.
    Symlink {
        /// Link target.
        target: SymlinkTarget,
        /// Whether the resolved target is a directory.
        points_to_dir: bool,
    },
}

impl NodeKind {
    /// Check if this is a directory.
    pub fn is_dir(&self) -> bool {
        matches!(self, NodeKind::Directory)
    }

    /// Check if this is a regular file.
    pub fn is_file(&self) -> bool {
        matches!(self, NodeKind::File { .. })
    }

    /// Check if this is a symlink.
    pub fn is_symlink(&self) -> bool {
        matches!(self, NodeKind::Symlink { .. })
    }

    /// Whether the node can hold children: a directory, or a link to one.
    pub fn is_container(&self) -> bool {
        match self {
            NodeKind::Directory => true,
            NodeKind::Symlink { points_to_dir, .. } => *points_to_dir,
            NodeKind::File { .. } => false,
        }
    }
}

/// One directory entry as observed on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryObservation {
    /// Absolute path of the entry.
    pub path: PathBuf,
    /// Basename.
    pub name: CompactString,
    /// Entry type.
    pub kind: NodeKind,
    /// Size in bytes (0 for directories and links).
    pub size: u64,
    /// Last modification time, if the platform reports one.
    pub modified: Option<SystemTime>,
}

impl EntryObservation {
    /// Stat `path` without following a final symlink.
    pub fn stat(path: &Path) -> Result<Self, SyncError> {
        let metadata = fs::symlink_metadata(path).map_err(|e| SyncError::io(path, e))?;
        Ok(Self::from_metadata(path, &metadata))
    }

    /// Build an observation from `lstat` metadata already in hand.
    pub fn from_metadata(path: &Path, metadata: &Metadata) -> Self {
        let name = path
            .file_name()
            .map(|n| CompactString::new(n.to_string_lossy()))
            .unwrap_or_else(|| CompactString::new(path.to_string_lossy()));

        let file_type = metadata.file_type();
        let kind = if file_type.is_symlink() {
            let raw = fs::read_link(path).unwrap_or_default();
            match fs::canonicalize(path) {
                Ok(resolved) => {
                    let points_to_dir = resolved.is_dir();
                    NodeKind::Symlink {
                        target: SymlinkTarget::Resolved(resolved),
                        points_to_dir,
                    }
                }
                Err(_) => NodeKind::Symlink {
                    target: SymlinkTarget::Unresolved(raw),
                    points_to_dir: false,
                },
            }
        } else if file_type.is_dir() {
            NodeKind::Directory
        } else {
            NodeKind::File {
                executable: is_executable(metadata),
            }
        };

        Self {
            path: path.to_path_buf(),
            name,
            size: if file_type.is_file() { metadata.len() } else { 0 },
            modified: metadata.modified().ok(),
            kind,
        }
    }
}

/// A single entry in the mirrored tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    /// Stable identifier.
    pub id: NodeId,
    /// Absolute path.
    pub path: PathBuf,
    /// Basename.
    pub name: CompactString,
    /// Node type and link target.
    pub kind: NodeKind,
    /// Parent directory; `None` only for the root.
    pub parent: Option<NodeId>,
    /// Children as an unordered set. Render order is computed on read.
    pub children: HashSet<NodeId>,
    /// Size in bytes.
    pub size: u64,
    /// Last modification time.
    pub modified: Option<SystemTime>,
    /// Version-control status.
    pub git_status: GitStatus,
    /// Whether the directory is expanded (drives recursive rescans).
    pub expanded: bool,
    /// Last changeset generation that confirmed this node exists.
    pub scan_generation: u64,
}

impl Node {
    pub(crate) fn from_observation(
        id: NodeId,
        parent: Option<NodeId>,
        entry: EntryObservation,
        generation: u64,
        git_status: GitStatus,
    ) -> Self {
        Self {
            id,
            path: entry.path,
            name: entry.name,
            kind: entry.kind,
            parent,
            children: HashSet::new(),
            size: entry.size,
            modified: entry.modified,
            git_status,
            expanded: false,
            scan_generation: generation,
        }
    }

    /// Check if this node is a directory.
    pub fn is_dir(&self) -> bool {
        self.kind.is_dir()
    }

    /// Whether the node can hold children.
    pub fn is_container(&self) -> bool {
        self.kind.is_container()
    }

    /// Dotfiles.
    pub fn is_hidden(&self) -> bool {
        self.name.starts_with('.')
    }

    /// Whether `entry` carries metadata that differs from this node.
    pub fn differs_from(&self, entry: &EntryObservation) -> bool {
        self.kind != entry.kind || self.size != entry.size || self.modified != entry.modified
    }

    /// Overwrite metadata in place. Identity, expansion and status are kept.
    pub(crate) fn refresh_from(&mut self, entry: EntryObservation) {
        self.kind = entry.kind;
        self.size = entry.size;
        self.modified = entry.modified;
    }
}

/// Render order: directories (and links to them) first, then case-insensitive
/// name, then the exact name as a tie-breaker.
pub fn render_order(a: &Node, b: &Node) -> Ordering {
    b.is_container()
        .cmp(&a.is_container())
        .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
        .then_with(|| a.name.cmp(&b.name))
}

/// Check if a file is executable (Unix).
#[cfg(unix)]
fn is_executable(metadata: &Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn is_executable(_metadata: &Metadata) -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn node(id: u64, name: &str, kind: NodeKind) -> Node {
        Node::from_observation(
            NodeId::new(id),
            None,
            EntryObservation {
                path: PathBuf::from("/t").join(name),
                name: name.into(),
                kind,
                size: 0,
                modified: None,
            },
            0,
            GitStatus::NotInRepo,
        )
    }

    #[test]
    fn test_status_precedence() {
        assert_eq!(GitStatus::Ignored.combine(GitStatus::Untracked), GitStatus::Untracked);
        assert_eq!(GitStatus::Staged.combine(GitStatus::Modified), GitStatus::Staged);
        assert_eq!(GitStatus::Unmodified.combine(GitStatus::Ignored), GitStatus::Ignored);
        assert_eq!(GitStatus::default(), GitStatus::NotInRepo);
    }

    #[test]
    fn test_render_order_dirs_first_case_insensitive() {
        let mut nodes = vec![
            node(1, "b.txt", NodeKind::File { executable: false }),
            node(2, "Zeta", NodeKind::Directory),
            node(3, "A.txt", NodeKind::File { executable: false }),
            node(4, "alpha", NodeKind::Directory),
        ];
        nodes.sort_by(render_order);
        let names: Vec<&str> = nodes.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "Zeta", "A.txt", "b.txt"]);
    }

    #[test]
    fn test_stat_file_and_dir() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("f.txt"), "hello").unwrap();
        std::fs::create_dir(temp.path().join("d")).unwrap();

        let file = EntryObservation::stat(&temp.path().join("f.txt")).unwrap();
        assert!(file.kind.is_file());
        assert_eq!(file.size, 5);
        assert_eq!(file.name.as_str(), "f.txt");

        let dir = EntryObservation::stat(&temp.path().join("d")).unwrap();
        assert!(dir.kind.is_dir());
        assert!(dir.kind.is_container());
    }

    #[test]
    fn test_stat_missing_is_not_found() {
        let temp = TempDir::new().unwrap();
        let err = EntryObservation::stat(&temp.path().join("nope")).unwrap_err();
        assert!(matches!(err, SyncError::NotFound { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn test_stat_broken_symlink_is_unresolved() {
        let temp = TempDir::new().unwrap();
        let link = temp.path().join("dangling");
        std::os::unix::fs::symlink(temp.path().join("missing"), &link).unwrap();

        let entry = EntryObservation::stat(&link).unwrap();
        match entry.kind {
            NodeKind::Symlink { target, points_to_dir } => {
                assert!(target.is_broken());
                assert!(!points_to_dir);
            }
            other => panic!("expected symlink, got {other:?}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_stat_symlink_to_dir_is_container() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir(temp.path().join("real")).unwrap();
        let link = temp.path().join("link");
        std::os::unix::fs::symlink(temp.path().join("real"), &link).unwrap();

        let entry = EntryObservation::stat(&link).unwrap();
        assert!(entry.kind.is_symlink());
        assert!(entry.kind.is_container());
    }
}
