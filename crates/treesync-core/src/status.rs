//! Per-repository status mapping.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::node::GitStatus;

/// Status of every path git reported for one repository root.
///
/// Paths are absolute. Directories that git collapses (an untracked or
/// ignored directory reported as a whole) pass their status down to every
/// descendant.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepoStatus {
    root: PathBuf,
    entries: HashMap<PathBuf, GitStatus>,
}

impl RepoStatus {
    /// Create an empty mapping for `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            entries: HashMap::new(),
        }
    }

    /// Repository working-tree root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Record a signal for `path`, keeping the higher-precedence status.
    pub fn record(&mut self, path: impl Into<PathBuf>, status: GitStatus) {
        let entry = self.entries.entry(path.into()).or_insert(status);
        *entry = entry.combine(status);
    }

    /// Raw mapping as reported.
    pub fn entries(&self) -> &HashMap<PathBuf, GitStatus> {
        &self.entries
    }

    /// Status reported for exactly `path`, if any.
    pub fn get(&self, path: &Path) -> Option<GitStatus> {
        self.entries.get(path).copied()
    }

    /// Number of reported paths.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether git reported nothing.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether `path` lies inside this repository's working tree.
    pub fn contains(&self, path: &Path) -> bool {
        path.starts_with(&self.root)
    }

    /// Classify a path inside the working tree.
    ///
    /// Exact entries win, then an untracked/ignored ancestor directory,
    /// then `Unmodified`. The `.git` directory itself counts as ignored.
    pub fn classify(&self, path: &Path) -> GitStatus {
        if !self.contains(path) {
            return GitStatus::NotInRepo;
        }
        if path.starts_with(self.root.join(".git")) {
            return GitStatus::Ignored;
        }
        if let Some(status) = self.get(path) {
            return status;
        }
        path.ancestors()
            .skip(1)
            .take_while(|ancestor| ancestor.starts_with(&self.root))
            .find_map(|ancestor| match self.get(ancestor) {
                Some(status @ (GitStatus::Untracked | GitStatus::Ignored)) => Some(status),
                _ => None,
            })
            .unwrap_or(GitStatus::Unmodified)
    }
}
