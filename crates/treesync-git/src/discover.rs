//! Repository root discovery.

use std::path::{Path, PathBuf};

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::debug;

/// Name of the marker that identifies a working tree root.
const GIT_MARKER: &str = ".git";

/// Finds and caches the working tree root for paths under a scan root.
///
/// The walk from a path upwards stops at the scan root. If nothing below the
/// scan root is a repository, the repository enclosing the scan root itself
/// (looked up once) is the answer. Every directory visited on the way is
/// cached, misses included, so repeated lookups never walk again.
#[derive(Debug)]
pub struct RepoDiscovery {
    scan_root: PathBuf,
    cache: DashMap<PathBuf, Option<PathBuf>>,
    /// Repository enclosing the scan root, once looked up.
    enclosing: Mutex<Option<Option<PathBuf>>>,
}

impl RepoDiscovery {
    /// Create a discovery cache bounded by `scan_root`.
    pub fn new(scan_root: impl Into<PathBuf>) -> Self {
        Self {
            scan_root: treesync_core::paths::normalize(&scan_root.into()),
            cache: DashMap::new(),
            enclosing: Mutex::new(None),
        }
    }

    /// The scan root bounding the walk.
    pub fn scan_root(&self) -> &Path {
        &self.scan_root
    }

    /// Working tree root containing `path`, if any.
    ///
    /// `path` is treated as a directory when it is one on disk, otherwise
    /// its parent is the starting point.
    pub fn discover(&self, path: &Path) -> Option<PathBuf> {
        let path = treesync_core::paths::normalize(path);
        if !path.starts_with(&self.scan_root) {
            return find_upwards(&path);
        }
        let start = if path.is_dir() {
            path
        } else {
            path.parent().map(Path::to_path_buf).unwrap_or(path)
        };

        let mut visited = Vec::new();
        let mut found = None;
        for dir in start.ancestors() {
            if !dir.starts_with(&self.scan_root) {
                break;
            }
            if let Some(cached) = self.cache.get(dir) {
                found = Some(cached.value().clone());
                break;
            }
            visited.push(dir.to_path_buf());
            if has_marker(dir) {
                found = Some(Some(dir.to_path_buf()));
                break;
            }
        }

        let root = match found {
            Some(root) => root,
            None => self.enclosing_repo(),
        };
        for dir in visited {
            self.cache.insert(dir, root.clone());
        }
        root
    }

    /// Every repository root discovered so far.
    pub fn known_roots(&self) -> Vec<PathBuf> {
        let mut roots: Vec<PathBuf> = self
            .cache
            .iter()
            .filter_map(|entry| entry.value().clone())
            .chain(self.enclosing.lock().clone().flatten())
            .collect();
        roots.sort();
        roots.dedup();
        roots
    }

    /// Forget every cached answer, e.g. after `git init` or a deleted `.git`.
    pub fn invalidate(&self) {
        self.cache.clear();
        *self.enclosing.lock() = None;
    }

    fn enclosing_repo(&self) -> Option<PathBuf> {
        let mut enclosing = self.enclosing.lock();
        if let Some(cached) = enclosing.as_ref() {
            return cached.clone();
        }
        let root = self.scan_root.parent().and_then(find_upwards);
        debug!(
            scan_root = %self.scan_root.display(),
            repo = ?root,
            "looked up enclosing repository"
        );
        *enclosing = Some(root.clone());
        root
    }
}

fn find_upwards(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .find(|dir| has_marker(dir))
        .map(Path::to_path_buf)
}

/// `.git` may be a directory or, for worktrees and submodules, a file.
fn has_marker(dir: &Path) -> bool {
    std::fs::symlink_metadata(dir.join(GIT_MARKER)).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_discovers_nearest_marker() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        fs::create_dir_all(root.join("repo/.git")).unwrap();
        fs::create_dir_all(root.join("repo/src/deep")).unwrap();
        fs::write(root.join("repo/src/deep/f.rs"), "").unwrap();

        let discovery = RepoDiscovery::new(root);
        assert_eq!(
            discovery.discover(&root.join("repo/src/deep/f.rs")),
            Some(root.join("repo"))
        );
        assert_eq!(discovery.known_roots(), vec![root.join("repo")]);
    }

    #[test]
    fn test_miss_is_cached() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("plain");
        fs::create_dir_all(root.join("a/b")).unwrap();

        let discovery = RepoDiscovery::new(&root);
        assert_eq!(discovery.discover(&root.join("a/b")), None);

        // A marker appearing later is not seen until the cache is dropped.
        fs::create_dir(root.join(".git")).unwrap();
        assert_eq!(discovery.discover(&root.join("a/b")), None);
        discovery.invalidate();
        assert_eq!(discovery.discover(&root.join("a/b")), Some(root.clone()));
    }

    #[test]
    fn test_scan_root_inside_repository() {
        let temp = TempDir::new().unwrap();
        let repo = temp.path().join("repo");
        fs::create_dir_all(repo.join(".git")).unwrap();
        fs::create_dir_all(repo.join("src/nested")).unwrap();

        let discovery = RepoDiscovery::new(repo.join("src"));
        assert_eq!(discovery.discover(&repo.join("src/nested")), Some(repo));
    }

    #[test]
    fn test_git_file_marker() {
        let temp = TempDir::new().unwrap();
        let worktree = temp.path().join("wt");
        fs::create_dir_all(&worktree).unwrap();
        fs::write(worktree.join(".git"), "gitdir: /elsewhere").unwrap();

        let discovery = RepoDiscovery::new(temp.path());
        assert_eq!(discovery.discover(&worktree), Some(worktree));
    }
}
