//! Git status queries through libgit2.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use git2::{Repository, Status, StatusOptions};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use treesync_core::{EngineConfig, GitStatus, RepoStatus, SyncError};

/// Queries the status of one working tree at a time.
///
/// Each query runs on the blocking pool. The caller's timeout and
/// cancellation end the wait; a query that is abandoned keeps running in
/// the background but its result is discarded, so a slow repository can
/// never leave half-applied status behind.
#[derive(Debug, Clone)]
pub struct GitStatusProvider {
    timeout: Duration,
}

impl Default for GitStatusProvider {
    fn default() -> Self {
        Self::new(Duration::from_millis(5000))
    }
}

impl GitStatusProvider {
    /// Create a provider with the given per-query timeout.
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Create a provider from engine configuration.
    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.git_timeout())
    }

    /// Per-query timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Query the status of every path in the working tree at `root`.
    ///
    /// Untracked and ignored directories are reported once, as the
    /// directory, rather than file by file.
    pub async fn refresh(
        &self,
        root: &Path,
        cancel: &CancellationToken,
    ) -> Result<RepoStatus, SyncError> {
        if cancel.is_cancelled() {
            return Err(SyncError::Interrupted);
        }

        let start = Instant::now();
        let owned = root.to_path_buf();
        let query = tokio::task::spawn_blocking(move || query_status(&owned));

        let joined = tokio::select! {
            _ = cancel.cancelled() => return Err(SyncError::Interrupted),
            result = tokio::time::timeout(self.timeout, query) => result,
        };

        let status = match joined {
            Ok(Ok(status)) => status?,
            Ok(Err(join_error)) => {
                return Err(unavailable(root, join_error.to_string()));
            }
            Err(_) => {
                warn!(root = %root.display(), timeout = ?self.timeout, "git status timed out");
                return Err(unavailable(
                    root,
                    format!("timed out after {}ms", self.timeout.as_millis()),
                ));
            }
        };

        info!(
            root = %root.display(),
            entries = status.len(),
            elapsed = ?start.elapsed(),
            "git status refreshed"
        );
        Ok(status)
    }
}

/// Map libgit2 status flags onto a single status.
///
/// When several flags are set the highest-precedence one wins:
/// staged, then modified, then untracked, then ignored.
pub fn classify_flags(flags: Status) -> GitStatus {
    let staged = Status::INDEX_NEW
        | Status::INDEX_MODIFIED
        | Status::INDEX_DELETED
        | Status::INDEX_RENAMED
        | Status::INDEX_TYPECHANGE;
    let modified = Status::WT_MODIFIED
        | Status::WT_DELETED
        | Status::WT_RENAMED
        | Status::WT_TYPECHANGE
        | Status::CONFLICTED;

    if flags.intersects(staged) {
        GitStatus::Staged
    } else if flags.intersects(modified) {
        GitStatus::Modified
    } else if flags.contains(Status::WT_NEW) {
        GitStatus::Untracked
    } else if flags.contains(Status::IGNORED) {
        GitStatus::Ignored
    } else {
        GitStatus::Unmodified
    }
}

fn query_status(root: &Path) -> Result<RepoStatus, SyncError> {
    let repo = Repository::open(root).map_err(|e| unavailable(root, e.message()))?;
    if repo.is_bare() {
        return Err(unavailable(root, "bare repository has no working tree"));
    }

    let mut options = StatusOptions::new();
    options
        .include_untracked(true)
        .include_ignored(true)
        .include_unmodified(true)
        .recurse_untracked_dirs(false)
        .recurse_ignored_dirs(false)
        .exclude_submodules(false);

    let statuses = repo
        .statuses(Some(&mut options))
        .map_err(|e| unavailable(root, e.message()))?;

    let mut status = RepoStatus::new(root);
    for entry in statuses.iter() {
        let Some(relative) = entry.path() else {
            debug!(root = %root.display(), "skipping non-UTF-8 status entry");
            continue;
        };
        status.record(absolute_entry(root, relative), classify_flags(entry.status()));
    }
    Ok(status)
}

/// Status paths are relative, `/`-separated, with a trailing `/` on
/// directories.
fn absolute_entry(root: &Path, relative: &str) -> PathBuf {
    relative
        .trim_end_matches('/')
        .split('/')
        .filter(|part| !part.is_empty())
        .fold(root.to_path_buf(), |path, part| path.join(part))
}

fn unavailable(root: &Path, message: impl Into<String>) -> SyncError {
    SyncError::GitUnavailable {
        root: root.to_path_buf(),
        message: message.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_precedence() {
        assert_eq!(classify_flags(Status::CURRENT), GitStatus::Unmodified);
        assert_eq!(classify_flags(Status::WT_NEW), GitStatus::Untracked);
        assert_eq!(classify_flags(Status::IGNORED), GitStatus::Ignored);
        assert_eq!(classify_flags(Status::WT_MODIFIED), GitStatus::Modified);
        assert_eq!(classify_flags(Status::CONFLICTED), GitStatus::Modified);
        assert_eq!(
            classify_flags(Status::INDEX_MODIFIED | Status::WT_MODIFIED),
            GitStatus::Staged
        );
        assert_eq!(classify_flags(Status::INDEX_NEW), GitStatus::Staged);
    }

    #[test]
    fn test_absolute_entry() {
        let root = Path::new("/repo");
        assert_eq!(absolute_entry(root, "a.txt"), PathBuf::from("/repo/a.txt"));
        assert_eq!(absolute_entry(root, "target/"), PathBuf::from("/repo/target"));
        assert_eq!(
            absolute_entry(root, "src/lib.rs"),
            PathBuf::from("/repo/src/lib.rs")
        );
    }

    #[tokio::test]
    async fn test_not_a_repository() {
        let temp = tempfile::TempDir::new().unwrap();
        let provider = GitStatusProvider::default();
        let result = provider
            .refresh(temp.path(), &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(SyncError::GitUnavailable { .. })));
    }

    #[tokio::test]
    async fn test_cancelled_before_query() {
        let temp = tempfile::TempDir::new().unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = GitStatusProvider::default().refresh(temp.path(), &cancel).await;
        assert!(matches!(result, Err(SyncError::Interrupted)));
    }
}
