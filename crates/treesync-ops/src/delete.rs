//! Deletion, either permanent, to the OS trash, or staged for rollback.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use treesync_core::SyncError;

static STAGE_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Delete `path`, moving it to the OS trash when `use_trash` is set.
pub(crate) fn delete_entry(path: &Path, use_trash: bool) -> Result<(), SyncError> {
    fs::symlink_metadata(path).map_err(|e| SyncError::io(path, e))?;
    if use_trash {
        trash::delete(path).map_err(|e| SyncError::Io {
            path: path.to_path_buf(),
            source: std::io::Error::other(e.to_string()),
        })
    } else {
        remove_entry(path)
    }
}

/// Remove a file, a symlink, or a whole directory tree. Links are never
/// followed.
pub(crate) fn remove_entry(path: &Path) -> Result<(), SyncError> {
    let metadata = fs::symlink_metadata(path).map_err(|e| SyncError::io(path, e))?;
    let result = if metadata.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    result.map_err(|e| SyncError::io(path, e))
}

/// Take `path` out of sight by renaming it to a hidden sibling.
///
/// Staying in the same directory keeps the rename on one filesystem, so
/// restoring it is a single rename as well.
pub(crate) fn stage_delete(path: &Path) -> Result<PathBuf, SyncError> {
    fs::symlink_metadata(path).map_err(|e| SyncError::io(path, e))?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let staged = path.with_file_name(format!(
        ".{name}.treesync-del-{}-{}",
        std::process::id(),
        STAGE_COUNTER.fetch_add(1, Ordering::Relaxed)
    ));
    fs::rename(path, &staged).map_err(|e| SyncError::io(path, e))?;
    Ok(staged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_stage_and_restore() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("dir");
        fs::create_dir(&dir).unwrap();
        fs::write(dir.join("f"), "x").unwrap();

        let staged = stage_delete(&dir).unwrap();
        assert!(!dir.exists());
        assert_eq!(staged.parent(), Some(temp.path()));
        assert!(staged.join("f").exists());

        fs::rename(&staged, &dir).unwrap();
        assert!(dir.join("f").exists());
    }

    #[test]
    fn test_delete_entry() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("dir");
        fs::create_dir_all(dir.join("nested")).unwrap();
        delete_entry(&dir, false).unwrap();
        assert!(!dir.exists());
        assert!(matches!(
            delete_entry(&dir, false),
            Err(SyncError::NotFound { .. })
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_remove_symlink_leaves_target() {
        let temp = TempDir::new().unwrap();
        let target = temp.path().join("target");
        fs::create_dir(&target).unwrap();
        fs::write(target.join("keep"), "x").unwrap();
        std::os::unix::fs::symlink(&target, temp.path().join("link")).unwrap();

        remove_entry(&temp.path().join("link")).unwrap();
        assert!(target.join("keep").exists());
    }
}
