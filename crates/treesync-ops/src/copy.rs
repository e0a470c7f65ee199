//! Copy operation.

use std::fs;
use std::path::Path;

use treesync_core::SyncError;

use crate::conflict::check_destination;
use crate::delete::remove_entry;
use crate::move_op::ensure_parent;

/// Copy `source` to exactly `destination`. Returns the bytes copied.
///
/// Directories are copied recursively and symlinks are recreated rather than
/// followed. A copy that fails part way removes what it already wrote.
pub(crate) fn copy_entry(source: &Path, destination: &Path) -> Result<u64, SyncError> {
    fs::symlink_metadata(source).map_err(|e| SyncError::io(source, e))?;
    check_destination(source, destination).map_err(|c| c.into_error())?;
    ensure_parent(destination)?;

    copy_recursive(source, destination).inspect_err(|_| {
        if fs::symlink_metadata(destination).is_ok() {
            let _ = remove_entry(destination);
        }
    })
}

fn copy_recursive(source: &Path, destination: &Path) -> Result<u64, SyncError> {
    let metadata = fs::symlink_metadata(source).map_err(|e| SyncError::io(source, e))?;
    let file_type = metadata.file_type();

    if file_type.is_symlink() {
        copy_symlink(source, destination)?;
        return Ok(0);
    }
    if !file_type.is_dir() {
        return fs::copy(source, destination).map_err(|e| SyncError::io(source, e));
    }

    fs::create_dir(destination).map_err(|e| SyncError::io(destination, e))?;
    let mut total_bytes = 0u64;
    for entry in fs::read_dir(source).map_err(|e| SyncError::io(source, e))? {
        let entry = entry.map_err(|e| SyncError::io(source, e))?;
        total_bytes += copy_recursive(&entry.path(), &destination.join(entry.file_name()))?;
    }
    Ok(total_bytes)
}

#[cfg(unix)]
fn copy_symlink(source: &Path, destination: &Path) -> Result<(), SyncError> {
    let target = fs::read_link(source).map_err(|e| SyncError::io(source, e))?;
    std::os::unix::fs::symlink(target, destination).map_err(|e| SyncError::io(destination, e))
}

#[cfg(not(unix))]
fn copy_symlink(source: &Path, destination: &Path) -> Result<(), SyncError> {
    fs::copy(source, destination)
        .map(|_| ())
        .map_err(|e| SyncError::io(source, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_copy_directory_tree() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        fs::create_dir_all(root.join("src/nested")).unwrap();
        fs::write(root.join("src/a.txt"), "hello").unwrap();
        fs::write(root.join("src/nested/b.txt"), "world!").unwrap();

        let bytes = copy_entry(&root.join("src"), &root.join("copy")).unwrap();
        assert_eq!(bytes, 11);
        assert_eq!(fs::read_to_string(root.join("copy/nested/b.txt")).unwrap(), "world!");
        assert!(root.join("src/a.txt").exists());
    }

    #[test]
    fn test_copy_refuses_overwrite() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        fs::write(root.join("a"), "a").unwrap();
        fs::write(root.join("b"), "b").unwrap();
        assert!(matches!(
            copy_entry(&root.join("a"), &root.join("b")),
            Err(SyncError::ConflictingDestination { .. })
        ));
        assert_eq!(fs::read_to_string(root.join("b")).unwrap(), "b");
    }

    #[cfg(unix)]
    #[test]
    fn test_copy_keeps_symlinks() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        fs::create_dir(root.join("dir")).unwrap();
        std::os::unix::fs::symlink(root.join("dir"), root.join("dir/self")).unwrap();

        copy_entry(&root.join("dir"), &root.join("copy")).unwrap();
        let link = fs::symlink_metadata(root.join("copy/self")).unwrap();
        assert!(link.file_type().is_symlink());
    }
}
