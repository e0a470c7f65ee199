//! Move operation.

use std::fs;
use std::io;
use std::path::Path;

use tracing::debug;
use treesync_core::SyncError;

use crate::conflict::check_destination;
use crate::copy::copy_entry;
use crate::delete::remove_entry;

/// Move `source` to exactly `destination`.
///
/// Fails with `ConflictingDestination` rather than overwrite. Falls back to
/// copy and delete when the two paths are on different filesystems.
pub(crate) fn move_entry(source: &Path, destination: &Path) -> Result<(), SyncError> {
    fs::symlink_metadata(source).map_err(|e| SyncError::io(source, e))?;
    check_destination(source, destination).map_err(|c| c.into_error())?;
    ensure_parent(destination)?;

    match fs::rename(source, destination) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::CrossesDevices => {
            debug!(
                source = %source.display(),
                destination = %destination.display(),
                "cross-device move, copying"
            );
            copy_entry(source, destination)?;
            remove_entry(source)
        }
        Err(e) => Err(SyncError::io(source, e)),
    }
}

/// The destination's directory must already exist.
pub(crate) fn ensure_parent(destination: &Path) -> Result<(), SyncError> {
    match destination.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            let metadata = fs::metadata(parent).map_err(|e| SyncError::io(parent, e))?;
            if metadata.is_dir() {
                Ok(())
            } else {
                Err(SyncError::NotADirectory {
                    path: parent.to_path_buf(),
                })
            }
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_move_file_and_directory() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        fs::create_dir_all(root.join("dir/inner")).unwrap();
        fs::write(root.join("dir/inner/f.txt"), "x").unwrap();
        fs::create_dir(root.join("dest")).unwrap();

        move_entry(&root.join("dir"), &root.join("dest/dir")).unwrap();
        assert!(root.join("dest/dir/inner/f.txt").exists());
        assert!(!root.join("dir").exists());
    }

    #[test]
    fn test_move_errors() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        fs::write(root.join("a"), "a").unwrap();
        fs::write(root.join("b"), "b").unwrap();

        assert!(matches!(
            move_entry(&root.join("missing"), &root.join("c")),
            Err(SyncError::NotFound { .. })
        ));
        assert!(matches!(
            move_entry(&root.join("a"), &root.join("b")),
            Err(SyncError::ConflictingDestination { .. })
        ));
        assert!(matches!(
            move_entry(&root.join("a"), &root.join("nowhere/a")),
            Err(SyncError::NotFound { .. })
        ));
        assert_eq!(fs::read_to_string(root.join("b")).unwrap(), "b");
    }
}
