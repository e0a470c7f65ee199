//! File and directory creation.

use std::fs::{self, File};
use std::path::{Path, PathBuf};

use treesync_core::SyncError;

use crate::operation::CreateKind;
use crate::rename::validate_filename;

/// Create `path`, making any missing parent directories.
///
/// Returns the topmost path that did not exist before, which is `path`
/// itself unless parents had to be created.
pub(crate) fn create_entry(path: &Path, kind: CreateKind) -> Result<PathBuf, SyncError> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| SyncError::InvalidName {
            name: path.display().to_string(),
            reason: "path has no usable file name".into(),
        })?;
    validate_filename(name)?;

    if fs::symlink_metadata(path).is_ok() {
        return Err(SyncError::ConflictingDestination {
            path: path.to_path_buf(),
        });
    }

    let topmost = first_missing_ancestor(path);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| SyncError::io(parent, e))?;
    }

    match kind {
        CreateKind::File => File::create_new(path)
            .map(|_| ())
            .map_err(|e| SyncError::io(path, e))?,
        CreateKind::Directory => fs::create_dir(path).map_err(|e| SyncError::io(path, e))?,
    }
    Ok(topmost)
}

/// `path` and the directories between it and `topmost`, outermost first.
pub(crate) fn created_chain(topmost: &Path, path: &Path) -> Vec<PathBuf> {
    let mut chain: Vec<PathBuf> = path
        .ancestors()
        .take_while(|p| p.starts_with(topmost))
        .map(Path::to_path_buf)
        .collect();
    chain.reverse();
    chain
}

fn first_missing_ancestor(path: &Path) -> PathBuf {
    path.ancestors()
        .take_while(|p| !p.as_os_str().is_empty() && fs::symlink_metadata(p).is_err())
        .last()
        .unwrap_or(path)
        .to_path_buf()
}
