//! Blocking single-directory enumeration.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio_util::sync::CancellationToken;

use treesync_core::{
    EntryObservation, NodeKind, ScanCompleteness, ScanWarning, SymlinkTarget, SyncError,
    WarningKind,
};

/// Everything observed while reading one directory.
#[derive(Debug)]
pub(crate) struct DirListing {
    pub entries: Vec<EntryObservation>,
    pub warnings: Vec<ScanWarning>,
    pub completeness: ScanCompleteness,
}

/// Read the entries of `read_from`, naming them under `logical`.
///
/// `read_from` differs from `logical` only when listing through a symlinked
/// directory: the resolved target is read, entries keep the link's path.
/// The token is checked before every entry; cancellation discards the whole
/// listing.
pub(crate) fn read_directory(
    read_from: &Path,
    logical: &Path,
    cancel: &CancellationToken,
) -> Result<DirListing, SyncError> {
    let iter = fs::read_dir(read_from).map_err(|e| SyncError::io(read_from, e))?;

    let mut entries = Vec::new();
    let mut warnings = Vec::new();
    let mut completeness = ScanCompleteness::Complete;

    for item in iter {
        if cancel.is_cancelled() {
            return Err(SyncError::Interrupted);
        }

        let entry = match item {
            Ok(entry) => entry,
            Err(err) => {
                // Enumeration broke off: what we have is only part of the truth.
                warnings.push(ScanWarning::new(read_from, err.to_string(), WarningKind::ReadError));
                completeness = ScanCompleteness::Partial;
                break;
            }
        };

        let path: PathBuf = logical.join(entry.file_name());
        let metadata = match entry.metadata() {
            Ok(metadata) => metadata,
            Err(err) if err.kind() == ErrorKind::NotFound => continue,
            Err(err) => {
                warnings.push(ScanWarning::from_error(&SyncError::io(&path, err)));
                completeness = ScanCompleteness::Partial;
                continue;
            }
        };

        let observed = EntryObservation::from_metadata(&path, &metadata);
        if let NodeKind::Symlink {
            target: SymlinkTarget::Unresolved(raw),
            ..
        } = &observed.kind
        {
            warnings.push(ScanWarning::broken_symlink(&path, raw));
        }
        entries.push(observed);
    }

    if cancel.is_cancelled() {
        return Err(SyncError::Interrupted);
    }

    Ok(DirListing {
        entries,
        warnings,
        completeness,
    })
}
