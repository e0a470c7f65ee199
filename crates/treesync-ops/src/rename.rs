//! Rename operation and file name validation.

use std::path::{Path, PathBuf};

use treesync_core::SyncError;

use crate::move_op::move_entry;

/// Rename `source` within its directory. Returns the new path.
pub(crate) fn rename_entry(source: &Path, new_name: &str) -> Result<PathBuf, SyncError> {
    validate_filename(new_name)?;
    let parent = source.parent().unwrap_or(Path::new(""));
    let new_path = parent.join(new_name);
    move_entry(source, &new_path)?;
    Ok(new_path)
}

/// Validate a file name for create and rename.
pub fn validate_filename(name: &str) -> Result<(), SyncError> {
    let invalid = |reason: &str| {
        Err(SyncError::InvalidName {
            name: name.to_string(),
            reason: reason.to_string(),
        })
    };

    if name.is_empty() {
        return invalid("name cannot be empty");
    }
    if name.len() > 255 {
        return invalid("name is too long (max 255 bytes)");
    }
    if name.contains('/') {
        return invalid("name cannot contain '/'");
    }
    if name.contains('\0') {
        return invalid("name cannot contain NUL");
    }

    #[cfg(target_os = "windows")]
    {
        let windows_invalid = ['\\', ':', '*', '?', '"', '<', '>', '|'];
        if name.contains(windows_invalid) {
            return invalid("name contains a character Windows does not allow");
        }
    }

    if name == "." || name == ".." {
        return invalid("'.' and '..' are reserved names");
    }
    if name.starts_with(' ') || name.ends_with(' ') {
        return invalid("name cannot start or end with spaces");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_validate_filename_valid() {
        assert!(validate_filename("test.txt").is_ok());
        assert!(validate_filename("my-file").is_ok());
        assert!(validate_filename(".hidden").is_ok());
        assert!(validate_filename("file with spaces").is_ok());
    }

    #[test]
    fn test_validate_filename_invalid() {
        for name in ["", "test/file", ".", "..", "file ", " file", "nul\0byte"] {
            assert!(
                matches!(validate_filename(name), Err(SyncError::InvalidName { .. })),
                "{name:?} should be rejected"
            );
        }
        assert!(validate_filename(&"x".repeat(256)).is_err());
    }

    #[test]
    fn test_rename_entry() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("old.txt");
        std::fs::write(&source, "x").unwrap();

        let renamed = rename_entry(&source, "new.txt").unwrap();
        assert_eq!(renamed, temp.path().join("new.txt"));
        assert!(renamed.exists());
        assert!(!source.exists());

        std::fs::write(&source, "again").unwrap();
        assert!(matches!(
            rename_entry(&source, "new.txt"),
            Err(SyncError::ConflictingDestination { .. })
        ));
    }
}
