//! Lexical path helpers.
//!
//! Nothing in here touches the filesystem: symlinks are preserved as written.

use std::path::{Component, Path, PathBuf};

/// Normalize a path lexically.
///
/// Collapses `.` components, repeated and trailing separators, and resolves
/// `..` against the preceding component. Symlinks are never resolved.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                let popped = matches!(
                    out.components().next_back(),
                    Some(Component::Normal(_))
                ) && out.pop();
                if !popped && !out.has_root() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    if out.as_os_str().is_empty() {
        out.push(".");
    }
    out
}

/// Make a path absolute against the current directory, then normalize it.
pub fn absolute(path: &Path) -> std::io::Result<PathBuf> {
    Ok(normalize(&std::path::absolute(path)?))
}

/// Strict ancestors of `path`, nearest first.
pub fn ancestors(path: &Path) -> impl Iterator<Item = &Path> {
    path.ancestors().skip(1).filter(|p| !p.as_os_str().is_empty())
}

/// Whether `ancestor` is `path` itself or one of its ancestors.
pub fn is_ancestor_or_self(ancestor: &Path, path: &Path) -> bool {
    path.starts_with(ancestor)
}

/// Whether two paths overlap, i.e. either contains the other.
pub fn overlaps(a: &Path, b: &Path) -> bool {
    is_ancestor_or_self(a, b) || is_ancestor_or_self(b, a)
}

/// Drop every path that has an ancestor (or duplicate) in the same set.
///
/// Deleting `/a` and `/a/b` only needs to delete `/a`. Order of the surviving
/// paths follows the input.
pub fn unify(paths: &[PathBuf]) -> Vec<PathBuf> {
    let mut kept: Vec<PathBuf> = Vec::with_capacity(paths.len());
    for (i, path) in paths.iter().enumerate() {
        let covered = paths.iter().enumerate().any(|(j, other)| {
            j != i && path.starts_with(other) && (path != other || j < i)
        });
        if !covered {
            kept.push(path.clone());
        }
    }
    kept
}
