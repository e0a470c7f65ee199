//! Conflict detection and grouping for batch operations.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use treesync_core::SyncError;
use treesync_core::paths::{is_ancestor_or_self, overlaps, unify};

use crate::operation::FileOperation;

/// A conflict detected before an operation runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conflict {
    /// The source path being operated on.
    pub source: PathBuf,
    /// The destination path where the conflict exists.
    pub destination: PathBuf,
    /// The kind of conflict.
    pub kind: ConflictKind,
}

impl Conflict {
    /// Create a new conflict.
    pub fn new(source: PathBuf, destination: PathBuf, kind: ConflictKind) -> Self {
        Self {
            source,
            destination,
            kind,
        }
    }

    /// Every conflict fails its item with `ConflictingDestination`.
    pub fn into_error(self) -> SyncError {
        SyncError::ConflictingDestination {
            path: self.destination,
        }
    }
}

/// The kind of conflict encountered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConflictKind {
    /// Something already exists at the destination.
    DestinationExists,
    /// Cannot move/copy a directory into itself.
    SourceIsAncestor,
    /// Source and destination are the same path.
    SameFile,
}

impl std::fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DestinationExists => write!(f, "Destination already exists"),
            Self::SourceIsAncestor => write!(f, "Cannot copy/move a directory into itself"),
            Self::SameFile => write!(f, "Source and destination are the same path"),
        }
    }
}

/// Check that `destination` may receive `source`.
///
/// Never overwrites: an existing destination is a conflict.
pub(crate) fn check_destination(source: &Path, destination: &Path) -> Result<(), Conflict> {
    let conflict = |kind| Conflict::new(source.to_path_buf(), destination.to_path_buf(), kind);
    if source == destination {
        return Err(conflict(ConflictKind::SameFile));
    }
    if destination.starts_with(source) {
        return Err(conflict(ConflictKind::SourceIsAncestor));
    }
    if std::fs::symlink_metadata(destination).is_ok() {
        return Err(conflict(ConflictKind::DestinationExists));
    }
    Ok(())
}

/// Pre-flight check of every destination before a batch starts.
///
/// A destination that an earlier item of the same batch vacates is not a
/// conflict. Returns one entry per operation.
pub(crate) fn preflight(operations: &[FileOperation]) -> Vec<Option<Conflict>> {
    let mut vacated: Vec<&Path> = Vec::new();
    operations
        .iter()
        .map(|op| {
            let conflict = match op {
                FileOperation::Move {
                    source,
                    destination,
                }
                | FileOperation::Copy {
                    source,
                    destination,
                } => check_destination(source, destination)
                    .err()
                    .filter(|c| !freed_earlier(&vacated, c)),
                _ => None,
            };
            if let Some(path) = op.vacated() {
                vacated.push(path);
            }
            conflict
        })
        .collect()
}

fn freed_earlier(vacated: &[&Path], conflict: &Conflict) -> bool {
    conflict.kind == ConflictKind::DestinationExists
        && vacated
            .iter()
            .any(|v| is_ancestor_or_self(v, &conflict.destination))
}

/// Indices of deletes already covered by another delete in the batch.
///
/// Deleting `/a` and `/a/b` deletes `/a` once.
pub fn redundant_deletes(operations: &[FileOperation]) -> HashSet<usize> {
    let targets: Vec<PathBuf> = operations
        .iter()
        .filter_map(|op| match op {
            FileOperation::Delete { path } => Some(path.clone()),
            _ => None,
        })
        .collect();
    let kept = unify(&targets);

    let mut seen = HashSet::new();
    operations
        .iter()
        .enumerate()
        .filter_map(|(index, op)| match op {
            FileOperation::Delete { path } => {
                let first_occurrence = kept.contains(path) && seen.insert(path.clone());
                (!first_occurrence).then_some(index)
            }
            _ => None,
        })
        .collect()
}

/// Partition a batch into groups that must run sequentially.
///
/// Two operations share a group when any path one touches is an ancestor of
/// (or equal to) a path the other touches. Groups are independent and may
/// run concurrently; within a group, indices keep batch order.
pub fn conflict_groups(operations: &[FileOperation], exclude: &HashSet<usize>) -> Vec<Vec<usize>> {
    let indices: Vec<usize> = (0..operations.len())
        .filter(|i| !exclude.contains(i))
        .collect();
    let touched: Vec<Vec<PathBuf>> = operations.iter().map(|op| op.touched_paths()).collect();

    let mut parent: Vec<usize> = (0..operations.len()).collect();
    for (a, b) in indices.iter().tuple_combinations() {
        let overlapping = touched[*a]
            .iter()
            .cartesian_product(touched[*b].iter())
            .any(|(p, q)| overlaps(p, q));
        if overlapping {
            let (ra, rb) = (find(&mut parent, *a), find(&mut parent, *b));
            if ra != rb {
                parent[ra.max(rb)] = ra.min(rb);
            }
        }
    }

    indices
        .iter()
        .map(|i| (find(&mut parent, *i), *i))
        .into_group_map()
        .into_values()
        .map(|mut group| {
            group.sort_unstable();
            group
        })
        .sorted_by_key(|group| group[0])
        .collect()
}

fn find(parent: &mut [usize], i: usize) -> usize {
    let mut root = i;
    while parent[root] != root {
        root = parent[root];
    }
    let mut current = i;
    while parent[current] != root {
        let next = parent[current];
        parent[current] = root;
        current = next;
    }
    root
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_groups_split_disjoint_subtrees() {
        let ops = vec![
            FileOperation::move_to("/x/f.txt", "/y/f.txt"),
            FileOperation::create_file("/z/new.txt"),
            FileOperation::delete("/x"),
            FileOperation::copy("/w/a", "/w/b"),
        ];
        let groups = conflict_groups(&ops, &HashSet::new());
        assert_eq!(groups, vec![vec![0, 2], vec![1], vec![3]]);
    }

    #[test]
    fn test_groups_chain_transitively() {
        let ops = vec![
            FileOperation::move_to("/a/1", "/b/1"),
            FileOperation::move_to("/b/1", "/c/1"),
            FileOperation::delete("/c"),
        ];
        assert_eq!(conflict_groups(&ops, &HashSet::new()), vec![vec![0, 1, 2]]);
    }

    #[test]
    fn test_redundant_deletes() {
        let ops = vec![
            FileOperation::delete("/a/b"),
            FileOperation::delete("/a"),
            FileOperation::delete("/c"),
            FileOperation::delete("/c"),
            FileOperation::create_file("/d"),
        ];
        let redundant = redundant_deletes(&ops);
        assert_eq!(redundant, HashSet::from([0, 3]));
    }

    #[test]
    fn test_check_destination() {
        let temp = TempDir::new().unwrap();
        let existing = temp.path().join("exists");
        std::fs::write(&existing, "x").unwrap();

        let source = temp.path().join("src");
        assert_eq!(
            check_destination(&source, &existing).unwrap_err().kind,
            ConflictKind::DestinationExists
        );
        assert_eq!(
            check_destination(&source, &source.join("inner")).unwrap_err().kind,
            ConflictKind::SourceIsAncestor
        );
        assert!(check_destination(&source, &temp.path().join("free")).is_ok());
    }

    #[test]
    fn test_preflight_allows_vacated_destination() {
        let temp = TempDir::new().unwrap();
        let a = temp.path().join("a");
        let b = temp.path().join("b");
        std::fs::write(&a, "a").unwrap();
        std::fs::write(&b, "b").unwrap();

        let ops = vec![
            FileOperation::move_to(&a, temp.path().join("moved")),
            FileOperation::copy(&b, &a),
            FileOperation::copy(&a, &b),
        ];
        let conflicts = preflight(&ops);
        assert!(conflicts[0].is_none());
        assert!(conflicts[1].is_none());
        assert_eq!(
            conflicts[2].as_ref().map(|c| c.kind),
            Some(ConflictKind::DestinationExists)
        );
    }
}
