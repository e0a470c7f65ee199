use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use compact_str::CompactString;
use tempfile::TempDir;
use treesync_core::{
    ChildFilter, EntryObservation, GitStatus, NodeId, NodeKind, RepoStatus, ScanCompleteness,
    StatusOverlay, TreeStore, paths,
};

fn file(path: PathBuf, size: u64) -> EntryObservation {
    EntryObservation {
        name: CompactString::new(path.file_name().unwrap().to_string_lossy()),
        path,
        kind: NodeKind::File { executable: false },
        size,
        modified: None,
    }
}

fn dir(path: PathBuf) -> EntryObservation {
    EntryObservation {
        name: CompactString::new(path.file_name().unwrap().to_string_lossy()),
        path,
        kind: NodeKind::Directory,
        size: 0,
        modified: None,
    }
}

fn setup() -> (TempDir, Arc<TreeStore>) {
    let temp = TempDir::new().unwrap();
    let tree = Arc::new(TreeStore::new(temp.path()).unwrap());
    (temp, tree)
}

fn populate(tree: &TreeStore, root: &Path) -> (NodeId, NodeId) {
    tree.apply_changeset(
        tree.root(),
        vec![dir(root.join("src")), file(root.join("README.md"), 10)],
        ScanCompleteness::Complete,
    )
    .unwrap();
    let src = tree.resolve_path(&root.join("src")).unwrap();
    tree.apply_changeset(
        src,
        vec![file(root.join("src/main.rs"), 100), dir(root.join("src/util"))],
        ScanCompleteness::Complete,
    )
    .unwrap();
    let util = tree.resolve_path(&root.join("src/util")).unwrap();
    tree.apply_changeset(
        util,
        vec![file(root.join("src/util/mod.rs"), 5)],
        ScanCompleteness::Complete,
    )
    .unwrap();
    (src, util)
}

#[test]
fn test_every_child_points_back_to_parent() {
    let (temp, tree) = setup();
    populate(&tree, temp.path());

    for node in tree.snapshot() {
        for child in &node.children {
            let child = tree.get(*child).unwrap();
            assert_eq!(child.parent, Some(node.id));
            assert_eq!(child.path.parent(), Some(node.path.as_path()));
        }
    }
    assert_eq!(tree.len(), 6);
}

#[test]
fn test_rename_keeps_identity_and_rebinds_subtree() {
    let (temp, tree) = setup();
    let root = temp.path();
    let (src, util) = populate(&tree, root);
    let module = tree.resolve_path(&root.join("src/util/mod.rs")).unwrap();

    let report = tree.relocate(src, &root.join("lib"));
    assert!(report.touches(src));
    assert!(report.touches(module));
    assert!(report.inserted.is_empty());
    assert!(report.removed.is_empty());

    assert_eq!(tree.resolve_path(&root.join("lib")), Some(src));
    assert_eq!(tree.resolve_path(&root.join("lib/util")), Some(util));
    assert_eq!(tree.resolve_path(&root.join("lib/util/mod.rs")), Some(module));
    assert_eq!(tree.resolve_path(&root.join("src")), None);
    assert_eq!(tree.get(src).unwrap().name, "lib");
}

#[test]
fn test_collapse_folds_expanded_descendants() {
    let (temp, tree) = setup();
    let root = temp.path();
    let (src, util) = populate(&tree, root);
    tree.set_expanded(src, true).unwrap();
    tree.set_expanded(util, true).unwrap();

    let report = tree.collapse(src).unwrap();
    assert_eq!(report.len(), 2);
    assert!(report.touches(src));
    assert!(report.touches(util));
    assert!(report.inserted.is_empty() && report.removed.is_empty());
    assert_eq!(tree.len(), 6);

    // Re-expanding the top shows its subdirectories folded.
    tree.set_expanded(src, true).unwrap();
    assert!(!tree.get(util).unwrap().expanded);

    // Already collapsed below, so only `src` flips.
    let again = tree.collapse(src).unwrap();
    assert_eq!(again.len(), 1);
    assert!(tree.collapse(src).unwrap().is_empty());

    let readme = tree.resolve_path(&root.join("README.md")).unwrap();
    assert!(tree.collapse(readme).is_err());
}

#[test]
fn test_cascade_delete_retires_ids() {
    let (temp, tree) = setup();
    let root = temp.path();
    let (src, util) = populate(&tree, root);

    let report = tree.remove(src);
    assert_eq!(report.removed.len(), 4);
    assert!(!tree.contains(util));
    assert_eq!(tree.resolve_path(&root.join("src/util/mod.rs")), None);

    // A new entry at the old path gets a fresh id.
    tree.upsert(dir(root.join("src")));
    let again = tree.resolve_path(&root.join("src")).unwrap();
    assert_ne!(again, src);
}

#[test]
fn test_partial_changeset_never_prunes() {
    let (temp, tree) = setup();
    let root = temp.path();
    populate(&tree, root);

    let report = tree
        .apply_changeset(
            tree.root(),
            vec![file(root.join("extra.txt"), 1)],
            ScanCompleteness::Partial,
        )
        .unwrap();
    assert_eq!(report.inserted.len(), 1);
    assert!(report.removed.is_empty());
    assert_eq!(tree.children(tree.root(), ChildFilter::all()).len(), 3);
}

#[test]
fn test_normalized_lookup() {
    let (temp, tree) = setup();
    let root = temp.path();
    let (src, _) = populate(&tree, root);

    assert_eq!(tree.resolve_path(&root.join("src/./util/..")), Some(src));
    assert_eq!(paths::normalize(&root.join("a/../src")), root.join("src"));
}

#[tokio::test]
async fn test_status_merge_is_idempotent_and_minimal() {
    let (temp, tree) = setup();
    let root = temp.path();
    tree.apply_changeset(
        tree.root(),
        vec![file(root.join("a.txt"), 1), file(root.join("b.txt"), 1)],
        ScanCompleteness::Complete,
    )
    .unwrap();
    let a = tree.resolve_path(&root.join("a.txt")).unwrap();
    let b = tree.resolve_path(&root.join("b.txt")).unwrap();
    let overlay = StatusOverlay::new(tree.clone());

    let mut first = RepoStatus::new(root);
    first.record(root.join("a.txt"), GitStatus::Unmodified);
    first.record(root.join("b.txt"), GitStatus::Unmodified);
    overlay.merge(first.clone()).await;
    assert!(overlay.merge(first).await.is_empty());

    let mut second = RepoStatus::new(root);
    second.record(root.join("a.txt"), GitStatus::Unmodified);
    second.record(root.join("b.txt"), GitStatus::Modified);
    let report = overlay.merge(second).await;
    assert_eq!(report.updated.len(), 1);
    assert!(report.touches(b));
    assert!(!report.touches(a));
    assert_eq!(tree.get(b).unwrap().git_status, GitStatus::Modified);
}

#[tokio::test]
async fn test_late_insert_picks_up_cached_status() {
    let (temp, tree) = setup();
    let root = temp.path();
    fs::write(root.join("new.txt"), "x").unwrap();

    let mut status = RepoStatus::new(root);
    status.record(root.join("new.txt"), GitStatus::Untracked);
    StatusOverlay::new(tree.clone()).merge(status).await;

    tree.upsert(EntryObservation::stat(&root.join("new.txt")).unwrap());
    let id = tree.resolve_path(&root.join("new.txt")).unwrap();
    assert_eq!(tree.get(id).unwrap().git_status, GitStatus::Untracked);
}
