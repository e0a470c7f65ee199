//! Merging git status onto tree nodes.

use std::path::Path;
use std::sync::Arc;

use tracing::debug;

use crate::node::{GitStatus, Node};
use crate::report::ChangeReport;
use crate::status::RepoStatus;
use crate::tree::TreeStore;

/// Applies [`RepoStatus`] results to the tree without touching filesystem
/// metadata.
///
/// Each directory's children are restatused while holding that directory's
/// writer lock, so a merge never lands on a node an in-flight rescan of the
/// same directory is about to remove. Merges into different directories
/// commute with scans.
#[derive(Debug, Clone)]
pub struct StatusOverlay {
    tree: Arc<TreeStore>,
}

impl StatusOverlay {
    /// Create an overlay over `tree`.
    pub fn new(tree: Arc<TreeStore>) -> Self {
        Self { tree }
    }

    /// Merge a repository's status.
    ///
    /// The status is also cached on the tree so nodes created later pick it
    /// up at insertion. Nodes inside a nested repository with its own
    /// registered status are left alone. Only nodes whose status actually
    /// changed are reported, so merging the same mapping twice reports
    /// nothing the second time.
    pub async fn merge(&self, status: RepoStatus) -> ChangeReport {
        let status = Arc::new(status);
        self.tree.register_repo_status(status.clone());

        let root = status.root().to_path_buf();
        let report = self
            .restatus_under(&root, |node| {
                let owned = self
                    .tree
                    .owning_repo(&node.path)
                    .is_some_and(|owner| owner.root() == root.as_path());
                if owned {
                    status.classify(&node.path)
                } else {
                    node.git_status
                }
            })
            .await;
        debug!(
            root = %root.display(),
            entries = status.len(),
            changed = report.len(),
            "merged git status"
        );
        report
    }

    /// Drop a repository's status.
    ///
    /// Its nodes fall back to whatever repository still encloses them, or
    /// to `NotInRepo` when none does.
    pub async fn clear(&self, root: &Path) -> ChangeReport {
        self.tree.forget_repo_status(root);
        self.restatus_under(root, |node| self.tree.pending_status(&node.path))
            .await
    }

    async fn restatus_under<F>(&self, root: &Path, classify: F) -> ChangeReport
    where
        F: Fn(&Node) -> GitStatus,
    {
        let mut report = ChangeReport::new();
        for (parent, members) in self.tree.nodes_under(root) {
            let lock = parent.map(|p| self.tree.dir_lock(p));
            let _guard = match &lock {
                Some(lock) => Some(lock.lock().await),
                None => None,
            };
            report.merge(self.tree.restatus(&members, &classify));
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{EntryObservation, NodeKind};
    use crate::tree::ScanCompleteness;
    use tempfile::TempDir;

    fn file(parent: &Path, name: &str) -> EntryObservation {
        EntryObservation {
            path: parent.join(name),
            name: name.into(),
            kind: NodeKind::File { executable: false },
            size: 0,
            modified: None,
        }
    }

    #[tokio::test]
    async fn test_merge_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let tree = Arc::new(TreeStore::new(temp.path()).unwrap());
        let base = tree.root_path().to_path_buf();
        tree.apply_changeset(
            tree.root(),
            vec![file(&base, "a.txt"), file(&base, "b.txt")],
            ScanCompleteness::Complete,
        )
        .unwrap();

        let mut status = RepoStatus::new(&base);
        status.record(base.join("a.txt"), GitStatus::Unmodified);
        status.record(base.join("b.txt"), GitStatus::Untracked);

        let overlay = StatusOverlay::new(tree.clone());
        let first = overlay.merge(status.clone()).await;
        assert!(!first.is_empty());

        let second = overlay.merge(status).await;
        assert!(second.is_empty());
    }

    #[tokio::test]
    async fn test_merge_reports_only_changed_paths() {
        let temp = TempDir::new().unwrap();
        let tree = Arc::new(TreeStore::new(temp.path()).unwrap());
        let base = tree.root_path().to_path_buf();
        tree.apply_changeset(
            tree.root(),
            vec![file(&base, "a.txt"), file(&base, "b.txt")],
            ScanCompleteness::Complete,
        )
        .unwrap();
        let a = tree.resolve_path(&base.join("a.txt")).unwrap();
        let b = tree.resolve_path(&base.join("b.txt")).unwrap();

        let overlay = StatusOverlay::new(tree.clone());
        let mut clean = RepoStatus::new(&base);
        clean.record(base.join("a.txt"), GitStatus::Unmodified);
        clean.record(base.join("b.txt"), GitStatus::Unmodified);
        overlay.merge(clean).await;

        let mut dirty = RepoStatus::new(&base);
        dirty.record(base.join("a.txt"), GitStatus::Unmodified);
        dirty.record(base.join("b.txt"), GitStatus::Untracked);
        let report = overlay.merge(dirty).await;

        assert_eq!(report.len(), 1);
        assert!(report.updated.contains(&b));
        assert!(!report.touches(a));
        assert_eq!(tree.get(b).unwrap().git_status, GitStatus::Untracked);
    }

    #[tokio::test]
    async fn test_clear_returns_nodes_to_not_in_repo() {
        let temp = TempDir::new().unwrap();
        let tree = Arc::new(TreeStore::new(temp.path()).unwrap());
        let base = tree.root_path().to_path_buf();
        tree.apply_changeset(tree.root(), vec![file(&base, "a.txt")], ScanCompleteness::Complete)
            .unwrap();
        let a = tree.resolve_path(&base.join("a.txt")).unwrap();

        let overlay = StatusOverlay::new(tree.clone());
        let mut status = RepoStatus::new(&base);
        status.record(base.join("a.txt"), GitStatus::Modified);
        overlay.merge(status).await;
        assert_eq!(tree.get(a).unwrap().git_status, GitStatus::Modified);

        overlay.clear(&base).await;
        assert_eq!(tree.get(a).unwrap().git_status, GitStatus::NotInRepo);
        assert_eq!(tree.pending_status(&base.join("new")), GitStatus::NotInRepo);
    }

    /// `root/sub` is its own repository inside the repository at `root`.
    fn nested_tree(temp: &TempDir) -> (Arc<TreeStore>, std::path::PathBuf) {
        let tree = Arc::new(TreeStore::new(temp.path()).unwrap());
        let base = tree.root_path().to_path_buf();
        let sub = base.join("sub");
        tree.apply_changeset(
            tree.root(),
            vec![
                EntryObservation {
                    path: sub.clone(),
                    name: "sub".into(),
                    kind: NodeKind::Directory,
                    size: 0,
                    modified: None,
                },
                file(&base, "top.txt"),
            ],
            ScanCompleteness::Complete,
        )
        .unwrap();
        let sub_id = tree.resolve_path(&sub).unwrap();
        tree.apply_changeset(sub_id, vec![file(&sub, "a.txt")], ScanCompleteness::Complete)
            .unwrap();
        (tree, base)
    }

    #[tokio::test]
    async fn test_outer_merge_leaves_nested_repo_alone() {
        let temp = TempDir::new().unwrap();
        let (tree, base) = nested_tree(&temp);
        let sub = base.join("sub");
        let a = tree.resolve_path(&sub.join("a.txt")).unwrap();
        let top = tree.resolve_path(&base.join("top.txt")).unwrap();
        let overlay = StatusOverlay::new(tree.clone());

        let mut inner = RepoStatus::new(&sub);
        inner.record(sub.join("a.txt"), GitStatus::Unmodified);
        overlay.merge(inner).await;

        // The outer repository sees the nested one as an untracked directory.
        let mut outer = RepoStatus::new(&base);
        outer.record(base.join("top.txt"), GitStatus::Modified);
        outer.record(sub.clone(), GitStatus::Untracked);
        let report = overlay.merge(outer).await;

        assert!(report.touches(top));
        assert!(!report.touches(a));
        assert_eq!(tree.get(a).unwrap().git_status, GitStatus::Unmodified);
        assert_eq!(tree.get(top).unwrap().git_status, GitStatus::Modified);
        assert_eq!(tree.pending_status(&sub.join("new.txt")), GitStatus::Unmodified);
    }

    #[tokio::test]
    async fn test_clearing_nested_repo_falls_back_to_outer() {
        let temp = TempDir::new().unwrap();
        let (tree, base) = nested_tree(&temp);
        let sub = base.join("sub");
        let a = tree.resolve_path(&sub.join("a.txt")).unwrap();
        let overlay = StatusOverlay::new(tree.clone());

        let mut outer = RepoStatus::new(&base);
        outer.record(sub.clone(), GitStatus::Untracked);
        overlay.merge(outer).await;
        let mut inner = RepoStatus::new(&sub);
        inner.record(sub.join("a.txt"), GitStatus::Modified);
        overlay.merge(inner).await;
        assert_eq!(tree.get(a).unwrap().git_status, GitStatus::Modified);

        let report = overlay.clear(&sub).await;
        assert!(report.touches(a));
        assert_eq!(tree.get(a).unwrap().git_status, GitStatus::Untracked);
    }
}
