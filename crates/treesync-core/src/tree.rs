//! The in-memory tree and its single mutation authority.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use compact_str::CompactString;
use dashmap::DashMap;
use itertools::Itertools;
use parking_lot::RwLock;
use tracing::debug;

use crate::error::SyncError;
use crate::node::{EntryObservation, GitStatus, Node, NodeId, render_order};
use crate::path_index::PathIndex;
use crate::paths;
use crate::report::ChangeReport;
use crate::status::RepoStatus;

/// Whether a directory listing reached the end.
///
/// Only complete listings may tombstone children; a partial or cancelled
/// read never deletes anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanCompleteness {
    Complete,
    Partial,
}

/// Display filters applied when listing children.
///
/// Filtered nodes stay tracked; they are only left out of listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChildFilter {
    pub show_hidden: bool,
    pub show_ignored: bool,
}

impl ChildFilter {
    /// Show everything.
    pub fn all() -> Self {
        Self {
            show_hidden: true,
            show_ignored: true,
        }
    }

    fn admits(&self, node: &Node) -> bool {
        (self.show_hidden || !node.is_hidden())
            && (self.show_ignored || node.git_status != GitStatus::Ignored)
    }
}

impl Default for ChildFilter {
    fn default() -> Self {
        Self::all()
    }
}

/// Owner of every [`Node`].
///
/// Readers take a shared lock for the duration of a lookup; writers take the
/// exclusive lock only for in-memory mutation, never across I/O. Writers that
/// read a directory from disk first hold that directory's
/// [`dir_lock`](Self::dir_lock) so that two writers never race on the same
/// children set.
#[derive(Debug)]
pub struct TreeStore {
    root: NodeId,
    root_path: PathBuf,
    index: PathIndex,
    nodes: RwLock<HashMap<NodeId, Node>>,
    generation: AtomicU64,
    repos: RwLock<Vec<Arc<RepoStatus>>>,
    dir_locks: DashMap<NodeId, Arc<tokio::sync::Mutex<()>>>,
}

impl TreeStore {
    /// Create a tree rooted at `root`, which must be a directory.
    pub fn new(root: impl AsRef<Path>) -> Result<Self, SyncError> {
        let root = root.as_ref();
        let root_path = paths::absolute(root).map_err(|e| SyncError::io(root, e))?;
        let observed = EntryObservation::stat(&root_path)?;
        if !observed.kind.is_container() {
            return Err(SyncError::NotADirectory { path: root_path });
        }

        let index = PathIndex::new();
        let id = index.intern(&root_path);
        let mut node = Node::from_observation(id, None, observed, 0, GitStatus::NotInRepo);
        node.expanded = true;

        let mut nodes = HashMap::new();
        nodes.insert(id, node);

        Ok(Self {
            root: id,
            root_path,
            index,
            nodes: RwLock::new(nodes),
            generation: AtomicU64::new(0),
            repos: RwLock::new(Vec::new()),
            dir_locks: DashMap::new(),
        })
    }

    /// Identifier of the root node.
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Absolute path of the root node.
    pub fn root_path(&self) -> &Path {
        &self.root_path
    }

    /// The path index backing this tree.
    pub fn index(&self) -> &PathIndex {
        &self.index
    }

    /// Current changeset generation.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Number of live nodes.
    pub fn len(&self) -> usize {
        self.nodes.read().len()
    }

    /// Whether only the root is loaded.
    pub fn is_empty(&self) -> bool {
        self.len() <= 1
    }

    /// Snapshot of one node.
    pub fn get(&self, id: NodeId) -> Option<Node> {
        self.nodes.read().get(&id).cloned()
    }

    /// Whether `id` is live.
    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.read().contains_key(&id)
    }

    /// Resolve a path to a live node.
    ///
    /// Holds the read lock across the index lookup, so a concurrent rename is
    /// observed either entirely before or entirely after.
    pub fn resolve_path(&self, path: &Path) -> Option<NodeId> {
        let nodes = self.nodes.read();
        self.index.id_of(path).filter(|id| nodes.contains_key(id))
    }

    /// Children of `id` in render order, after display filtering.
    pub fn children(&self, id: NodeId, filter: ChildFilter) -> Vec<Node> {
        let nodes = self.nodes.read();
        let Some(parent) = nodes.get(&id) else {
            return Vec::new();
        };
        parent
            .children
            .iter()
            .filter_map(|child| nodes.get(child))
            .filter(|child| filter.admits(child))
            .sorted_by(|a, b| render_order(a, b))
            .cloned()
            .collect()
    }

    /// Every descendant of `id`, excluding `id` itself.
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let nodes = self.nodes.read();
        let mut subtree = collect_subtree(&nodes, id);
        subtree.retain(|d| *d != id);
        subtree
    }

    /// Snapshot of every live node, parents before children.
    pub fn snapshot(&self) -> Vec<Node> {
        let nodes = self.nodes.read();
        collect_subtree(&nodes, self.root)
            .into_iter()
            .filter_map(|id| nodes.get(&id).cloned())
            .collect()
    }

    /// Expanded container nodes at or below `id`, parents first.
    pub fn expanded_containers(&self, id: NodeId) -> Vec<NodeId> {
        let nodes = self.nodes.read();
        collect_subtree(&nodes, id)
            .into_iter()
            .filter(|d| {
                nodes
                    .get(d)
                    .is_some_and(|n| n.is_container() && (n.expanded || *d == id))
            })
            .collect()
    }

    /// Serialization point for writers of `id`'s children.
    pub fn dir_lock(&self, id: NodeId) -> Arc<tokio::sync::Mutex<()>> {
        self.dir_locks.entry(id).or_default().clone()
    }

    /// Apply one directory listing to `parent`.
    ///
    /// Entries are matched to existing children by name. New names are
    /// inserted, known names are refreshed in place (identity, expansion and
    /// status survive), and, for a [`Complete`](ScanCompleteness::Complete)
    /// listing only, children not confirmed by this generation are removed
    /// together with their subtrees. The report lists only what differed.
    pub fn apply_changeset(
        &self,
        parent: NodeId,
        entries: Vec<EntryObservation>,
        completeness: ScanCompleteness,
    ) -> Result<ChangeReport, SyncError> {
        let mut nodes = self.nodes.write();
        let parent_node = nodes.get(&parent).ok_or(SyncError::UnknownNode { id: parent })?;
        if !parent_node.is_container() {
            return Err(SyncError::NotADirectory {
                path: parent_node.path.clone(),
            });
        }

        let generation = match completeness {
            ScanCompleteness::Complete => self.generation.fetch_add(1, Ordering::AcqRel) + 1,
            ScanCompleteness::Partial => self.generation.load(Ordering::Acquire),
        };

        let existing: HashMap<CompactString, NodeId> = parent_node
            .children
            .iter()
            .filter_map(|child| nodes.get(child).map(|n| (n.name.clone(), *child)))
            .collect();

        let mut report = ChangeReport::new();
        for entry in entries {
            match existing.get(&entry.name).copied() {
                Some(id) => {
                    let Some(node) = nodes.get_mut(&id) else {
                        continue;
                    };
                    if node.is_container() != entry.kind.is_container() {
                        // A file replaced by a directory (or the reverse) keeps
                        // nothing worth preserving.
                        self.detach(&mut nodes, id, &mut report);
                        self.attach(&mut nodes, parent, entry, generation, &mut report);
                        continue;
                    }
                    if node.differs_from(&entry) {
                        node.refresh_from(entry);
                        report.update(id);
                    }
                    node.scan_generation = node.scan_generation.max(generation);
                }
                None => self.attach(&mut nodes, parent, entry, generation, &mut report),
            }
        }

        if completeness == ScanCompleteness::Complete {
            let stale: Vec<NodeId> = nodes
                .get(&parent)
                .map(|p| {
                    p.children
                        .iter()
                        .filter(|child| {
                            nodes
                                .get(child)
                                .is_some_and(|n| n.scan_generation < generation)
                        })
                        .copied()
                        .collect()
                })
                .unwrap_or_default();
            for id in stale {
                self.detach(&mut nodes, id, &mut report);
            }
        }

        debug!(
            parent = %parent,
            inserted = report.inserted.len(),
            updated = report.updated.len(),
            removed = report.removed.len(),
            "applied changeset"
        );
        Ok(report)
    }

    /// Insert or refresh a single observed entry.
    ///
    /// The entry's parent directory must already be loaded; otherwise nothing
    /// happens, because the entry will be picked up when the parent is
    /// scanned.
    pub fn upsert(&self, entry: EntryObservation) -> ChangeReport {
        let Some(parent) = entry
            .path
            .parent()
            .and_then(|p| self.resolve_path(p))
        else {
            return ChangeReport::new();
        };
        self.apply_changeset(parent, vec![entry], ScanCompleteness::Partial)
            .unwrap_or_default()
    }

    /// Remove `id` and its whole subtree in one step.
    pub fn remove(&self, id: NodeId) -> ChangeReport {
        let mut report = ChangeReport::new();
        if id == self.root {
            return report;
        }
        let mut nodes = self.nodes.write();
        if nodes.contains_key(&id) {
            self.detach(&mut nodes, id, &mut report);
        }
        report
    }

    /// Remove whatever node is bound to `path`.
    pub fn remove_path(&self, path: &Path) -> ChangeReport {
        match self.resolve_path(path) {
            Some(id) => self.remove(id),
            None => ChangeReport::new(),
        }
    }

    /// Move `id` (and its subtree) to `new_path`, keeping every identifier.
    ///
    /// Re-parenting and the path-index rebinding happen under one write lock.
    /// When the destination's parent is not loaded the node leaves the tree.
    pub fn relocate(&self, id: NodeId, new_path: &Path) -> ChangeReport {
        let mut report = ChangeReport::new();
        if id == self.root {
            return report;
        }
        let new_path = paths::normalize(new_path);
        let mut nodes = self.nodes.write();
        let Some(old_path) = nodes.get(&id).map(|n| n.path.clone()) else {
            return report;
        };
        if old_path == new_path {
            return report;
        }

        let new_parent = new_path
            .parent()
            .and_then(|p| self.index.id_of(p))
            .filter(|p| nodes.get(p).is_some_and(|n| n.is_container()));
        let Some(new_parent) = new_parent else {
            self.detach(&mut nodes, id, &mut report);
            return report;
        };

        // Stale entry sitting at the destination.
        if let Some(occupant) = self.index.id_of(&new_path).filter(|o| *o != id) {
            if nodes.contains_key(&occupant) {
                self.detach(&mut nodes, occupant, &mut report);
            }
        }

        let old_parent = nodes.get(&id).and_then(|n| n.parent);
        if let Some(old_parent) = old_parent.and_then(|p| nodes.get_mut(&p)) {
            old_parent.children.remove(&id);
        }
        if let Some(parent) = nodes.get_mut(&new_parent) {
            parent.children.insert(id);
        }

        let subtree = collect_subtree(&nodes, id);
        let mut moves = Vec::with_capacity(subtree.len());
        for member in subtree {
            let Some(node) = nodes.get_mut(&member) else {
                continue;
            };
            let rebased = match node.path.strip_prefix(&old_path) {
                Ok(rest) if rest.as_os_str().is_empty() => new_path.clone(),
                Ok(rest) => new_path.join(rest),
                Err(_) => continue,
            };
            node.path = rebased.clone();
            if member == id {
                node.parent = Some(new_parent);
                node.name = new_path
                    .file_name()
                    .map(|n| CompactString::new(n.to_string_lossy()))
                    .unwrap_or_default();
            }
            moves.push((member, rebased));
            report.update(member);
        }
        self.index.rebind(&moves);

        debug!(node = %id, from = %old_path.display(), to = %new_path.display(), "relocated");
        report
    }

    /// Set the expansion flag of a container node.
    pub fn set_expanded(&self, id: NodeId, expanded: bool) -> Result<ChangeReport, SyncError> {
        let mut nodes = self.nodes.write();
        let node = nodes.get_mut(&id).ok_or(SyncError::UnknownNode { id })?;
        if !node.is_container() {
            return Err(SyncError::NotADirectory {
                path: node.path.clone(),
            });
        }
        let mut report = ChangeReport::new();
        if node.expanded != expanded {
            node.expanded = expanded;
            report.update(id);
        }
        Ok(report)
    }

    /// Collapse a container and every expanded container below it.
    ///
    /// Children stay tracked. Each node whose flag actually flipped is
    /// reported, so re-expanding `id` later shows its subdirectories folded.
    pub fn collapse(&self, id: NodeId) -> Result<ChangeReport, SyncError> {
        let mut nodes = self.nodes.write();
        let node = nodes.get(&id).ok_or(SyncError::UnknownNode { id })?;
        if !node.is_container() {
            return Err(SyncError::NotADirectory {
                path: node.path.clone(),
            });
        }

        let mut report = ChangeReport::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let Some(node) = nodes.get_mut(&current) else {
                continue;
            };
            if node.expanded {
                node.expanded = false;
                report.update(current);
            }
            stack.extend(node.children.iter().copied());
        }
        Ok(report)
    }

    /// Recompute the status of `ids`, reporting only nodes whose status changed.
    pub fn restatus<F>(&self, ids: &[NodeId], classify: F) -> ChangeReport
    where
        F: Fn(&Node) -> GitStatus,
    {
        let mut report = ChangeReport::new();
        let mut nodes = self.nodes.write();
        for id in ids {
            let Some(node) = nodes.get_mut(id) else {
                continue;
            };
            let status = classify(node);
            if node.git_status != status {
                node.git_status = status;
                report.update(*id);
            }
        }
        report
    }

    /// Live nodes under `root`, grouped by parent directory.
    pub fn nodes_under(&self, root: &Path) -> Vec<(Option<NodeId>, Vec<NodeId>)> {
        let nodes = self.nodes.read();
        nodes
            .values()
            .filter(|n| n.path.starts_with(root))
            .map(|n| (n.parent, n.id))
            .into_group_map()
            .into_iter()
            .collect()
    }

    /// Remember the latest status for a repository, replacing older results.
    ///
    /// Nodes inserted later under that repository take their status from it.
    pub fn register_repo_status(&self, status: Arc<RepoStatus>) {
        let mut repos = self.repos.write();
        repos.retain(|r| r.root() != status.root());
        repos.push(status);
    }

    /// Forget the cached status of a repository.
    pub fn forget_repo_status(&self, root: &Path) {
        self.repos.write().retain(|r| r.root() != root);
    }

    /// The innermost registered repository containing `path`.
    ///
    /// A nested repository owns its paths even though the enclosing one
    /// contains them too.
    pub fn owning_repo(&self, path: &Path) -> Option<Arc<RepoStatus>> {
        self.repos
            .read()
            .iter()
            .filter(|r| r.contains(path))
            .max_by_key(|r| r.root().components().count())
            .cloned()
    }

    /// Cached status for a path not yet in the tree.
    pub fn pending_status(&self, path: &Path) -> GitStatus {
        self.owning_repo(path)
            .map(|r| r.classify(path))
            .unwrap_or_default()
    }

    fn attach(
        &self,
        nodes: &mut HashMap<NodeId, Node>,
        parent: NodeId,
        entry: EntryObservation,
        generation: u64,
        report: &mut ChangeReport,
    ) {
        let id = self.index.intern(&entry.path);
        let status = self.pending_status(&entry.path);
        let node = Node::from_observation(id, Some(parent), entry, generation, status);
        nodes.insert(id, node);
        if let Some(parent) = nodes.get_mut(&parent) {
            parent.children.insert(id);
        }
        report.insert(id);
    }

    fn detach(&self, nodes: &mut HashMap<NodeId, Node>, id: NodeId, report: &mut ChangeReport) {
        let subtree = collect_subtree(nodes, id);
        if let Some(parent) = nodes.get(&id).and_then(|n| n.parent) {
            if let Some(parent) = nodes.get_mut(&parent) {
                parent.children.remove(&id);
            }
        }
        for member in &subtree {
            nodes.remove(member);
            self.dir_locks.remove(member);
            report.remove(*member);
        }
        self.index.retire(&subtree);
    }
}

/// `id` followed by all of its descendants, parents before children.
fn collect_subtree(nodes: &HashMap<NodeId, Node>, id: NodeId) -> Vec<NodeId> {
    let mut out = Vec::new();
    let mut stack = vec![id];
    while let Some(current) = stack.pop() {
        let Some(node) = nodes.get(&current) else {
            continue;
        };
        out.push(current);
        stack.extend(node.children.iter().copied());
    }
    out
}
