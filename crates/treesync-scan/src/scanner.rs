//! Incremental directory scanner.

use std::collections::{HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use treesync_core::{
    ChangeReport, Node, NodeId, NodeKind, ScanWarning, SymlinkTarget, SyncError, TreeStore,
};

use crate::listing::{DirListing, read_directory};
use crate::progress::ScanSummary;
use crate::SCAN_CHANNEL_SIZE;

/// How far a scan reaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanDepth {
    /// Only the requested directory.
    Immediate,
    /// The requested directory and every expanded directory below it.
    Recursive,
}

/// Update sent through the channel during a scan.
#[derive(Debug)]
pub enum ScanUpdate {
    /// One directory was applied and something differed.
    Report {
        directory: NodeId,
        report: ChangeReport,
        warnings: Vec<ScanWarning>,
    },
    /// One directory could not be read. Siblings are still scanned.
    Failed {
        directory: NodeId,
        error: SyncError,
    },
    /// The scan finished or was cancelled.
    Complete(ScanSummary),
}

/// Result of reading and applying one directory.
#[derive(Debug, Default)]
pub struct DirectoryScan {
    /// Number of entries the listing held.
    pub entries: usize,
    pub report: ChangeReport,
    pub warnings: Vec<ScanWarning>,
}

/// Scanner that mirrors directories into a [`TreeStore`].
#[derive(Debug, Clone)]
pub struct Scanner {
    tree: Arc<TreeStore>,
}

impl Scanner {
    /// Create a scanner writing into `tree`.
    pub fn new(tree: Arc<TreeStore>) -> Self {
        Self { tree }
    }

    /// The tree this scanner writes into.
    pub fn tree(&self) -> &Arc<TreeStore> {
        &self.tree
    }

    /// Start a scan of `id`.
    ///
    /// Returns a receiver yielding one [`ScanUpdate::Report`] per directory
    /// that actually changed, a [`ScanUpdate::Failed`] per directory that
    /// could not be read, and a final [`ScanUpdate::Complete`].
    pub fn scan(
        &self,
        id: NodeId,
        depth: ScanDepth,
        cancel: CancellationToken,
    ) -> mpsc::Receiver<ScanUpdate> {
        let (tx, rx) = mpsc::channel(SCAN_CHANNEL_SIZE);
        let scanner = self.clone();

        tokio::spawn(async move {
            scanner.scan_impl(id, depth, cancel, tx).await;
        });

        rx
    }

    /// Internal implementation of a scan request.
    ///
    /// Only the cancellation token stops the walk. A directory that moved
    /// while it was read is queued once more under its new path.
    async fn scan_impl(
        &self,
        id: NodeId,
        depth: ScanDepth,
        cancel: CancellationToken,
        tx: mpsc::Sender<ScanUpdate>,
    ) {
        let started = Instant::now();
        let mut summary = ScanSummary::default();
        let mut queue = VecDeque::from([id]);
        let mut requeued = HashSet::new();

        while let Some(directory) = queue.pop_front() {
            if cancel.is_cancelled() {
                summary.cancelled = true;
                break;
            }

            match self.scan_directory(directory, &cancel).await {
                Ok(scan) => {
                    summary.record_directory(scan.entries, scan.warnings.len());
                    if !scan.report.is_empty() || !scan.warnings.is_empty() {
                        let _ = tx
                            .send(ScanUpdate::Report {
                                directory,
                                report: scan.report,
                                warnings: scan.warnings,
                            })
                            .await;
                    }
                    if depth == ScanDepth::Recursive {
                        for child in self.expanded_children(directory) {
                            match self.check_symlink_cycle(child).await {
                                Ok(()) => queue.push_back(child),
                                Err(error) => {
                                    summary.directories_failed += 1;
                                    let _ = tx
                                        .send(ScanUpdate::Failed {
                                            directory: child,
                                            error,
                                        })
                                        .await;
                                }
                            }
                        }
                    }
                }
                Err(SyncError::Interrupted) if cancel.is_cancelled() => {
                    summary.cancelled = true;
                    break;
                }
                Err(SyncError::StaleListing { path }) if requeued.insert(directory) => {
                    debug!(path = %path.display(), "directory moved during read, queued again");
                    queue.push_back(directory);
                }
                Err(error) => {
                    summary.directories_failed += 1;
                    warn!(directory = %directory, error = %error, "directory scan failed");
                    if error.is_not_found() {
                        let report = self.heal_missing(directory).await;
                        if !report.is_empty() {
                            let _ = tx
                                .send(ScanUpdate::Report {
                                    directory,
                                    report,
                                    warnings: Vec::new(),
                                })
                                .await;
                        }
                    }
                    let _ = tx.send(ScanUpdate::Failed { directory, error }).await;
                }
            }
        }

        summary.elapsed = started.elapsed();
        debug!(
            scanned = summary.directories_scanned,
            entries = summary.entries_seen,
            failed = summary.directories_failed,
            cancelled = summary.cancelled,
            "scan finished"
        );
        let _ = tx.send(ScanUpdate::Complete(summary)).await;
    }

    /// Read one directory and apply it to the tree.
    ///
    /// Holds the directory's writer lock from the read until the changeset is
    /// applied. A cancellation observed at any point before the apply leaves
    /// the directory untouched.
    pub async fn scan_directory(
        &self,
        id: NodeId,
        cancel: &CancellationToken,
    ) -> Result<DirectoryScan, SyncError> {
        let node = self.tree.get(id).ok_or(SyncError::UnknownNode { id })?;
        if !node.is_container() {
            return Err(SyncError::NotADirectory { path: node.path });
        }
        let read_from = listing_source(&node)?;

        let lock = self.tree.dir_lock(id);
        let _guard = lock.lock().await;
        if cancel.is_cancelled() {
            return Err(SyncError::Interrupted);
        }

        let logical = node.path.clone();
        let token = cancel.clone();
        let listing: DirListing =
            tokio::task::spawn_blocking(move || read_directory(&read_from, &logical, &token))
                .await
                .map_err(|e| SyncError::Io {
                    path: node.path.clone(),
                    source: std::io::Error::other(e),
                })??;

        if cancel.is_cancelled() {
            return Err(SyncError::Interrupted);
        }
        // Renamed while we were reading: the listing carries stale paths.
        if self.tree.get(id).map(|n| n.path) != Some(node.path.clone()) {
            return Err(SyncError::StaleListing { path: node.path });
        }

        debug!(
            path = %node.path.display(),
            entries = listing.entries.len(),
            complete = ?listing.completeness,
            "read directory"
        );
        let entries = listing.entries.len();
        let report = self
            .tree
            .apply_changeset(id, listing.entries, listing.completeness)?;
        Ok(DirectoryScan {
            entries,
            report,
            warnings: listing.warnings,
        })
    }

    /// Expand a directory (or a link to one) and list it.
    ///
    /// Symlinked directories are checked against the chain of directories
    /// above them first; re-entering one of those surfaces
    /// [`SyncError::SymlinkCycle`] and leaves the node collapsed.
    pub async fn expand(
        &self,
        id: NodeId,
        cancel: &CancellationToken,
    ) -> Result<ChangeReport, SyncError> {
        self.check_symlink_cycle(id).await?;
        let mut report = self.tree.set_expanded(id, true)?;
        let scan = self.scan_directory(id, cancel).await?;
        report.merge(scan.report);
        Ok(report)
    }

    /// Reject expanding a symlink whose target is already on the path from
    /// the root down to it.
    pub async fn check_symlink_cycle(&self, id: NodeId) -> Result<(), SyncError> {
        let node = self.tree.get(id).ok_or(SyncError::UnknownNode { id })?;
        let NodeKind::Symlink { target, .. } = &node.kind else {
            return Ok(());
        };
        let target = match target {
            SymlinkTarget::Resolved(target) => target.clone(),
            SymlinkTarget::Unresolved(_) => {
                return Err(SyncError::NotFound { path: node.path });
            }
        };

        let chain = self.ancestor_paths(&node);
        let link_path = node.path.clone();
        let visited = tokio::task::spawn_blocking(move || {
            chain
                .iter()
                .filter_map(|p| std::fs::canonicalize(p).ok())
                .any(|resolved| resolved == target)
                .then_some(target)
        })
        .await
        .map_err(|e| SyncError::Io {
            path: link_path.clone(),
            source: std::io::Error::other(e),
        })?;

        match visited {
            Some(target) => Err(SyncError::SymlinkCycle {
                path: link_path,
                target,
            }),
            None => Ok(()),
        }
    }

    /// Paths of every ancestor of `node`, nearest first.
    fn ancestor_paths(&self, node: &Node) -> Vec<PathBuf> {
        let mut chain = Vec::new();
        let mut current = node.parent;
        while let Some(id) = current {
            let Some(ancestor) = self.tree.get(id) else {
                break;
            };
            chain.push(ancestor.path.clone());
            current = ancestor.parent;
        }
        chain
    }

    /// Expanded container children of `id`.
    fn expanded_children(&self, id: NodeId) -> Vec<NodeId> {
        self.tree
            .get(id)
            .map(|node| {
                node.children
                    .iter()
                    .filter(|child| {
                        self.tree
                            .get(**child)
                            .is_some_and(|c| c.is_container() && c.expanded)
                    })
                    .copied()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Re-verify a directory that failed with `NotFound` and prune it if it
    /// is really gone.
    ///
    /// The prune runs under the parent's writer lock, like any other change
    /// to the parent's children.
    async fn heal_missing(&self, id: NodeId) -> ChangeReport {
        let Some(node) = self.tree.get(id) else {
            return ChangeReport::new();
        };
        let path = node.path;
        let parent_lock = node.parent.map(|parent| self.tree.dir_lock(parent));
        let _guard = match &parent_lock {
            Some(lock) => Some(lock.lock().await),
            None => None,
        };
        let target = path.clone();
        let exists = tokio::task::spawn_blocking(move || std::fs::symlink_metadata(&target).is_ok())
            .await
            .unwrap_or(true);
        if exists {
            ChangeReport::new()
        } else if self.tree.get(id).is_some_and(|n| n.path == path) {
            debug!(path = %path.display(), "pruning vanished directory");
            self.tree.remove(id)
        } else {
            // Moved or pruned while we waited for the lock.
            ChangeReport::new()
        }
    }
}

/// Directory to actually read for `node`.
fn listing_source(node: &Node) -> Result<PathBuf, SyncError> {
    match &node.kind {
        NodeKind::Symlink {
            target: SymlinkTarget::Resolved(target),
            ..
        } => Ok(target.clone()),
        NodeKind::Symlink { .. } => Err(SyncError::NotFound {
            path: node.path.clone(),
        }),
        _ => Ok(node.path.clone()),
    }
}
