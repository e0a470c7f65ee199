//! Batch executor with tree reconciliation.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{OwnedMutexGuard, Semaphore, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use treesync_core::{ChangeReport, EngineConfig, EntryObservation, NodeId, SyncError, TreeStore};

use crate::OPERATION_CHANNEL_SIZE;
use crate::conflict::{Conflict, conflict_groups, preflight, redundant_deletes};
use crate::copy::copy_entry;
use crate::create::{create_entry, created_chain};
use crate::delete::{delete_entry, stage_delete};
use crate::move_op::move_entry;
use crate::operation::{Batch, FileOperation};
use crate::progress::{BatchComplete, BatchEvent, ItemStatus, OperationOutcome};
use crate::rename::rename_entry;
use crate::undo::{UndoLog, UndoableOperation};

/// Runs batches of file operations and mirrors their effect into a tree.
///
/// Successful items update the tree directly (insert, remove or relocate),
/// never through a rescan. Failed items re-stat the paths they touched so the
/// tree ends up matching what is actually on disk.
#[derive(Debug, Clone)]
pub struct OperationExecutor {
    tree: Arc<TreeStore>,
    /// Whether to use trash for non-atomic deletions.
    use_trash: bool,
    max_concurrent_groups: usize,
}

impl OperationExecutor {
    /// Create an executor writing into `tree`.
    pub fn new(tree: Arc<TreeStore>) -> Self {
        Self {
            tree,
            use_trash: false,
            max_concurrent_groups: 4,
        }
    }

    /// Create an executor from engine configuration.
    pub fn from_config(tree: Arc<TreeStore>, config: &EngineConfig) -> Self {
        Self::new(tree)
            .with_trash(config.use_trash)
            .with_concurrency(config.max_concurrent_groups)
    }

    /// Send non-atomic deletes to the OS trash.
    pub fn with_trash(mut self, use_trash: bool) -> Self {
        self.use_trash = use_trash;
        self
    }

    /// Limit how many independent groups run at once.
    pub fn with_concurrency(mut self, groups: usize) -> Self {
        self.max_concurrent_groups = groups.max(1);
        self
    }

    pub fn tree(&self) -> &Arc<TreeStore> {
        &self.tree
    }

    /// Start executing `batch`.
    ///
    /// Returns a receiver yielding one [`BatchEvent::Outcome`] per item and a
    /// final [`BatchEvent::Complete`]. Cancelling stops new items from
    /// starting; items already running finish and are reported normally.
    pub fn execute(&self, batch: Batch, cancel: CancellationToken) -> mpsc::Receiver<BatchEvent> {
        let (tx, rx) = mpsc::channel(OPERATION_CHANNEL_SIZE);
        let executor = self.clone();

        tokio::spawn(async move {
            executor.execute_impl(batch, cancel, tx).await;
        });

        rx
    }

    /// Internal implementation of batch execution.
    async fn execute_impl(
        &self,
        batch: Batch,
        cancel: CancellationToken,
        tx: mpsc::Sender<BatchEvent>,
    ) {
        let start = Instant::now();
        let atomic = batch.atomic;
        let operations = Arc::new(batch.operations);

        let mut complete = if atomic {
            self.run_atomic(operations, &cancel, &tx).await
        } else {
            self.run_grouped(operations, &cancel, &tx).await
        };
        complete.elapsed = start.elapsed();

        info!(
            total = complete.total,
            succeeded = complete.succeeded,
            failed = complete.failed,
            rolled_back = complete.rolled_back,
            cancelled = complete.cancelled,
            atomic,
            "batch finished"
        );
        let _ = tx.send(BatchEvent::Complete(complete)).await;
    }

    /// Run independent conflict groups concurrently, each item in a group
    /// after the previous one.
    async fn run_grouped(
        &self,
        operations: Arc<Vec<FileOperation>>,
        cancel: &CancellationToken,
        tx: &mpsc::Sender<BatchEvent>,
    ) -> BatchComplete {
        let mut complete = BatchComplete::new(operations.len());
        let redundant = redundant_deletes(&operations);
        let conflicts = self.preflight(&operations).await;

        let mut excluded: HashSet<usize> = HashSet::new();
        for (index, conflict) in conflicts.into_iter().enumerate() {
            let status = if redundant.contains(&index) {
                ItemStatus::Skipped
            } else if let Some(conflict) = conflict {
                ItemStatus::Failed(conflict.into_error())
            } else {
                continue;
            };
            excluded.insert(index);
            let outcome = outcome(index, &operations[index], status, ChangeReport::new());
            emit(tx, &mut complete, outcome).await;
        }

        let groups = conflict_groups(&operations, &excluded);
        debug!(groups = groups.len(), "running batch groups");

        let semaphore = Arc::new(Semaphore::new(self.max_concurrent_groups));
        let mut tasks = JoinSet::new();
        for group in groups {
            let executor = self.clone();
            let operations = operations.clone();
            let cancel = cancel.clone();
            let tx = tx.clone();
            let semaphore = semaphore.clone();

            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                let mut tally = BatchComplete::default();
                for index in group {
                    let outcome = executor.run_item(index, &operations[index], &cancel).await;
                    emit(&tx, &mut tally, outcome).await;
                }
                tally
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(tally) => complete.absorb(&tally),
                Err(e) => warn!(error = %e, "operation group task failed"),
            }
        }
        complete
    }

    /// Run one item of a non-atomic batch.
    async fn run_item(
        &self,
        index: usize,
        operation: &FileOperation,
        cancel: &CancellationToken,
    ) -> OperationOutcome {
        if cancel.is_cancelled() {
            return outcome(index, operation, ItemStatus::Cancelled, ChangeReport::new());
        }

        match self.apply(operation, false).await {
            Ok(applied) => {
                let report = self.reflect(&applied).await;
                debug!(index, %operation, "operation applied");
                outcome(index, operation, ItemStatus::Succeeded, report)
            }
            Err(error) => {
                warn!(index, %operation, error = %error, "operation failed");
                let report = self.reconcile(operation).await;
                outcome(index, operation, ItemStatus::Failed(error), report)
            }
        }
    }

    /// Run an atomic batch: all items in order, undone together on failure.
    ///
    /// Deletes are staged instead of performed, and the tree is only updated
    /// once every item has succeeded, so a rolled-back batch leaves node
    /// identities untouched. Cancelling stops before the next item and
    /// commits the items already applied.
    async fn run_atomic(
        &self,
        operations: Arc<Vec<FileOperation>>,
        cancel: &CancellationToken,
        tx: &mpsc::Sender<BatchEvent>,
    ) -> BatchComplete {
        let total = operations.len();
        let mut complete = BatchComplete::new(total);
        let mut statuses: Vec<Option<ItemStatus>> = (0..total).map(|_| None).collect();
        let mut reports: Vec<ChangeReport> = (0..total).map(|_| ChangeReport::new()).collect();

        for index in redundant_deletes(&operations) {
            statuses[index] = Some(ItemStatus::Skipped);
        }

        let mut aborted = false;
        for (index, conflict) in self.preflight(&operations).await.into_iter().enumerate() {
            let Some(conflict) = conflict else {
                continue;
            };
            if statuses[index].is_none() {
                statuses[index] = Some(ItemStatus::Failed(conflict.into_error()));
                aborted = true;
            }
        }

        let mut log = UndoLog::new();
        let mut attempted = Vec::new();
        let mut interrupted = false;
        if !aborted {
            for (index, operation) in operations.iter().enumerate() {
                if statuses[index].is_some() {
                    continue;
                }
                if cancel.is_cancelled() {
                    interrupted = true;
                    break;
                }
                attempted.push(index);
                match self.apply(operation, true).await {
                    Ok(applied) => log.record(index, applied),
                    Err(error) => {
                        warn!(index, %operation, error = %error, "atomic batch item failed");
                        statuses[index] = Some(ItemStatus::Failed(error));
                        aborted = true;
                        break;
                    }
                }
            }
        }

        debug!(applied = log.len(), aborted, interrupted, "atomic batch applied");
        let entries = log.into_entries();

        // Staged deletes are the one step that cannot be undone, so they are
        // made permanent before anything else is committed.
        let mut removed = Vec::new();
        if !aborted {
            for entry in entries.iter().filter(|e| e.operation.is_staged_delete()) {
                let finalize = entry.operation.clone();
                match blocking(move || finalize.finalize()).await {
                    Ok(()) => removed.push(entry.index),
                    Err(error) => {
                        warn!(index = entry.index, error = %error, "could not remove staged entry");
                        let restore = entry.operation.clone();
                        if let Err(restore_error) = blocking(move || restore.compensate()).await {
                            warn!(index = entry.index, error = %restore_error, "could not restore staged entry");
                        }
                        statuses[entry.index] = Some(ItemStatus::Failed(error));
                        aborted = true;
                        break;
                    }
                }
            }
        }

        if aborted {
            for entry in entries.iter().rev() {
                if statuses[entry.index].is_some() {
                    continue;
                }
                let status = if removed.contains(&entry.index) {
                    ItemStatus::RollbackFailed(SyncError::Io {
                        path: entry.operation.primary_path().to_path_buf(),
                        source: std::io::Error::other("already removed when a later delete failed"),
                    })
                } else {
                    let undo = entry.operation.clone();
                    match blocking(move || undo.compensate()).await {
                        Ok(()) => ItemStatus::RolledBack,
                        Err(error) => {
                            warn!(index = entry.index, error = %error, "compensation failed");
                            ItemStatus::RollbackFailed(error)
                        }
                    }
                };
                statuses[entry.index] = Some(status);
            }
            for index in attempted {
                reports[index] = self.reconcile(&operations[index]).await;
            }
            complete.aborted = true;
        } else {
            // A cancellation keeps what was already applied; only items that
            // never started are reported as cancelled.
            for entry in &entries {
                reports[entry.index] = self.reflect(&entry.operation).await;
                statuses[entry.index] = Some(ItemStatus::Succeeded);
            }
        }

        for (index, (status, report)) in statuses.into_iter().zip(reports).enumerate() {
            let status = status.unwrap_or(if interrupted {
                ItemStatus::Cancelled
            } else {
                ItemStatus::Skipped
            });
            emit(tx, &mut complete, outcome(index, &operations[index], status, report)).await;
        }
        complete
    }

    async fn preflight(&self, operations: &Arc<Vec<FileOperation>>) -> Vec<Option<Conflict>> {
        let owned = operations.clone();
        let len = operations.len();
        tokio::task::spawn_blocking(move || preflight(&owned))
            .await
            .unwrap_or_else(|_| vec![None; len])
    }

    /// Perform `operation` on disk.
    async fn apply(
        &self,
        operation: &FileOperation,
        staged: bool,
    ) -> Result<UndoableOperation, SyncError> {
        let operation = operation.clone();
        let use_trash = self.use_trash;

        blocking(move || match operation {
            FileOperation::Create { path, kind } => {
                let topmost = create_entry(&path, kind)?;
                Ok(UndoableOperation::Created { path, topmost })
            }
            FileOperation::Delete { path } if staged => {
                let staged = stage_delete(&path)?;
                Ok(UndoableOperation::Deleted {
                    original: path,
                    staged: Some(staged),
                })
            }
            FileOperation::Delete { path } => {
                delete_entry(&path, use_trash)?;
                Ok(UndoableOperation::Deleted {
                    original: path,
                    staged: None,
                })
            }
            FileOperation::Move {
                source,
                destination,
            } => {
                move_entry(&source, &destination)?;
                Ok(UndoableOperation::Moved {
                    from: source,
                    to: destination,
                })
            }
            FileOperation::Copy {
                source,
                destination,
            } => {
                copy_entry(&source, &destination)?;
                Ok(UndoableOperation::Copied {
                    created: destination,
                })
            }
            FileOperation::Rename { source, new_name } => {
                let to = rename_entry(&source, &new_name)?;
                Ok(UndoableOperation::Moved { from: source, to })
            }
        })
        .await
    }

    /// Apply a change that happened on disk to the tree.
    async fn reflect(&self, applied: &UndoableOperation) -> ChangeReport {
        let fresh = match applied {
            UndoableOperation::Created { path, topmost } => created_chain(topmost, path),
            UndoableOperation::Moved { to, .. } => vec![to.clone()],
            UndoableOperation::Copied { created } => vec![created.clone()],
            UndoableOperation::Deleted { .. } => Vec::new(),
        };
        let observed = stat_all(fresh).await;
        let _guards = self.lock_parents(&applied.affected_paths()).await;

        let mut report = ChangeReport::new();
        match applied {
            UndoableOperation::Created { topmost, .. } => {
                if let Some(parent) = topmost.parent().and_then(|p| self.tree.resolve_path(p)) {
                    self.expand(parent, &mut report);
                }
                let last = observed.len().saturating_sub(1);
                for (position, entry) in observed.into_iter().enumerate() {
                    let path = entry.path.clone();
                    report.merge(self.tree.upsert(entry));
                    // Directories created on the way down are fully known.
                    if position < last {
                        if let Some(id) = self.tree.resolve_path(&path) {
                            self.expand(id, &mut report);
                        }
                    }
                }
            }
            UndoableOperation::Moved { from, to } => {
                if let Some(id) = self.tree.resolve_path(from) {
                    report.merge(self.tree.relocate(id, to));
                }
                for entry in observed {
                    report.merge(self.tree.upsert(entry));
                }
            }
            UndoableOperation::Copied { .. } => {
                for entry in observed {
                    report.merge(self.tree.upsert(entry));
                }
            }
            UndoableOperation::Deleted { original, .. } => {
                report.merge(self.tree.remove_path(original));
            }
        }
        report
    }

    /// Re-stat every path `operation` touched and make the tree agree.
    async fn reconcile(&self, operation: &FileOperation) -> ChangeReport {
        let paths = operation.touched_paths();
        let checked = paths.clone();
        let observed = blocking(move || {
            Ok(checked
                .into_iter()
                .map(|path| match EntryObservation::stat(&path) {
                    Ok(entry) => (path, Some(entry)),
                    Err(_) => (path, None),
                })
                .collect::<Vec<_>>())
        })
        .await
        .unwrap_or_default();

        let affected: Vec<&Path> = paths.iter().map(PathBuf::as_path).collect();
        let _guards = self.lock_parents(&affected).await;

        let mut report = ChangeReport::new();
        for (path, entry) in observed {
            match entry {
                Some(entry) => report.merge(self.tree.upsert(entry)),
                None => report.merge(self.tree.remove_path(&path)),
            }
        }
        report
    }

    fn expand(&self, id: NodeId, report: &mut ChangeReport) {
        if let Ok(expanded) = self.tree.set_expanded(id, true) {
            report.merge(expanded);
        }
    }

    /// Take the writer locks of every loaded parent of `paths`, always in
    /// ascending id order so two batches can never wait on each other.
    async fn lock_parents(&self, paths: &[&Path]) -> Vec<OwnedMutexGuard<()>> {
        let mut parents: Vec<_> = paths
            .iter()
            .filter_map(|path| path.parent())
            .filter_map(|parent| self.tree.resolve_path(parent))
            .collect();
        parents.sort_unstable();
        parents.dedup();

        let mut guards = Vec::with_capacity(parents.len());
        for parent in parents {
            guards.push(self.tree.dir_lock(parent).lock_owned().await);
        }
        guards
    }
}

fn outcome(
    index: usize,
    operation: &FileOperation,
    status: ItemStatus,
    report: ChangeReport,
) -> OperationOutcome {
    OperationOutcome {
        index,
        operation: operation.clone(),
        status,
        report,
    }
}

async fn emit(tx: &mpsc::Sender<BatchEvent>, tally: &mut BatchComplete, outcome: OperationOutcome) {
    tally.record(&outcome.status);
    let _ = tx.send(BatchEvent::Outcome(outcome)).await;
}

/// Run blocking filesystem work off the async threads.
async fn blocking<T, F>(work: F) -> Result<T, SyncError>
where
    F: FnOnce() -> Result<T, SyncError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| SyncError::Io {
            path: PathBuf::new(),
            source: std::io::Error::other(e),
        })?
}

async fn stat_all(paths: Vec<PathBuf>) -> Vec<EntryObservation> {
    blocking(move || {
        Ok(paths
            .iter()
            .filter_map(|path| EntryObservation::stat(path).ok())
            .collect())
    })
    .await
    .unwrap_or_default()
}
