//! Commands consumed by the engine's worker.

use std::path::PathBuf;

use tokio::sync::{mpsc, oneshot};

use treesync_core::{ChangeReport, NodeId, SyncError};
use treesync_ops::{Batch, BatchEvent};
use treesync_scan::{ScanDepth, ScanSummary};

/// Commands understood by the engine worker.
///
/// Each command is picked up in the order it was sent and starts its work
/// right away; long-running work (scans, git queries, batches) proceeds
/// concurrently with later commands. Optional `done` senders are answered
/// when the work finishes.
#[derive(Debug)]
pub enum EngineCommand {
    /// Rescan a directory, or every expanded directory below it.
    RequestScan {
        node: NodeId,
        depth: ScanDepth,
        done: Option<oneshot::Sender<ScanSummary>>,
    },
    /// Mark a directory expanded and list it.
    Expand {
        node: NodeId,
        done: Option<oneshot::Sender<Result<ChangeReport, SyncError>>>,
    },
    /// Mark a directory collapsed. Its children stay tracked.
    Collapse { node: NodeId },
    /// Run a batch of file operations, streaming events to `events`.
    OperationBatch {
        batch: Batch,
        events: Option<mpsc::Sender<BatchEvent>>,
    },
    /// Refresh git status for one repository, or for every known one.
    GitRefresh {
        root: Option<PathBuf>,
        done: Option<oneshot::Sender<ChangeReport>>,
    },
    /// Toggle whether git-ignored entries are listed.
    SetIgnoredVisible(bool),
    /// Toggle whether dotfiles are listed.
    SetHiddenVisible(bool),
    /// Cancel in-flight scans, refreshes and batches.
    CancelAll,
    /// Stop the worker thread.
    Shutdown,
}
