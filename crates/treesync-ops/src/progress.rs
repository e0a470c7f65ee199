//! Outcome reporting types for batch execution.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use treesync_core::{ChangeReport, SyncError};

use crate::operation::FileOperation;

/// Final state of one batch item.
#[derive(Debug)]
pub enum ItemStatus {
    /// Applied on disk and in the tree.
    Succeeded,
    /// Not applied. The tree was re-verified against disk for its paths.
    Failed(SyncError),
    /// Applied, then undone because another item of an atomic batch failed.
    RolledBack,
    /// Applied, and undoing it failed; disk keeps the change.
    RollbackFailed(SyncError),
    /// Never started: the batch was cancelled first.
    Cancelled,
    /// Never started: covered by another item or by an aborted atomic batch.
    Skipped,
}

impl ItemStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }

    /// The error carried by a failed item.
    pub fn error(&self) -> Option<&SyncError> {
        match self {
            Self::Failed(error) | Self::RollbackFailed(error) => Some(error),
            _ => None,
        }
    }
}

/// Outcome of one item, in the order items finish.
#[derive(Debug)]
pub struct OperationOutcome {
    /// Position of the item in the submitted batch.
    pub index: usize,
    pub operation: FileOperation,
    pub status: ItemStatus,
    /// Tree changes this item caused.
    pub report: ChangeReport,
}

/// Result of a completed batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchComplete {
    /// Number of items in the batch.
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub rolled_back: usize,
    pub cancelled: usize,
    pub skipped: usize,
    /// Whether an atomic batch was undone.
    pub aborted: bool,
    pub elapsed: Duration,
}

impl BatchComplete {
    pub(crate) fn new(total: usize) -> Self {
        Self {
            total,
            ..Default::default()
        }
    }

    pub(crate) fn record(&mut self, status: &ItemStatus) {
        match status {
            ItemStatus::Succeeded => self.succeeded += 1,
            ItemStatus::Failed(_) | ItemStatus::RollbackFailed(_) => self.failed += 1,
            ItemStatus::RolledBack => self.rolled_back += 1,
            ItemStatus::Cancelled => self.cancelled += 1,
            ItemStatus::Skipped => self.skipped += 1,
        }
    }

    pub(crate) fn absorb(&mut self, other: &BatchComplete) {
        self.succeeded += other.succeeded;
        self.failed += other.failed;
        self.rolled_back += other.rolled_back;
        self.cancelled += other.cancelled;
        self.skipped += other.skipped;
    }

    /// Check if every item was applied.
    pub fn is_success(&self) -> bool {
        self.failed == 0 && self.rolled_back == 0 && self.cancelled == 0 && !self.aborted
    }

    /// `PartialBatchFailure` when any item failed.
    pub fn error(&self) -> Option<SyncError> {
        (self.failed > 0).then_some(SyncError::PartialBatchFailure {
            failed: self.failed,
            total: self.total,
        })
    }

    /// Get a human-readable summary of the batch.
    pub fn summary(&self) -> String {
        if self.aborted {
            return format!(
                "Batch rolled back: {} failed, {} undone",
                self.failed, self.rolled_back
            );
        }
        let mut summary = format!("Applied {} of {} operations", self.succeeded, self.total);
        if self.failed > 0 {
            summary.push_str(&format!(", {} failed", self.failed));
        }
        if self.cancelled > 0 {
            summary.push_str(&format!(", {} cancelled", self.cancelled));
        }
        summary
    }
}

/// Event sent through the channel while a batch runs.
#[derive(Debug)]
pub enum BatchEvent {
    /// One item finished.
    Outcome(OperationOutcome),
    /// Every item finished.
    Complete(BatchComplete),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_and_error() {
        let mut complete = BatchComplete::new(3);
        complete.record(&ItemStatus::Succeeded);
        complete.record(&ItemStatus::Succeeded);
        assert!(complete.error().is_none());

        complete.record(&ItemStatus::Failed(SyncError::Interrupted));
        assert!(!complete.is_success());
        assert_eq!(complete.summary(), "Applied 2 of 3 operations, 1 failed");
        assert!(matches!(
            complete.error(),
            Some(SyncError::PartialBatchFailure {
                failed: 1,
                total: 3
            })
        ));
    }
}
