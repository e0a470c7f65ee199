//! Directory scanning engine for treesync.
//!
//! The scanner reads one directory at a time, diffs what it finds against
//! the tree's current children and applies the difference through
//! [`TreeStore::apply_changeset`](treesync_core::TreeStore::apply_changeset).
//! Work is cancellable between directory reads and during enumeration; a
//! directory whose read did not finish is never pruned.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//! use treesync_scan::{ScanDepth, ScanUpdate, Scanner, TreeStore};
//!
//! # async fn run() -> Result<(), treesync_scan::SyncError> {
//! let tree = Arc::new(TreeStore::new("/path/to/root")?);
//! let scanner = Scanner::new(tree.clone());
//! let mut updates = scanner.scan(tree.root(), ScanDepth::Recursive, CancellationToken::new());
//! while let Some(update) = updates.recv().await {
//!     if let ScanUpdate::Complete(summary) = update {
//!         println!("scanned {} directories", summary.directories_scanned);
//!     }
//! }
//! # Ok(())
//! # }
//! ```

mod listing;
mod progress;
mod scanner;

pub use progress::ScanSummary;
pub use scanner::{DirectoryScan, ScanDepth, ScanUpdate, Scanner};

// Re-export core types for convenience
pub use treesync_core::{
    ChangeReport, EntryObservation, NodeId, ScanCompleteness, ScanWarning, SyncError, TreeStore,
};

/// Default channel buffer size for scan updates.
pub const SCAN_CHANNEL_SIZE: usize = 100;
