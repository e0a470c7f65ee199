//! File operations engine for treesync.
//!
//! Batches of create, delete, move, copy and rename operations run against
//! the real filesystem. Each completed item is reflected into the
//! [`TreeStore`](treesync_core::TreeStore) with a minimal update rather than
//! a rescan, and every item's outcome is streamed back through a channel.
//! Atomic batches compensate already-applied items when one fails.

mod conflict;
mod copy;
mod create;
mod delete;
mod executor;
mod move_op;
mod operation;
mod progress;
mod rename;
mod undo;

pub use conflict::{Conflict, ConflictKind, conflict_groups, redundant_deletes};
pub use executor::OperationExecutor;
pub use operation::{Batch, CreateKind, FileOperation};
pub use progress::{BatchComplete, BatchEvent, ItemStatus, OperationOutcome};
pub use rename::validate_filename;
pub use undo::{UndoEntry, UndoLog, UndoableOperation};

/// Default channel buffer size for batch events.
pub const OPERATION_CHANNEL_SIZE: usize = 100;
