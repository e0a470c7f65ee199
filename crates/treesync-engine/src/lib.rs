//! Synchronization engine façade for treesync.
//!
//! An [`Engine`] owns one [`TreeStore`](treesync_core::TreeStore) and the
//! components that keep it in step with disk and git: the scanner, the git
//! status provider with its overlay, and the operation executor. Consumers
//! query the tree directly, drive it by sending [`EngineCommand`]s, and
//! observe it through [`EngineEvent`]s.

mod command;
mod engine;
mod event;

pub use command::EngineCommand;
pub use engine::Engine;
pub use event::EngineEvent;

pub use treesync_core::{
    ChangeReport, ChangeSource, ChildFilter, EngineConfig, EngineConfigBuilder, GitStatus, Node,
    NodeId, NodeKind, RepoStatus, SyncError, TreeStore,
};
pub use treesync_ops::{Batch, BatchComplete, BatchEvent, FileOperation, ItemStatus};
pub use treesync_scan::{ScanDepth, ScanSummary};
