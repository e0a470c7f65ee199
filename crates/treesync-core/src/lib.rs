//! Core types for treesync.
//!
//! This crate owns the in-memory mirror of a directory subtree: the
//! [`PathIndex`] that hands out stable [`NodeId`]s, the [`TreeStore`] that is
//! the single mutation authority over nodes, and the [`StatusOverlay`] that
//! merges git status onto those nodes. Scanning, git queries and file
//! operations live in their own crates and only talk to the tree through the
//! methods exposed here.

mod config;
mod error;
mod node;
mod overlay;
mod path_index;
pub mod paths;
mod report;
mod status;
mod tree;

pub use config::{EngineConfig, EngineConfigBuilder};
pub use error::{ScanWarning, SyncError, WarningKind};
pub use node::{EntryObservation, GitStatus, Node, NodeId, NodeKind, SymlinkTarget, render_order};
pub use overlay::StatusOverlay;
pub use path_index::PathIndex;
pub use report::{ChangeReport, ChangeSource};
pub use status::RepoStatus;
pub use tree::{ChildFilter, ScanCompleteness, TreeStore};
