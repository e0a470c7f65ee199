//! Git integration for treesync.
//!
//! [`RepoDiscovery`] finds the working tree that contains a scanned path and
//! remembers the answer, including "no repository". [`GitStatusProvider`]
//! queries one working tree through libgit2 and hands back a
//! [`RepoStatus`](treesync_core::RepoStatus) ready for the status overlay.

mod discover;
mod provider;

pub use discover::RepoDiscovery;
pub use provider::{GitStatusProvider, classify_flags};

pub use treesync_core::{GitStatus, RepoStatus, SyncError};
