//! Events broadcast to engine subscribers.

use std::path::PathBuf;

use treesync_core::{ChangeReport, ChangeSource, ChildFilter, ScanWarning};
use treesync_ops::BatchComplete;
use treesync_scan::ScanSummary;

/// Something observable changed.
///
/// Reports from different sources may overlap; consumers should treat them
/// idempotently.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// Nodes were inserted, updated or removed.
    Changed {
        source: ChangeSource,
        report: ChangeReport,
    },
    /// Non-fatal problems found while listing a directory.
    Warnings(Vec<ScanWarning>),
    /// A localized failure. The rest of the tree is unaffected.
    Failed {
        source: ChangeSource,
        path: Option<PathBuf>,
        message: String,
    },
    /// Display filters changed; listings should be re-queried.
    FilterChanged(ChildFilter),
    /// A scan request finished.
    ScanFinished(ScanSummary),
    /// An operation batch finished.
    BatchFinished(BatchComplete),
}

impl EngineEvent {
    /// The change report carried by this event, if any.
    pub fn report(&self) -> Option<&ChangeReport> {
        match self {
            Self::Changed { report, .. } => Some(report),
            _ => None,
        }
    }
}
