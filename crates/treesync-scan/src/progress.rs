//! Scan tallies.

use std::time::Duration;

/// Final tally of one scan request.
#[derive(Debug, Clone, Default)]
pub struct ScanSummary {
    /// Directories whose listing was applied.
    pub directories_scanned: usize,
    /// Directories that failed to read.
    pub directories_failed: usize,
    /// Entries listed across every applied directory, changed or not.
    pub entries_seen: usize,
    /// Entry-level warnings across every applied directory.
    pub warnings: usize,
    /// Whether the scan stopped early on cancellation.
    pub cancelled: bool,
    /// Wall time of the scan.
    pub elapsed: Duration,
}

impl ScanSummary {
    /// Count one applied directory listing.
    pub(crate) fn record_directory(&mut self, entries: usize, warnings: usize) {
        self.directories_scanned += 1;
        self.entries_seen += entries;
        self.warnings += warnings;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_directory_accumulates() {
        let mut summary = ScanSummary::default();
        summary.record_directory(10, 1);
        summary.record_directory(0, 0);
        summary.record_directory(3, 2);
        assert_eq!(summary.directories_scanned, 3);
        assert_eq!(summary.entries_seen, 13);
        assert_eq!(summary.warnings, 3);
        assert_eq!(summary.directories_failed, 0);
    }
}
