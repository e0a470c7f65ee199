//! Change notifications.

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};

use crate::node::NodeId;

/// Which component produced a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeSource {
    Scan,
    Status,
    Operation,
}

/// Node identifiers touched by one mutation, in the order they were touched.
///
/// Reports are deduplicated within one producer; consumers must tolerate
/// overlapping reports from different producers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeReport {
    /// Newly created nodes.
    pub inserted: IndexSet<NodeId>,
    /// Nodes whose metadata, path or status changed.
    pub updated: IndexSet<NodeId>,
    /// Retired nodes, including every descendant of a removed directory.
    pub removed: IndexSet<NodeId>,
}

impl ChangeReport {
    /// Create an empty report.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether nothing changed.
    pub fn is_empty(&self) -> bool {
        self.inserted.is_empty() && self.updated.is_empty() && self.removed.is_empty()
    }

    /// Total number of touched identifiers.
    pub fn len(&self) -> usize {
        self.inserted.len() + self.updated.len() + self.removed.len()
    }

    /// Whether `id` appears anywhere in the report.
    pub fn touches(&self, id: NodeId) -> bool {
        self.inserted.contains(&id) || self.updated.contains(&id) || self.removed.contains(&id)
    }

    pub(crate) fn insert(&mut self, id: NodeId) {
        self.inserted.insert(id);
    }

    pub(crate) fn update(&mut self, id: NodeId) {
        if !self.inserted.contains(&id) {
            self.updated.insert(id);
        }
    }

    pub(crate) fn remove(&mut self, id: NodeId) {
        // An id that was born and retired inside one report was never visible.
        if !self.inserted.shift_remove(&id) {
            self.removed.insert(id);
        }
        self.updated.shift_remove(&id);
    }

    /// Fold a later report into this one.
    pub fn merge(&mut self, other: ChangeReport) {
        for id in other.inserted {
            self.insert(id);
        }
        for id in other.updated {
            self.update(id);
        }
        for id in other.removed {
            self.remove(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_collapses_insert_then_remove() {
        let mut first = ChangeReport::new();
        first.insert(NodeId::new(1));
        first.insert(NodeId::new(2));

        let mut second = ChangeReport::new();
        second.update(NodeId::new(1));
        second.remove(NodeId::new(2));
        second.remove(NodeId::new(3));

        first.merge(second);
        assert_eq!(first.inserted.len(), 1);
        assert!(first.inserted.contains(&NodeId::new(1)));
        assert!(first.updated.is_empty());
        assert_eq!(first.removed.len(), 1);
        assert!(first.removed.contains(&NodeId::new(3)));
    }

    #[test]
    fn test_empty_report() {
        let report = ChangeReport::new();
        assert!(report.is_empty());
        assert_eq!(report.len(), 0);
        assert!(!report.touches(NodeId::new(7)));
    }
}
