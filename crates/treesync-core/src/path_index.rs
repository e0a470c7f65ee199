//! Canonical registry of paths to stable node identifiers.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::node::NodeId;
use crate::paths::normalize;

/// Bidirectional path <-> [`NodeId`] table.
///
/// Reads go straight to sharded maps and never wait on the writer mutex.
/// Every write (interning, rebinding, retiring) is serialized through one
/// mutex so that a path is never bound to two identifiers.
#[derive(Debug)]
pub struct PathIndex {
    by_path: DashMap<PathBuf, NodeId>,
    by_id: DashMap<NodeId, PathBuf>,
    next_id: AtomicU64,
    write: Mutex<()>,
}

impl PathIndex {
    /// Create an empty index.
    pub fn new() -> Self {
        Self {
            by_path: DashMap::new(),
            by_id: DashMap::new(),
            next_id: AtomicU64::new(0),
            write: Mutex::new(()),
        }
    }

    /// Return the identifier for `path`, allocating one if needed.
    ///
    /// Idempotent: distinct spellings of the same normalized path collapse
    /// onto one identifier.
    pub fn intern(&self, path: &Path) -> NodeId {
        let path = normalize(path);
        if let Some(id) = self.by_path.get(&path) {
            return *id;
        }

        let _guard = self.write.lock();
        if let Some(id) = self.by_path.get(&path) {
            return *id;
        }
        let id = NodeId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.by_id.insert(id, path.clone());
        self.by_path.insert(path, id);
        id
    }

    /// Path currently bound to `id`.
    pub fn path_of(&self, id: NodeId) -> Option<PathBuf> {
        self.by_id.get(&id).map(|p| p.value().clone())
    }

    /// Identifier currently bound to `path`.
    pub fn id_of(&self, path: &Path) -> Option<NodeId> {
        self.by_path.get(&normalize(path)).map(|id| *id.value())
    }

    /// Rebind several identifiers to new paths in one critical section.
    pub fn rebind(&self, moves: &[(NodeId, PathBuf)]) {
        let _guard = self.write.lock();
        for (id, _) in moves {
            if let Some((_, old)) = self.by_id.remove(id) {
                self.by_path.remove_if(&old, |_, bound| bound == id);
            }
        }
        for (id, new_path) in moves {
            let new_path = normalize(new_path);
            self.by_id.insert(*id, new_path.clone());
            self.by_path.insert(new_path, *id);
        }
    }

    /// Retire identifiers. They are never handed out again.
    pub fn retire(&self, ids: &[NodeId]) {
        let _guard = self.write.lock();
        for id in ids {
            if let Some((_, path)) = self.by_id.remove(id) {
                self.by_path.remove_if(&path, |_, bound| bound == id);
            }
        }
    }

    /// Number of live bindings.
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    /// Whether no paths are bound.
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

impl Default for PathIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intern_is_idempotent_across_spellings() {
        let index = PathIndex::new();
        let a = index.intern(Path::new("/repo/src/lib.rs"));
        let b = index.intern(Path::new("/repo/./src//lib.rs"));
        let c = index.intern(Path::new("/repo/docs/../src/lib.rs"));
        assert_eq!(a, b);
        assert_eq!(a, c);
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_retired_ids_are_not_reused() {
        let index = PathIndex::new();
        let first = index.intern(Path::new("/a"));
        index.retire(&[first]);
        assert!(index.id_of(Path::new("/a")).is_none());
        assert!(index.path_of(first).is_none());

        let second = index.intern(Path::new("/a"));
        assert_ne!(first, second);
    }

    #[test]
    fn test_rebind_keeps_identity() {
        let index = PathIndex::new();
        let id = index.intern(Path::new("/x/f.txt"));
        index.rebind(&[(id, PathBuf::from("/y/f.txt"))]);

        assert_eq!(index.id_of(Path::new("/y/f.txt")), Some(id));
        assert!(index.id_of(Path::new("/x/f.txt")).is_none());
        assert_eq!(index.path_of(id), Some(PathBuf::from("/y/f.txt")));
    }

    #[test]
    fn test_rebind_swap() {
        let index = PathIndex::new();
        let a = index.intern(Path::new("/a"));
        let b = index.intern(Path::new("/b"));
        index.rebind(&[(a, PathBuf::from("/b")), (b, PathBuf::from("/a"))]);
        assert_eq!(index.id_of(Path::new("/a")), Some(b));
        assert_eq!(index.id_of(Path::new("/b")), Some(a));
    }

    #[test]
    fn test_concurrent_intern_yields_one_id() {
        let index = std::sync::Arc::new(PathIndex::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let index = index.clone();
                std::thread::spawn(move || index.intern(Path::new("/shared")))
            })
            .collect();
        let ids: Vec<NodeId> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(ids.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(index.len(), 1);
    }
}
