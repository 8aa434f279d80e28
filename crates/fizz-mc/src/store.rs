//! Visited-state table.

use crate::graph::NodeId;
use crate::state::{Fingerprint, StateKey};
use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::error;

#[derive(Debug, Clone, Copy)]
struct Slot {
    node: NodeId,
    check: u64,
}

/// Map from canonical fingerprint to the node that owns that state.
#[derive(Debug, Default)]
pub struct VisitedStore {
    nodes: DashMap<Fingerprint, Slot>,
    /// Number of hash collisions detected (different states, same fingerprint).
    collisions: AtomicUsize,
}

impl VisitedStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up the node for `key`. A fingerprint hit whose check hash
    /// differs is a collision: it is logged once and still treated as a hit,
    /// matching what a plain fingerprint table would do.
    pub fn get(&self, key: &StateKey) -> Option<NodeId> {
        let slot = *self.nodes.get(&key.fingerprint)?;
        if slot.check != key.check {
            self.record_collision(key.fingerprint);
        }
        Some(slot.node)
    }

    #[inline]
    pub fn contains(&self, fp: &Fingerprint) -> bool {
        self.nodes.contains_key(fp)
    }

    /// Inserts or replaces the owner of `key`.
    pub fn insert(&self, key: StateKey, node: NodeId) {
        use dashmap::mapref::entry::Entry;
        match self.nodes.entry(key.fingerprint) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().check != key.check {
                    self.record_collision(key.fingerprint);
                }
                occupied.insert(Slot {
                    node,
                    check: key.check,
                });
            }
            Entry::Vacant(entry) => {
                entry.insert(Slot {
                    node,
                    check: key.check,
                });
            }
        }
    }

    fn record_collision(&self, fp: Fingerprint) {
        let n = self.collisions.fetch_add(1, Ordering::Relaxed);
        if n == 0 {
            error!(
                fingerprint = %fp,
                "hash collision detected: different states share fingerprint, results may be unsound"
            );
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn collision_count(&self) -> usize {
        self.collisions.load(Ordering::Relaxed)
    }

    pub fn clear(&self) {
        self.nodes.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(fp: u64, check: u64) -> StateKey {
        StateKey {
            fingerprint: Fingerprint::from_u64(fp),
            check,
        }
    }

    #[test]
    fn test_insert_and_lookup() {
        let store = VisitedStore::new();
        assert!(store.is_empty());
        store.insert(key(1, 10), NodeId::new(0));
        assert_eq!(store.get(&key(1, 10)), Some(NodeId::new(0)));
        assert_eq!(store.get(&key(2, 10)), None);
        assert!(store.contains(&Fingerprint::from_u64(1)));

        store.insert(key(1, 10), NodeId::new(3));
        assert_eq!(store.get(&key(1, 10)), Some(NodeId::new(3)));
        assert_eq!(store.len(), 1);
        assert_eq!(store.collision_count(), 0);
    }

    #[test]
    fn test_collision_counted() {
        let store = VisitedStore::new();
        store.insert(key(7, 1), NodeId::new(0));
        assert_eq!(store.get(&key(7, 2)), Some(NodeId::new(0)));
        assert_eq!(store.collision_count(), 1);
        store.clear();
        assert!(store.is_empty());
    }
}
