//! Registry of live transactions
//!
//! Tracks every transaction from begin until finish. Besides membership it
//! answers two ordered queries in O(log n): the oldest and the newest
//! snapshot root among live transactions. Both drive deferred-task gating.
//!
//! A `revert` refreshes a transaction's snapshot root; re-inserting the
//! same transaction id moves it between root buckets without duplicating.

use arbor_core::Address;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;

/// Meta-tree root a transaction observes; `None` before the first commit
/// ever published one
pub type SnapshotRoot = Option<Address>;

/// Bookkeeping for one live transaction
#[derive(Debug, Clone)]
pub struct TxnEntry {
    /// Snapshot root captured at begin or at the last revert
    pub root: SnapshotRoot,
    /// When the transaction began
    pub created: Instant,
    /// Creating thread, recorded when the stuck-transaction monitor is on
    pub thread_name: Option<String>,
    /// Whether the transaction is read-only
    pub readonly: bool,
}

#[derive(Default)]
struct SetInner {
    by_id: HashMap<u64, TxnEntry>,
    // Multiset of live roots; values are reference counts
    roots: BTreeMap<SnapshotRoot, usize>,
}

impl SetInner {
    fn bump(&mut self, root: SnapshotRoot) {
        *self.roots.entry(root).or_insert(0) += 1;
    }

    fn unbump(&mut self, root: SnapshotRoot) {
        if let Some(count) = self.roots.get_mut(&root) {
            *count -= 1;
            if *count == 0 {
                self.roots.remove(&root);
            }
        }
    }
}

/// Ordered collection of live transactions
#[derive(Clone, Default)]
pub struct TransactionSet {
    inner: Arc<Mutex<SetInner>>,
}

impl TransactionSet {
    /// Create an empty set
    pub fn new() -> Self {
        TransactionSet::default()
    }

    /// Register a transaction, or refresh its root if already present
    pub fn insert(&self, id: u64, entry: TxnEntry) {
        let mut inner = self.inner.lock();
        if let Some(existing) = inner.by_id.get(&id) {
            let old_root = existing.root;
            if old_root != entry.root {
                inner.unbump(old_root);
                inner.bump(entry.root);
            }
            inner.by_id.insert(id, entry);
        } else {
            inner.bump(entry.root);
            inner.by_id.insert(id, entry);
        }
    }

    /// Remove a transaction; returns whether it was present
    pub fn remove(&self, id: u64) -> bool {
        let mut inner = self.inner.lock();
        match inner.by_id.remove(&id) {
            Some(entry) => {
                inner.unbump(entry.root);
                true
            }
            None => false,
        }
    }

    /// Check membership
    pub fn contains(&self, id: u64) -> bool {
        self.inner.lock().by_id.contains_key(&id)
    }

    /// Number of live transactions
    pub fn count(&self) -> usize {
        self.inner.lock().by_id.len()
    }

    /// Check if no transaction is live
    pub fn is_empty(&self) -> bool {
        self.inner.lock().by_id.is_empty()
    }

    /// Smallest snapshot root among live transactions
    pub fn oldest_root(&self) -> Option<SnapshotRoot> {
        self.inner.lock().roots.keys().next().copied()
    }

    /// Largest snapshot root among live transactions
    pub fn newest_root(&self) -> Option<SnapshotRoot> {
        self.inner.lock().roots.keys().next_back().copied()
    }

    /// Clone of every live entry, for the stuck-transaction monitor
    pub fn entries(&self) -> Vec<(u64, TxnEntry)> {
        self.inner
            .lock()
            .by_id
            .iter()
            .map(|(id, entry)| (*id, entry.clone()))
            .collect()
    }
}
