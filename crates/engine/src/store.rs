//! Store handles
//!
//! A [`Store`] is a named key–value space inside the environment. The
//! handle itself is cheap and stateless: every operation goes through a
//! transaction, which resolves it against either the transaction's
//! mutable working set or its pinned snapshot.

use crate::transaction::Transaction;
use arbor_core::{Result, StructureId, TreeMetaInfo};

/// Handle to a named store
#[derive(Debug, Clone)]
pub struct Store {
    name: String,
    meta: TreeMetaInfo,
}

impl Store {
    pub(crate) fn new(name: impl Into<String>, meta: TreeMetaInfo) -> Self {
        Store {
            name: name.into(),
            meta,
        }
    }

    /// Name this store was opened under
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Descriptor this handle was opened with
    pub fn meta_info(&self) -> TreeMetaInfo {
        self.meta
    }

    /// Identity of the store's tree across snapshots
    pub fn structure_id(&self) -> StructureId {
        self.meta.structure_id
    }

    /// First value stored under `key`, as seen by `txn`
    pub fn get(&self, txn: &Transaction, key: &[u8]) -> Result<Option<Vec<u8>>> {
        txn.tree_get(&self.name, self.meta, key)
    }

    /// Every value stored under `key`, in insertion order
    pub fn get_all(&self, txn: &Transaction, key: &[u8]) -> Result<Vec<Vec<u8>>> {
        txn.tree_get_all(&self.name, self.meta, key)
    }

    /// Check if `key` is present
    pub fn contains(&self, txn: &Transaction, key: &[u8]) -> Result<bool> {
        txn.tree_contains(&self.name, self.meta, key)
    }

    /// Insert a value; materializes the transaction's mutable tree
    pub fn put(&self, txn: &mut Transaction, key: &[u8], value: &[u8]) -> Result<bool> {
        txn.tree_put(&self.name, self.meta, key, value)
    }

    /// Remove a key with all its values
    pub fn delete(&self, txn: &mut Transaction, key: &[u8]) -> Result<bool> {
        txn.tree_delete(&self.name, self.meta, key)
    }

    /// Number of keys visible to `txn`
    pub fn count(&self, txn: &Transaction) -> Result<u64> {
        txn.tree_count(&self.name, self.meta)
    }

    /// Check if the store is empty as seen by `txn`
    pub fn is_empty(&self, txn: &Transaction) -> Result<bool> {
        Ok(self.count(txn)? == 0)
    }

    /// Materialize all `(key, value)` pairs in key order
    pub fn entries(&self, txn: &Transaction) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        txn.tree_entries(&self.name, self.meta)
    }
}
