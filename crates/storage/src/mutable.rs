//! Copy-on-write working set over a tree snapshot
//!
//! A mutable tree buffers puts and deletes in memory. Nothing reaches the
//! log until `commit`, which appends the new values, rewritten leaves and
//! a new root in that order, so a failed append leaves the previous
//! revision fully intact and the caller rolls the log back by high
//! address.

use crate::expired::ExpiredLoggable;
use crate::tree::{encode_leaf, encode_root, ImmutableTree, LeafRef};
use arbor_core::{Address, Result, StructureId};
use arbor_durability::{Log, Loggable, TYPE_LEAF, TYPE_META_ROOT, TYPE_ROOT, TYPE_VALUE};
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
enum ValueRef {
    /// Value already in the log at this address
    Stored(Address),
    /// Value written by this working set, not yet appended
    Fresh(Vec<u8>),
}

/// Result of committing a mutable tree
#[derive(Debug)]
pub struct TreeCommit {
    /// Address of the new root page
    pub root: Address,
    /// Records superseded by this commit
    pub expired: Vec<ExpiredLoggable>,
}

/// Mutable copy of a tree, created lazily on first write
pub struct MutableTree {
    log: Log,
    structure_id: StructureId,
    duplicates: bool,
    page_size: usize,
    entries: BTreeMap<Vec<u8>, Vec<ValueRef>>,
    base: Option<ImmutableTree>,
    expired_values: Vec<Address>,
    changed: bool,
}

impl MutableTree {
    /// Copy-on-write over an existing snapshot
    pub fn from_snapshot(base: ImmutableTree, duplicates: bool, page_size: usize) -> Result<Self> {
        let mut entries = BTreeMap::new();
        for (key, addresses) in base.load_entries()? {
            entries.insert(key, addresses.into_iter().map(ValueRef::Stored).collect());
        }
        Ok(MutableTree {
            log: base.log().clone(),
            structure_id: base.structure_id(),
            duplicates,
            page_size,
            entries,
            base: Some(base),
            expired_values: Vec::new(),
            changed: false,
        })
    }

    /// Working set for a store that has no committed revision yet
    pub fn empty(log: Log, structure_id: StructureId, duplicates: bool, page_size: usize) -> Self {
        MutableTree {
            log,
            structure_id,
            duplicates,
            page_size,
            entries: BTreeMap::new(),
            base: None,
            expired_values: Vec::new(),
            changed: false,
        }
    }

    /// Identity of the tree across snapshots
    pub fn structure_id(&self) -> StructureId {
        self.structure_id
    }

    /// Whether any buffered put or delete exists
    pub fn has_changes(&self) -> bool {
        self.changed
    }

    /// Number of keys in the working set
    pub fn count(&self) -> u64 {
        self.entries.len() as u64
    }

    /// Insert a value
    ///
    /// Without duplicates the previous value (if any) is replaced and
    /// becomes a reclamation candidate at commit. With duplicates an
    /// identical existing value makes this a no-op returning `false`.
    pub fn put(&mut self, key: &[u8], value: &[u8]) -> Result<bool> {
        if self.duplicates {
            let log = self.log.clone();
            let slot = self.entries.entry(key.to_vec()).or_default();
            for existing in slot.iter() {
                if resolve_with(&log, existing)? == value {
                    return Ok(false);
                }
            }
            slot.push(ValueRef::Fresh(value.to_vec()));
        } else {
            let old = self
                .entries
                .insert(key.to_vec(), vec![ValueRef::Fresh(value.to_vec())]);
            if let Some(slot) = old {
                self.expire_slot(&slot);
            }
        }
        self.changed = true;
        Ok(true)
    }

    /// Remove a key with all its values
    pub fn delete(&mut self, key: &[u8]) -> Result<bool> {
        match self.entries.remove(key) {
            Some(slot) => {
                self.expire_slot(&slot);
                self.changed = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// First value stored under `key`
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        match self.entries.get(key).and_then(|slot| slot.first()) {
            Some(value) => Ok(Some(resolve_with(&self.log, value)?)),
            None => Ok(None),
        }
    }

    /// Every value stored under `key`, in insertion order
    pub fn get_all(&self, key: &[u8]) -> Result<Vec<Vec<u8>>> {
        match self.entries.get(key) {
            Some(slot) => slot
                .iter()
                .map(|value| resolve_with(&self.log, value))
                .collect(),
            None => Ok(Vec::new()),
        }
    }

    /// Check if the working set contains `key`
    pub fn contains(&self, key: &[u8]) -> bool {
        self.entries.contains_key(key)
    }

    /// Materialize all `(key, value)` pairs in key order
    pub fn entries(&self) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut out = Vec::new();
        for (key, slot) in &self.entries {
            for value in slot {
                out.push((key.clone(), resolve_with(&self.log, value)?));
            }
        }
        Ok(out)
    }

    /// Append this revision as a store tree
    pub fn commit(&mut self) -> Result<TreeCommit> {
        self.commit_inner(TYPE_ROOT)
    }

    /// Append this revision as the meta-tree
    pub fn commit_meta(&mut self) -> Result<TreeCommit> {
        self.commit_inner(TYPE_META_ROOT)
    }

    fn commit_inner(&mut self, root_type: u8) -> Result<TreeCommit> {
        // New values first, so leaves can reference their addresses
        let mut fresh_records = Vec::new();
        for slot in self.entries.values() {
            for value in slot {
                if let ValueRef::Fresh(bytes) = value {
                    fresh_records.push(Loggable::new(
                        TYPE_VALUE,
                        self.structure_id,
                        bytes.clone(),
                    ));
                }
            }
        }
        let fresh_addresses = self.log.append(&fresh_records)?;

        let mut next_fresh = fresh_addresses.into_iter();
        let mut leaf_entries: Vec<(Vec<u8>, Vec<Address>)> =
            Vec::with_capacity(self.entries.len());
        for (key, slot) in &self.entries {
            let addresses = slot
                .iter()
                .map(|value| match value {
                    ValueRef::Stored(address) => *address,
                    ValueRef::Fresh(_) => next_fresh
                        .next()
                        .expect("fresh address for every fresh value"),
                })
                .collect();
            leaf_entries.push((key.clone(), addresses));
        }

        let mut leaf_records = Vec::new();
        let mut first_keys = Vec::new();
        for chunk in leaf_entries.chunks(self.page_size.max(1)) {
            leaf_records.push(Loggable::new(
                TYPE_LEAF,
                self.structure_id,
                encode_leaf(chunk),
            ));
            first_keys.push(chunk[0].0.clone());
        }
        let leaf_addresses = self.log.append(&leaf_records)?;

        let leaves: Vec<LeafRef> = first_keys
            .into_iter()
            .zip(leaf_addresses)
            .map(|(first_key, address)| LeafRef { first_key, address })
            .collect();
        let root_record = Loggable::new(
            root_type,
            self.structure_id,
            encode_root(leaf_entries.len() as u64, &leaves),
        );
        let root = self.log.append(&[root_record])?[0];
        tracing::trace!(
            root,
            keys = leaf_entries.len(),
            fresh_values = fresh_records.len(),
            "tree revision committed"
        );

        let mut expired = Vec::with_capacity(self.expired_values.len());
        for &address in &self.expired_values {
            let record = self.log.read(address)?;
            expired.push(ExpiredLoggable {
                address,
                length: record.encoded_len(),
                structure_id: self.structure_id,
            });
        }
        if let Some(base) = &self.base {
            expired.extend(base.page_loggables()?);
        }
        Ok(TreeCommit { root, expired })
    }

    fn expire_slot(&mut self, slot: &[ValueRef]) {
        for value in slot {
            if let ValueRef::Stored(address) = value {
                self.expired_values.push(*address);
            }
        }
    }
}

fn resolve_with(log: &Log, value: &ValueRef) -> Result<Vec<u8>> {
    match value {
        ValueRef::Fresh(bytes) => Ok(bytes.clone()),
        ValueRef::Stored(address) => Ok(log.read(*address)?.data.clone()),
    }
}
