//! The meta-tree: store names and tree roots
//!
//! One tree, two key kinds living side by side:
//!
//! - store name (UTF-8, zero-terminated) → [`TreeMetaInfo`]
//! - structure id (big-endian, never ending in `0x00`) → root address of
//!   that store's tree
//!
//! The final byte keeps the kinds disjoint. A meta-tree instance is an
//! immutable snapshot; each successful write commit publishes a new one.
//! Recovery scans the log for the last durable meta-root record.

use arbor_core::bindings::{decode_string, encode_string};
use arbor_core::{Address, Result, StructureId, TreeMetaInfo};
use arbor_durability::{Log, TYPE_META_ROOT};
use arbor_storage::{ImmutableTree, MutableTree};
use tracing::debug;

/// Immutable snapshot of the store table
pub struct MetaTree {
    root: Option<Address>,
    tree: ImmutableTree,
}

impl MetaTree {
    /// The meta-tree of an empty log
    pub fn empty(log: Log) -> Result<MetaTree> {
        let tree = ImmutableTree::open(log, StructureId::META, None)?;
        Ok(MetaTree { root: None, tree })
    }

    /// Load the snapshot rooted at `address`
    pub fn load(log: &Log, address: Address) -> Result<MetaTree> {
        let tree = ImmutableTree::open(log.clone(), StructureId::META, Some(address))?;
        Ok(MetaTree {
            root: Some(address),
            tree,
        })
    }

    /// Load the snapshot at `address`, or absent when the address lies at
    /// or beyond the log's high-water mark
    pub fn load_if_valid(log: &Log, address: Address) -> Result<Option<MetaTree>> {
        if address >= log.high_address() {
            return Ok(None);
        }
        MetaTree::load(log, address).map(Some)
    }

    /// Find the last durable meta-root record and load it; an empty log
    /// yields an empty meta-tree
    pub fn recover(log: &Log) -> Result<MetaTree> {
        let mut last = None;
        for item in log.iter_from(0) {
            let (address, record) = item?;
            if record.type_tag == TYPE_META_ROOT {
                last = Some(address);
            }
        }
        match last {
            Some(address) => {
                debug!(address, "recovered meta-tree root");
                MetaTree::load(log, address)
            }
            None => MetaTree::empty(log.clone()),
        }
    }

    /// Root address of this snapshot; `None` before any commit
    pub fn root(&self) -> Option<Address> {
        self.root
    }

    /// Log backing this snapshot
    pub fn log(&self) -> &Log {
        self.tree.log()
    }

    /// Descriptor stored under `name`, if any
    pub fn meta_info(&self, name: &str) -> Result<Option<TreeMetaInfo>> {
        match self.tree.get(&encode_string(name))? {
            Some(value) => Ok(Some(TreeMetaInfo::decode(&value)?)),
            None => Ok(None),
        }
    }

    /// Root address of the store tree identified by `id`, if it has
    /// committed any revision yet
    pub fn tree_root(&self, id: StructureId) -> Result<Option<Address>> {
        match self.tree.get(&id.to_key_bytes())? {
            Some(value) => {
                let raw: [u8; 8] = value.as_slice().try_into().map_err(|_| {
                    arbor_core::Error::corruption("tree root entry must be 8 bytes")
                })?;
                Ok(Some(u64::from_be_bytes(raw)))
            }
            None => Ok(None),
        }
    }

    /// Every store name in this snapshot, in key order
    pub fn store_names(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for item in self.tree.iter() {
            let (key, _) = item?;
            if key.last() == Some(&0) {
                names.push(decode_string(&key)?);
            }
        }
        Ok(names)
    }

    /// Largest structure id referenced by this snapshot
    ///
    /// Seeds the environment's allocator on open. Includes stores that
    /// were created but have no committed tree yet (name entry only).
    pub fn max_structure_id(&self) -> Result<u64> {
        let mut max = StructureId::META.raw();
        for item in self.tree.iter() {
            let (key, value) = item?;
            let raw = if key.last() == Some(&0) {
                TreeMetaInfo::decode(&value)?.structure_id.raw()
            } else {
                StructureId::from_key_bytes(&key)?.raw()
            };
            max = max.max(raw);
        }
        Ok(max)
    }

    /// Begin a mutable copy of this snapshot for a commit
    pub fn to_mutable(&self, page_size: usize) -> Result<MutableTree> {
        MutableTree::from_snapshot(self.tree.clone(), false, page_size)
    }

    /// A private instance pinned to the same root, not shared with other
    /// transactions
    pub fn clone_private(&self) -> Result<MetaTree> {
        match self.root {
            Some(address) => MetaTree::load(self.log(), address),
            None => MetaTree::empty(self.log().clone()),
        }
    }
}
