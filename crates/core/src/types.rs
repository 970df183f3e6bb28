//! Identity types and store descriptors
//!
//! The meta-tree stores two kinds of keys side by side: store names
//! (UTF-8, always zero-terminated) and structure ids (big-endian, never
//! ending in a zero byte). [`StructureId`] enforces the byte-level
//! invariant that keeps the two key spaces disjoint.

use crate::error::{Error, Result};

/// Byte offset of a record in the append-only log
pub type Address = u64;

/// Opaque identifier of a tree's identity across snapshots
///
/// Invariant: the raw value is positive and its low 8 bits are never zero,
/// so the big-endian serialization never ends in `0x00`. Store-name keys in
/// the meta-tree are zero-terminated, which keeps the two key kinds
/// distinguishable by their final byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StructureId(u64);

impl StructureId {
    /// Structure id of the meta-tree itself
    pub const META: StructureId = StructureId(1);

    /// Wrap a raw id, checking the invariant
    pub fn try_new(raw: u64) -> Result<Self> {
        if raw == 0 || raw & 0xff == 0 {
            return Err(Error::corruption(format!(
                "invalid structure id {raw:#x}: low byte must be non-zero"
            )));
        }
        Ok(StructureId(raw))
    }

    /// The raw numeric id
    pub fn raw(&self) -> u64 {
        self.0
    }

    /// Big-endian key bytes for the meta-tree
    ///
    /// By the invariant, the final byte is never `0x00`.
    pub fn to_key_bytes(&self) -> [u8; 8] {
        self.0.to_be_bytes()
    }

    /// Parse meta-tree key bytes back into an id
    pub fn from_key_bytes(bytes: &[u8]) -> Result<Self> {
        let raw: [u8; 8] = bytes
            .try_into()
            .map_err(|_| Error::corruption("structure id key must be 8 bytes"))?;
        StructureId::try_new(u64::from_be_bytes(raw))
    }
}

impl std::fmt::Display for StructureId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Flags requested when opening a store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StoreConfig {
    /// Allow multiple values per key
    pub duplicates: bool,
    /// Request key-prefix compression
    pub prefixing: bool,
    /// Require the store to already exist
    pub use_existing: bool,
}

impl StoreConfig {
    /// Single value per key, no prefixing
    pub const WITHOUT_DUPLICATES: StoreConfig = StoreConfig {
        duplicates: false,
        prefixing: false,
        use_existing: false,
    };

    /// Multiple values per key
    pub const WITH_DUPLICATES: StoreConfig = StoreConfig {
        duplicates: true,
        prefixing: false,
        use_existing: false,
    };

    /// Single value per key, prefix-compressed keys
    pub const WITHOUT_DUPLICATES_WITH_PREFIXING: StoreConfig = StoreConfig {
        duplicates: false,
        prefixing: true,
        use_existing: false,
    };

    /// Multiple values per key, prefix-compressed keys
    pub const WITH_DUPLICATES_WITH_PREFIXING: StoreConfig = StoreConfig {
        duplicates: true,
        prefixing: true,
        use_existing: false,
    };

    /// Open only if the store already exists; its stored flags apply
    pub const USE_EXISTING: StoreConfig = StoreConfig {
        duplicates: false,
        prefixing: false,
        use_existing: true,
    };
}

/// Per-store descriptor stored in the meta-tree
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeMetaInfo {
    /// Identity of the store's tree across snapshots
    pub structure_id: StructureId,
    /// Store holds multiple values per key
    pub duplicates: bool,
    /// Store keys are prefix-compressed
    pub prefixing: bool,
}

const FLAG_DUPLICATES: u8 = 0x01;
const FLAG_PREFIXING: u8 = 0x02;

impl TreeMetaInfo {
    /// Build a descriptor from requested store flags
    pub fn from_config(structure_id: StructureId, config: StoreConfig) -> Self {
        TreeMetaInfo {
            structure_id,
            duplicates: config.duplicates,
            prefixing: config.prefixing,
        }
    }

    /// Serialize for storage as a meta-tree value
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(9);
        out.extend_from_slice(&self.structure_id.to_key_bytes());
        let mut flags = 0u8;
        if self.duplicates {
            flags |= FLAG_DUPLICATES;
        }
        if self.prefixing {
            flags |= FLAG_PREFIXING;
        }
        out.push(flags);
        out
    }

    /// Parse a meta-tree value back into a descriptor
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != 9 {
            return Err(Error::corruption(format!(
                "tree meta info must be 9 bytes, got {}",
                bytes.len()
            )));
        }
        let structure_id = StructureId::from_key_bytes(&bytes[..8])?;
        let flags = bytes[8];
        if flags & !(FLAG_DUPLICATES | FLAG_PREFIXING) != 0 {
            return Err(Error::corruption(format!(
                "unknown store flags {flags:#04x}"
            )));
        }
        Ok(TreeMetaInfo {
            structure_id,
            duplicates: flags & FLAG_DUPLICATES != 0,
            prefixing: flags & FLAG_PREFIXING != 0,
        })
    }
}
