//! Record model and on-disk frame
//!
//! A loggable is one physical record in the log. The frame is
//! self-describing and CRC-trailed so an interrupted append is detectable
//! at open:
//!
//! ```text
//! +------+--------------------+----------+---------+----------+
//! | type | structure id (BE)  | len (BE) | payload | crc (BE) |
//! | u8   | u64                | u32      | len×u8  | u32      |
//! +------+--------------------+----------+---------+----------+
//! ```
//!
//! The CRC covers everything before it.

use arbor_core::{Address, Error, Result, StructureId};
use byteorder::{BigEndian, ByteOrder};

/// Value bytes of a store entry
pub const TYPE_VALUE: u8 = 1;
/// Leaf page of a tree (key → value-address entries)
pub const TYPE_LEAF: u8 = 2;
/// Root page of a store tree
pub const TYPE_ROOT: u8 = 3;
/// Root page of the meta-tree; the recovery scan looks for the last one
pub const TYPE_META_ROOT: u8 = 4;

/// Frame bytes before the payload
pub const HEADER_LEN: usize = 1 + 8 + 4;
/// Frame bytes after the payload
pub const TRAILER_LEN: usize = 4;

/// One physical record in the log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Loggable {
    /// Record kind, one of the `TYPE_*` constants
    pub type_tag: u8,
    /// Tree this record belongs to
    pub structure_id: StructureId,
    /// Record payload
    pub data: Vec<u8>,
}

impl Loggable {
    /// Create a record
    pub fn new(type_tag: u8, structure_id: StructureId, data: Vec<u8>) -> Self {
        Loggable {
            type_tag,
            structure_id,
            data,
        }
    }

    /// Total frame length of this record on disk
    pub fn encoded_len(&self) -> u64 {
        (HEADER_LEN + self.data.len() + TRAILER_LEN) as u64
    }

    /// Append the frame to `buf`
    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        let start = buf.len();
        buf.push(self.type_tag);
        let mut id = [0u8; 8];
        BigEndian::write_u64(&mut id, self.structure_id.raw());
        buf.extend_from_slice(&id);
        let mut len = [0u8; 4];
        BigEndian::write_u32(&mut len, self.data.len() as u32);
        buf.extend_from_slice(&len);
        buf.extend_from_slice(&self.data);
        let crc = crc32fast::hash(&buf[start..]);
        let mut trailer = [0u8; 4];
        BigEndian::write_u32(&mut trailer, crc);
        buf.extend_from_slice(&trailer);
    }

    /// Encode the frame into a fresh buffer
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_LEN + self.data.len() + TRAILER_LEN);
        self.encode_into(&mut buf);
        buf
    }

    /// Decode one frame from the front of `bytes`
    ///
    /// Returns the record and its frame length. Fails on a short buffer or
    /// CRC mismatch; at open time either means a torn tail.
    pub fn decode(bytes: &[u8]) -> Result<(Loggable, u64)> {
        if bytes.len() < HEADER_LEN + TRAILER_LEN {
            return Err(truncated());
        }
        let type_tag = bytes[0];
        if !(TYPE_VALUE..=TYPE_META_ROOT).contains(&type_tag) {
            return Err(Error::corruption(format!(
                "unknown loggable type {type_tag:#04x}"
            )));
        }
        let structure_id = StructureId::from_key_bytes(&bytes[1..9])?;
        let data_len = BigEndian::read_u32(&bytes[9..13]) as usize;
        let frame_len = HEADER_LEN + data_len + TRAILER_LEN;
        if bytes.len() < frame_len {
            return Err(truncated());
        }
        let stored_crc = BigEndian::read_u32(&bytes[frame_len - TRAILER_LEN..frame_len]);
        let actual_crc = crc32fast::hash(&bytes[..frame_len - TRAILER_LEN]);
        if stored_crc != actual_crc {
            return Err(Error::corruption(format!(
                "loggable CRC mismatch: stored {stored_crc:#010x}, actual {actual_crc:#010x}"
            )));
        }
        let data = bytes[HEADER_LEN..HEADER_LEN + data_len].to_vec();
        Ok((
            Loggable {
                type_tag,
                structure_id,
                data,
            },
            frame_len as u64,
        ))
    }

    /// Address of the record that would follow this one at `address`
    pub fn next_address(&self, address: Address) -> Address {
        address + self.encoded_len()
    }
}

fn truncated() -> Error {
    Error::corruption("truncated loggable frame".to_owned())
}
