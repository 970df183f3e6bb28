//! Append-only log for the Arbor storage engine
//!
//! The log is the single durable artifact of an environment: a sequence of
//! CRC-checked records ("loggables") addressed by byte offset. Everything
//! above it (trees, the meta-tree, store data) is expressed as loggables.
//!
//! The high-water mark is the only mutable datum: it grows on `append` and
//! is moved back by `set_high_address` exclusively for post-failure
//! rollback. Bytes below the mark are never rewritten in place.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod cache;
pub mod log;
pub mod loggable;

pub use crate::log::{Log, LogIterator, LOG_FILE_NAME};
pub use crate::loggable::{
    Loggable, TYPE_LEAF, TYPE_META_ROOT, TYPE_ROOT, TYPE_VALUE,
};
