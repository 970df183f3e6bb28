//! Persistent ordered trees over the append-only log
//!
//! A tree snapshot is immutable and identified by the address of its root
//! page. Committing a mutable copy appends fresh values, rewritten leaf
//! pages and a new root, and reports the records the commit superseded so
//! the garbage collector can account for them.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod expired;
pub mod mutable;
pub mod tree;

pub use expired::{ExpiredLoggable, ExpiredLoggables};
pub use mutable::{MutableTree, TreeCommit};
pub use tree::{ImmutableTree, TreeIter};
