//! Environment core for the Arbor storage engine
//!
//! This crate orchestrates the lower layers:
//! - Environment: open/close lifecycle, the store table, transaction
//!   factories, executor combinators, clear
//! - Transaction: snapshot isolation, the staged commit protocol, the
//!   inoperative latch
//! - MetaTree: the published store table snapshot
//! - GarbageCollector: expired-record accounting and the persisted
//!   utilization profile
//! - StuckTransactionMonitor: reporting of overdue transactions
//!
//! The engine is the only component that knows about cross-layer
//! coordination (log + trees + GC + deferred work).

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod environment;
pub mod gc;
pub mod meta_tree;
pub mod monitor;
pub mod store;
pub mod transaction;

pub use config::{EnvironmentConfig, CONFIG_FILE_NAME};
pub use environment::{Environment, EnvironmentStats};
pub use gc::{GarbageCollector, UTILIZATION_PROFILE_STORE};
pub use meta_tree::MetaTree;
pub use monitor::StuckTransactionMonitor;
pub use store::Store;
pub use transaction::Transaction;

pub use arbor_core::{
    bindings, Address, Error, InternStrategy, Result, StoreConfig, StringBinding, StringInterner,
    StructureId, TreeMetaInfo,
};
pub use arbor_durability::Log;
