//! Transaction bookkeeping and background execution
//!
//! - [`TransactionSet`]: the registry of live transactions with ordered
//!   snapshot-root queries
//! - [`DeferredTaskQueue`]: FIFO tasks gated on the oldest live snapshot
//! - [`IoWorker`]: the shared single-threaded executor deferred tasks and
//!   expired-record hand-offs run on

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod deferred;
pub mod transaction_set;
pub mod worker;

pub use deferred::DeferredTaskQueue;
pub use transaction_set::{SnapshotRoot, TransactionSet, TxnEntry};
pub use worker::IoWorker;
