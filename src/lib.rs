//! # ArborDB
//!
//! An embedded, transactional, append-only key–value storage engine.
//!
//! Data lives in named stores inside an [`Environment`]. Every operation
//! goes through a [`Transaction`], which pins a consistent snapshot at
//! begin; writers serialize through a single commit point while readers
//! stay unblocked. Superseded records are reclaimed cooperatively by a
//! background garbage collector.
//!
//! # Quick Start
//!
//! ```no_run
//! use arbordb::{Environment, StoreConfig};
//!
//! fn main() -> arbordb::Result<()> {
//!     let env = Environment::open("./my-data")?;
//!
//!     env.execute_in_transaction(|txn| {
//!         let store = env.open_store("users", StoreConfig::WITHOUT_DUPLICATES, txn)?;
//!         store.put(txn, b"alice", b"admin")?;
//!         Ok(())
//!     })?;
//!
//!     let role = env.compute_in_readonly_transaction(|txn| {
//!         let store = env.try_open_store("users", StoreConfig::USE_EXISTING, txn)?;
//!         match store {
//!             Some(store) => store.get(txn, b"alice"),
//!             None => Ok(None),
//!         }
//!     })?;
//!     assert_eq!(role.as_deref(), Some(&b"admin"[..]));
//!
//!     env.close()?;
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! The [`Environment`] is the entry point. Internal crates (durability,
//! storage, concurrency) are not exposed; only the surface re-exported
//! here is stable.

pub use arbor_engine::{
    bindings, Address, Environment, EnvironmentConfig, EnvironmentStats, Error, InternStrategy,
    Log, Result, Store, StoreConfig, StringBinding, StringInterner, StructureId, Transaction,
    TreeMetaInfo, CONFIG_FILE_NAME,
};
