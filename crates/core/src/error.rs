//! Error types for the Arbor storage engine
//!
//! One unified error type is used across all crates. We use `thiserror`
//! for automatic `Display` and `Error` trait implementations.
//!
//! A stale transaction snapshot is deliberately NOT an error: `flush()`
//! reports it by returning `false` so retry combinators can loop without
//! unwinding.

use std::io;
use thiserror::Error;

/// Result type alias for Arbor operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for the Arbor storage engine
#[derive(Debug, Error)]
pub enum Error {
    /// Opening with `use_existing` or removing a store that does not exist
    #[error("store '{name}' does not exist")]
    NoSuchStore {
        /// Name of the missing store
        name: String,
    },

    /// Opening an existing store with incompatible flags
    #[error("store '{name}' configuration mismatch: {reason}")]
    ConfigMismatch {
        /// Name of the store
        name: String,
        /// What is incompatible
        reason: String,
    },

    /// Creating a new store requires a write transaction
    #[error("store creation requires a write transaction")]
    NoTransaction,

    /// A commit failed and its log rollback failed too; the environment
    /// refuses all further work
    #[error("environment is inoperative: {cause}")]
    Inoperative {
        /// Why the environment became inoperative
        cause: String,
    },

    /// Any operation after `close`
    #[error("environment is closed")]
    Closed,

    /// `close` or `clear` called while transactions are live (and forced
    /// close is disabled)
    #[error("environment has {count} active transaction(s)")]
    ActiveTransactions {
        /// Number of live transactions
        count: usize,
    },

    /// A commit's log append failed; the log was rolled back to its
    /// pre-commit high address
    #[error("transaction failed: {reason}")]
    TransactionFailed {
        /// What went wrong during commit
        reason: String,
    },

    /// Write attempted through a read-only transaction
    #[error("read-only transaction cannot be modified")]
    ReadOnly,

    /// Operation attempted on a transaction in a terminal state
    #[error("invalid transaction state: {0}")]
    InvalidState(String),

    /// Invalid configuration value
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Data integrity check failed
    #[error("data corruption: {0}")]
    Corruption(String),

    /// I/O error (file operations)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Create a `NoSuchStore` error
    pub fn no_such_store(name: impl Into<String>) -> Self {
        Error::NoSuchStore { name: name.into() }
    }

    /// Create a `ConfigMismatch` error
    pub fn config_mismatch(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::ConfigMismatch {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Create an `Inoperative` error
    pub fn inoperative(cause: impl Into<String>) -> Self {
        Error::Inoperative {
            cause: cause.into(),
        }
    }

    /// Create a `TransactionFailed` error
    pub fn transaction_failed(reason: impl Into<String>) -> Self {
        Error::TransactionFailed {
            reason: reason.into(),
        }
    }

    /// Create a `Corruption` error
    pub fn corruption(message: impl Into<String>) -> Self {
        Error::Corruption(message.into())
    }

    /// Check if this error means the environment was closed
    pub fn is_closed(&self) -> bool {
        matches!(self, Error::Closed)
    }

    /// Check if this error means the environment is permanently inoperative
    pub fn is_inoperative(&self) -> bool {
        matches!(self, Error::Inoperative { .. })
    }

    /// Check if this error came from a failed (but rolled back) commit
    ///
    /// Such a transaction may be retried after `revert`.
    pub fn is_transaction_failure(&self) -> bool {
        matches!(self, Error::TransactionFailed { .. })
    }

    /// Check if this error indicates on-disk corruption
    pub fn is_corruption(&self) -> bool {
        matches!(self, Error::Corruption(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_no_such_store() {
        let err = Error::no_such_store("users");
        let msg = err.to_string();
        assert!(msg.contains("users"));
        assert!(msg.contains("does not exist"));
    }

    #[test]
    fn test_display_config_mismatch() {
        let err = Error::config_mismatch("users", "duplicates flag differs");
        let msg = err.to_string();
        assert!(msg.contains("users"));
        assert!(msg.contains("duplicates flag differs"));
    }

    #[test]
    fn test_display_inoperative() {
        let err = Error::inoperative("rollback failed: disk full");
        assert!(err.to_string().contains("rollback failed"));
        assert!(err.is_inoperative());
    }

    #[test]
    fn test_display_active_transactions() {
        let err = Error::ActiveTransactions { count: 3 };
        assert!(err.to_string().contains('3'));
    }

    #[test]
    fn test_from_io() {
        let io_err = io::Error::new(io::ErrorKind::PermissionDenied, "access denied");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_classification() {
        assert!(Error::Closed.is_closed());
        assert!(!Error::Closed.is_inoperative());
        assert!(Error::inoperative("x").is_inoperative());
        assert!(Error::transaction_failed("append failed").is_transaction_failure());
        assert!(Error::corruption("bad crc").is_corruption());
        assert!(!Error::NoTransaction.is_transaction_failure());
    }

    #[test]
    fn test_result_alias() {
        fn ok() -> Result<u32> {
            Ok(7)
        }
        fn bad() -> Result<u32> {
            Err(Error::ReadOnly)
        }
        assert_eq!(ok().unwrap(), 7);
        assert!(bad().is_err());
    }
}
