//! Environment configuration via `arbor.toml`
//!
//! A config file in the environment directory, loaded if present; every
//! key has a default so a missing or empty file is fine. Settings can also
//! be overridden programmatically before `open_with_config`.

use arbor_core::{Error, InternStrategy, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Config file name placed in the environment directory.
pub const CONFIG_FILE_NAME: &str = "arbor.toml";

/// Leaf pages hold a `u16` entry count on disk.
const MAX_TREE_PAGE_SIZE: usize = u16::MAX as usize;

/// Configuration consumed by the environment core.
///
/// # Example
///
/// ```toml
/// # Flag transactions older than 5 seconds (0 disables the monitor)
/// txn_timeout_ms = 5000
///
/// # Allow close() while transactions are still live
/// close_forcedly = false
///
/// # Max entries per tree leaf page
/// tree_max_page_size = 128
///
/// # String interning on decode: "disabled" or "shared"
/// interner = "disabled"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    /// Transactions older than this are reported by the monitor;
    /// 0 disables it.
    #[serde(default)]
    pub txn_timeout_ms: u64,
    /// Allow `close` to proceed while transactions are live.
    #[serde(default)]
    pub close_forcedly: bool,
    /// Maximum entries per tree leaf page.
    #[serde(default = "default_tree_max_page_size")]
    pub tree_max_page_size: usize,
    /// String interning strategy: `"disabled"` or `"shared"`.
    #[serde(default = "default_interner")]
    pub interner: String,
}

fn default_tree_max_page_size() -> usize {
    128
}

fn default_interner() -> String {
    "disabled".to_owned()
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        EnvironmentConfig {
            txn_timeout_ms: 0,
            close_forcedly: false,
            tree_max_page_size: default_tree_max_page_size(),
            interner: default_interner(),
        }
    }
}

impl EnvironmentConfig {
    /// Load the config from `dir`, or defaults when no file exists.
    pub fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(CONFIG_FILE_NAME);
        if path.exists() {
            Self::from_file(&path)
        } else {
            Ok(EnvironmentConfig::default())
        }
    }

    /// Read and parse a config file, validating eagerly.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: EnvironmentConfig = toml::from_str(&content).map_err(|e| {
            Error::Config(format!(
                "failed to parse config file '{}': {e}",
                path.display()
            ))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges and enum strings.
    pub fn validate(&self) -> Result<()> {
        if self.tree_max_page_size < 2 || self.tree_max_page_size > MAX_TREE_PAGE_SIZE {
            return Err(Error::Config(format!(
                "tree_max_page_size must be in 2..={MAX_TREE_PAGE_SIZE}, got {}",
                self.tree_max_page_size
            )));
        }
        self.intern_strategy()?;
        Ok(())
    }

    /// Parse the interner string into a strategy.
    pub fn intern_strategy(&self) -> Result<InternStrategy> {
        match self.interner.as_str() {
            "disabled" => Ok(InternStrategy::Disabled),
            "shared" => Ok(InternStrategy::Shared),
            other => Err(Error::Config(format!(
                "invalid interner '{other}': expected \"disabled\" or \"shared\""
            ))),
        }
    }

    /// Set the stuck-transaction timeout in milliseconds.
    pub fn with_txn_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.txn_timeout_ms = timeout_ms;
        self
    }

    /// Allow or forbid close with live transactions.
    pub fn with_close_forcedly(mut self, forcedly: bool) -> Self {
        self.close_forcedly = forcedly;
        self
    }

    /// Set the maximum entries per tree leaf page.
    pub fn with_tree_max_page_size(mut self, page_size: usize) -> Self {
        self.tree_max_page_size = page_size;
        self
    }

    /// Set the string interning strategy.
    pub fn with_interner(mut self, strategy: InternStrategy) -> Self {
        self.interner = match strategy {
            InternStrategy::Disabled => "disabled".to_owned(),
            InternStrategy::Shared => "shared".to_owned(),
        };
        self
    }
}
