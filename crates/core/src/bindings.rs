//! String binding layer
//!
//! Strings are stored as UTF-8 with a terminating zero byte. The
//! terminator is load-bearing: meta-tree name keys always end in `0x00`,
//! which keeps them disjoint from structure-id keys (whose big-endian
//! encoding never does).
//!
//! Decoding can optionally intern strings for deduplication. The strategy
//! is an explicit construction-time parameter of [`StringBinding`]; there
//! is no process-global switch.

use crate::error::{Error, Result};
use dashmap::DashMap;
use std::sync::Arc;

/// How decoded strings are deduplicated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InternStrategy {
    /// Every decode allocates a fresh string
    #[default]
    Disabled,
    /// Decodes of equal strings share one allocation via the binding's
    /// interner
    Shared,
}

/// Deduplication pool for decoded strings
#[derive(Debug, Default)]
pub struct StringInterner {
    pool: DashMap<String, Arc<str>>,
}

impl StringInterner {
    /// Create an empty interner
    pub fn new() -> Self {
        StringInterner::default()
    }

    /// Return the shared allocation for `s`, inserting it on first use
    pub fn intern(&self, s: &str) -> Arc<str> {
        if let Some(existing) = self.pool.get(s) {
            return Arc::clone(existing.value());
        }
        self.pool
            .entry(s.to_owned())
            .or_insert_with(|| Arc::from(s))
            .value()
            .clone()
    }

    /// Number of distinct strings interned so far
    pub fn len(&self) -> usize {
        self.pool.len()
    }

    /// Check if the interner is empty
    pub fn is_empty(&self) -> bool {
        self.pool.is_empty()
    }
}

/// String ↔ byte codec handed out by the environment
#[derive(Debug, Clone, Default)]
pub struct StringBinding {
    interner: Option<Arc<StringInterner>>,
}

impl StringBinding {
    /// Create a binding with the given interning strategy
    pub fn new(strategy: InternStrategy) -> Self {
        let interner = match strategy {
            InternStrategy::Disabled => None,
            InternStrategy::Shared => Some(Arc::new(StringInterner::new())),
        };
        StringBinding { interner }
    }

    /// Whether this binding deduplicates decoded strings
    pub fn interns(&self) -> bool {
        self.interner.is_some()
    }

    /// Encode a string as zero-terminated UTF-8
    pub fn encode(&self, s: &str) -> Vec<u8> {
        encode_string(s)
    }

    /// Decode a zero-terminated UTF-8 entry
    pub fn decode(&self, bytes: &[u8]) -> Result<Arc<str>> {
        let s = decode_str(bytes)?;
        match &self.interner {
            Some(interner) => Ok(interner.intern(s)),
            None => Ok(Arc::from(s)),
        }
    }
}

/// Encode a string as UTF-8 with a terminating zero byte
pub fn encode_string(s: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(s.len() + 1);
    out.extend_from_slice(s.as_bytes());
    out.push(0);
    out
}

fn decode_str(bytes: &[u8]) -> Result<&str> {
    match bytes.split_last() {
        Some((0, body)) => std::str::from_utf8(body)
            .map_err(|e| Error::corruption(format!("invalid UTF-8 in string entry: {e}"))),
        Some(_) => Err(Error::corruption(
            "string entry is not zero-terminated".to_owned(),
        )),
        None => Err(Error::corruption("empty string entry".to_owned())),
    }
}

/// Decode a zero-terminated UTF-8 entry into an owned string
pub fn decode_string(bytes: &[u8]) -> Result<String> {
    decode_str(bytes).map(str::to_owned)
}
