//! Garbage collector hooks
//!
//! The collector receives expired-record notifications from every commit
//! (in commit order, via the shared IO worker) and keeps per-store
//! utilization: how many reclaimable bytes each tree has accumulated. The
//! actual scan/relocation machinery sits behind `wake()`; this layer is
//! the accounting and lifecycle the environment core depends on.
//!
//! The collector holds no reference back to its environment. Operations
//! that need one (`save_utilization_profile`, `load_utilization_profile`)
//! take it as an explicit parameter.

use crate::environment::Environment;
use arbor_core::{Result, StoreConfig, StructureId};
use arbor_storage::ExpiredLoggable;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::{debug, trace};

/// Name of the reserved store holding the persisted utilization profile
pub const UTILIZATION_PROFILE_STORE: &str = "__utilization_profile__";

/// Space-reclamation accounting and lifecycle
pub struct GarbageCollector {
    /// structure id → reclaimable bytes
    utilization: DashMap<u64, u64>,
    expired_total: AtomicU64,
    suspended: AtomicBool,
    finished: AtomicBool,
}

impl GarbageCollector {
    /// Create an idle collector
    pub fn new() -> Self {
        GarbageCollector {
            utilization: DashMap::new(),
            expired_total: AtomicU64::new(0),
            suspended: AtomicBool::new(false),
            finished: AtomicBool::new(false),
        }
    }

    /// Account a batch of expired records
    ///
    /// Called asynchronously after each commit, in commit order. After
    /// `finish` the batch is dropped.
    pub fn fetch_expired_loggables(&self, expired: impl IntoIterator<Item = ExpiredLoggable>) {
        if self.finished.load(Ordering::Acquire) {
            return;
        }
        let mut batch_bytes = 0u64;
        for record in expired {
            *self
                .utilization
                .entry(record.structure_id.raw())
                .or_insert(0) += record.length;
            batch_bytes += record.length;
        }
        if batch_bytes > 0 {
            self.expired_total.fetch_add(batch_bytes, Ordering::AcqRel);
            trace!(batch_bytes, "accounted expired loggables");
        }
    }

    /// Pause reclamation cycles; accounting continues
    pub fn suspend(&self) {
        self.suspended.store(true, Ordering::Release);
    }

    /// Resume reclamation cycles
    pub fn resume(&self) {
        self.suspended.store(false, Ordering::Release);
    }

    /// Check if the collector is suspended
    pub fn is_suspended(&self) -> bool {
        self.suspended.load(Ordering::Acquire)
    }

    /// Nudge the collector to consider a reclamation cycle
    pub fn wake(&self) {
        if self.finished.load(Ordering::Acquire) || self.is_suspended() {
            return;
        }
        trace!(
            reclaimable = self.expired_total.load(Ordering::Acquire),
            "gc wake requested"
        );
    }

    /// Stop the collector for good; idempotent
    pub fn finish(&self) {
        self.finished.store(true, Ordering::Release);
    }

    /// Check whether `name` is the reserved utilization-profile store
    pub fn is_utilization_profile(name: &str) -> bool {
        name == UTILIZATION_PROFILE_STORE
    }

    /// Reclaimable bytes accumulated for one store tree
    pub fn freed_bytes(&self, id: StructureId) -> u64 {
        self.utilization
            .get(&id.raw())
            .map(|bytes| *bytes)
            .unwrap_or(0)
    }

    /// Reclaimable bytes across all store trees
    pub fn reclaimable_bytes(&self) -> u64 {
        self.utilization.iter().map(|entry| *entry.value()).sum()
    }

    /// Drop all accounting; used by `clear`
    pub fn reset(&self) {
        self.utilization.clear();
        self.expired_total.store(0, Ordering::Release);
    }

    /// Persist per-store utilization into the reserved store
    ///
    /// A no-op when nothing has been accounted yet.
    pub fn save_utilization_profile(&self, env: &Environment) -> Result<()> {
        let entries: Vec<(u64, u64)> = self
            .utilization
            .iter()
            .map(|entry| (*entry.key(), *entry.value()))
            .collect();
        if entries.is_empty() {
            return Ok(());
        }
        env.execute_in_transaction(|txn| {
            let store = env.open_store(
                UTILIZATION_PROFILE_STORE,
                StoreConfig::WITHOUT_DUPLICATES,
                txn,
            )?;
            for (id, bytes) in &entries {
                store.put(txn, &id.to_be_bytes(), &bytes.to_be_bytes())?;
            }
            Ok(())
        })?;
        debug!(stores = entries.len(), "utilization profile saved");
        Ok(())
    }

    /// Restore utilization persisted by a previous process
    pub fn load_utilization_profile(&self, env: &Environment) -> Result<()> {
        let loaded = env.compute_in_readonly_transaction(|txn| {
            let Some(store) =
                env.try_open_store(UTILIZATION_PROFILE_STORE, StoreConfig::USE_EXISTING, txn)?
            else {
                return Ok(Vec::new());
            };
            store.entries(txn)
        })?;
        for (key, value) in loaded {
            let (Ok(id), Ok(bytes)) = (
                <[u8; 8]>::try_from(key.as_slice()),
                <[u8; 8]>::try_from(value.as_slice()),
            ) else {
                continue;
            };
            let id = u64::from_be_bytes(id);
            let bytes = u64::from_be_bytes(bytes);
            self.utilization.insert(id, bytes);
            self.expired_total.fetch_add(bytes, Ordering::AcqRel);
        }
        Ok(())
    }
}

impl Default for GarbageCollector {
    fn default() -> Self {
        GarbageCollector::new()
    }
}
