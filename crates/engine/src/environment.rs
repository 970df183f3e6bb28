//! The environment: orchestrator of log, trees, transactions and GC
//!
//! An [`Environment`] owns one append-only log, the currently published
//! meta-tree, the set of live transactions, the deferred-task queue with
//! its IO worker, and the garbage collector. Writers serialize through a
//! process-wide commit lock; readers only ever take the meta-lock long
//! enough to copy the current meta-tree reference.
//!
//! Lock order, where both are needed: commit lock before meta-lock.
//!
//! The environment is constructed fully and then activated (profile load,
//! monitor spawn); nothing escapes during construction.

use crate::config::EnvironmentConfig;
use crate::gc::GarbageCollector;
use crate::meta_tree::MetaTree;
use crate::monitor::StuckTransactionMonitor;
use crate::store::Store;
use crate::transaction::{BeginHook, Transaction};
use arbor_concurrency::{DeferredTaskQueue, IoWorker, SnapshotRoot, TransactionSet, TxnEntry};
use arbor_core::{
    Address, Error, Result, StoreConfig, StringBinding, StructureId, TreeMetaInfo,
};
use arbor_durability::Log;
use arbor_storage::{ExpiredLoggable, ExpiredLoggables};
use parking_lot::Mutex;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

/// Bounded wait for in-flight IO when closing
const CLOSE_IO_WAIT: Duration = Duration::from_secs(10);

/// Point-in-time counters for an environment
#[derive(Debug, Clone, Copy)]
pub struct EnvironmentStats {
    /// Live transactions right now
    pub active_transactions: usize,
    /// One past the last durable log byte
    pub log_high_address: Address,
    /// Fraction of log reads served from cache
    pub log_cache_hit_rate: f32,
    /// Bytes the GC could reclaim across all stores
    pub reclaimable_bytes: u64,
}

pub(crate) enum InoperativeCause {
    Closed,
    Failure(String),
}

pub(crate) struct EnvironmentInner {
    pub(crate) log: Log,
    pub(crate) config: EnvironmentConfig,
    pub(crate) binding: StringBinding,
    /// Serializes writing commits, `clear` and `close`
    pub(crate) commit_lock: Mutex<()>,
    /// Protects the published meta-tree reference and hook sequencing
    pub(crate) meta: Mutex<Arc<MetaTree>>,
    pub(crate) txns: TransactionSet,
    pub(crate) deferred: Mutex<DeferredTaskQueue>,
    pub(crate) worker: IoWorker,
    pub(crate) gc: Arc<GarbageCollector>,
    pub(crate) structure_id: AtomicU64,
    pub(crate) next_txn_id: AtomicU64,
    pub(crate) inoperative: Mutex<Option<InoperativeCause>>,
    pub(crate) monitor: Mutex<Option<StuckTransactionMonitor>>,
}

impl EnvironmentInner {
    pub(crate) fn check_operative(&self) -> Result<()> {
        match &*self.inoperative.lock() {
            None => Ok(()),
            Some(InoperativeCause::Closed) => Err(Error::Closed),
            Some(InoperativeCause::Failure(cause)) => Err(Error::inoperative(cause.clone())),
        }
    }

    /// Copy of the currently published meta-tree; holds the meta-lock
    /// only for the copy
    pub(crate) fn current_meta(&self) -> Arc<MetaTree> {
        Arc::clone(&self.meta.lock())
    }

    /// Capture the current snapshot and register the transaction for it
    /// in one meta-lock critical section
    ///
    /// The begin hook runs under the lock; registering before release
    /// keeps deferred-task sweeps from running ahead of a transaction
    /// that just pinned the root they are gated on.
    pub(crate) fn acquire_snapshot_and_register(
        &self,
        id: u64,
        readonly: bool,
        created: Instant,
        thread_name: Option<String>,
        hook: Option<&mut BeginHook>,
    ) -> (Arc<MetaTree>, SnapshotRoot) {
        let meta = self.meta.lock();
        if let Some(hook) = hook {
            hook();
        }
        let snapshot = Arc::clone(&meta);
        let root = snapshot.root();
        self.txns.insert(
            id,
            TxnEntry {
                root,
                created,
                thread_name,
                readonly,
            },
        );
        (snapshot, root)
    }

    /// Roll the log back to the pre-commit high address after an append
    /// failure; latch the environment inoperative when the rollback
    /// itself fails
    pub(crate) fn roll_back_failed_commit(&self, high: Address, cause: &Error) -> Error {
        match self.log.set_high_address(high) {
            Ok(()) => {
                warn!(high, cause = %cause, "commit failed, log rolled back");
                Error::transaction_failed(cause.to_string())
            }
            Err(rollback) => {
                let message = format!(
                    "commit failed ({cause}); log rollback to {high} failed ({rollback})"
                );
                error!("{message}");
                self.latch_inoperative(&message);
                Error::transaction_failed(message)
            }
        }
    }

    pub(crate) fn latch_inoperative(&self, cause: &str) {
        let mut slot = self.inoperative.lock();
        if slot.is_none() {
            *slot = Some(InoperativeCause::Failure(cause.to_owned()));
        }
    }

    /// Hand a commit's expired batches to the GC through the IO worker
    pub(crate) fn dispatch_expired(&self, batches: Vec<Vec<ExpiredLoggable>>) {
        if batches.iter().all(Vec::is_empty) {
            return;
        }
        let gc = Arc::clone(&self.gc);
        self.worker.submit(move || {
            gc.fetch_expired_loggables(ExpiredLoggables::from_batches(batches));
        });
    }

    /// Move every ready deferred task onto the IO worker
    ///
    /// Submission happens under the queue lock so concurrent sweeps
    /// cannot reorder tasks.
    pub(crate) fn sweep_deferred(&self) {
        let mut queue = self.deferred.lock();
        let oldest = self.txns.oldest_root();
        for task in queue.drain_ready(oldest) {
            self.worker.submit(task);
        }
    }
}

/// Embedded, transactional, append-only key–value environment
#[derive(Clone)]
pub struct Environment {
    inner: Arc<EnvironmentInner>,
}

impl Environment {
    /// Open the environment in `dir`, loading `arbor.toml` if present
    pub fn open(dir: impl AsRef<Path>) -> Result<Environment> {
        let config = EnvironmentConfig::load(dir.as_ref())?;
        Environment::open_with_config(dir, config)
    }

    /// Open the environment in `dir` with an explicit configuration
    pub fn open_with_config(
        dir: impl AsRef<Path>,
        config: EnvironmentConfig,
    ) -> Result<Environment> {
        config.validate()?;
        let binding = StringBinding::new(config.intern_strategy()?);
        let log = Log::open(dir.as_ref())?;
        let meta = MetaTree::recover(&log)?;
        let max_id = meta.max_structure_id()?;
        let inner = Arc::new(EnvironmentInner {
            log,
            config,
            binding,
            commit_lock: Mutex::new(()),
            meta: Mutex::new(Arc::new(meta)),
            txns: TransactionSet::new(),
            deferred: Mutex::new(DeferredTaskQueue::new()),
            worker: IoWorker::new("arbor-io"),
            gc: Arc::new(GarbageCollector::new()),
            structure_id: AtomicU64::new(max_id),
            next_txn_id: AtomicU64::new(0),
            inoperative: Mutex::new(None),
            monitor: Mutex::new(None),
        });
        let env = Environment { inner };
        env.activate()?;
        Ok(env)
    }

    /// Post-construction activation: load the persisted GC profile and
    /// spawn the stuck-transaction monitor
    fn activate(&self) -> Result<()> {
        let inner = self.inner();
        inner.gc.load_utilization_profile(self)?;
        if inner.config.txn_timeout_ms > 0 {
            let monitor = StuckTransactionMonitor::spawn(
                inner.txns.clone(),
                Duration::from_millis(inner.config.txn_timeout_ms),
            );
            *inner.monitor.lock() = Some(monitor);
        }
        debug!(location = %inner.log.dir().display(), "environment activated");
        Ok(())
    }

    pub(crate) fn inner(&self) -> &EnvironmentInner {
        &self.inner
    }

    /// Directory this environment lives in
    pub fn location(&self) -> &Path {
        self.inner.log.dir()
    }

    /// The configuration this environment was opened with
    pub fn config(&self) -> &EnvironmentConfig {
        &self.inner.config
    }

    /// String codec configured for this environment
    pub fn string_binding(&self) -> &StringBinding {
        &self.inner.binding
    }

    /// The append-only log backing this environment
    pub fn log(&self) -> &Log {
        &self.inner.log
    }

    /// Fail with the sticky cause if a previous commit left the
    /// environment unusable, or with `Closed` after `close`
    pub(crate) fn check_operative(&self) -> Result<()> {
        self.inner.check_operative()
    }

    /// Whether the environment can still serve transactions
    pub fn is_operative(&self) -> bool {
        self.check_operative().is_ok()
    }

    // ------------------------------------------------------------------
    // Store table
    // ------------------------------------------------------------------

    /// Open `name`, creating it when missing
    ///
    /// Creation requires a write transaction and is registered on `txn`;
    /// it becomes durable with the transaction's flush.
    pub fn open_store(
        &self,
        name: &str,
        config: StoreConfig,
        txn: &mut Transaction,
    ) -> Result<Store> {
        self.check_operative()?;
        match txn.meta_info_for(name)? {
            Some(info) => Ok(Store::new(name, check_existing(name, config, info)?)),
            None => {
                if config.use_existing {
                    return Err(Error::no_such_store(name));
                }
                let id = self.allocate_structure_id();
                let info = TreeMetaInfo::from_config(id, config);
                txn.register_store_creation(name, info)?;
                debug!(store = name, structure_id = %id, "store created");
                Ok(Store::new(name, info))
            }
        }
    }

    /// Open `name` if it exists; never creates
    pub fn try_open_store(
        &self,
        name: &str,
        config: StoreConfig,
        txn: &Transaction,
    ) -> Result<Option<Store>> {
        self.check_operative()?;
        match txn.meta_info_for(name)? {
            Some(info) => Ok(Some(Store::new(name, check_existing(name, config, info)?))),
            None => Ok(None),
        }
    }

    /// Empty `name` by retiring its tree and registering a fresh one
    /// (new structure id) under the same name
    pub fn truncate_store(&self, name: &str, txn: &mut Transaction) -> Result<Store> {
        self.check_operative()?;
        let info = txn
            .meta_info_for(name)?
            .ok_or_else(|| Error::no_such_store(name))?;
        txn.register_store_removal(name, info)?;
        let id = self.allocate_structure_id();
        let fresh = TreeMetaInfo {
            structure_id: id,
            duplicates: info.duplicates,
            prefixing: info.prefixing,
        };
        txn.register_store_creation(name, fresh)?;
        debug!(store = name, structure_id = %id, "store truncated");
        Ok(Store::new(name, fresh))
    }

    /// Remove `name`; its records become reclamation candidates when the
    /// transaction flushes
    pub fn remove_store(&self, name: &str, txn: &mut Transaction) -> Result<()> {
        self.check_operative()?;
        let info = txn
            .meta_info_for(name)?
            .ok_or_else(|| Error::no_such_store(name))?;
        txn.register_store_removal(name, info)?;
        debug!(store = name, "store removed");
        Ok(())
    }

    /// Check if `name` exists as seen by `txn`
    pub fn store_exists(&self, name: &str, txn: &Transaction) -> Result<bool> {
        self.check_operative()?;
        Ok(txn.meta_info_for(name)?.is_some())
    }

    /// Every store name as seen by `txn`, in order
    pub fn all_store_names(&self, txn: &Transaction) -> Result<Vec<String>> {
        self.check_operative()?;
        txn.visible_store_names()
    }

    pub(crate) fn allocate_structure_id(&self) -> StructureId {
        loop {
            let raw = self.inner.structure_id.fetch_add(1, Ordering::SeqCst) + 1;
            if raw & 0xff != 0 {
                return StructureId::try_new(raw).expect("low byte checked non-zero");
            }
        }
    }

    // ------------------------------------------------------------------
    // Transaction factories
    // ------------------------------------------------------------------

    /// Begin a write transaction
    pub fn begin_transaction(&self) -> Result<Transaction> {
        self.begin_impl(false, false, None)
    }

    /// Begin a write transaction whose hook runs under the meta-lock at
    /// every snapshot acquisition (begin and revert)
    pub fn begin_transaction_with_hook(
        &self,
        hook: impl FnMut() + Send + 'static,
    ) -> Result<Transaction> {
        self.begin_impl(false, false, Some(Box::new(hook)))
    }

    /// Begin a read-only transaction; it can never materialize a mutable
    /// tree
    pub fn begin_readonly_transaction(&self) -> Result<Transaction> {
        self.begin_impl(true, false, None)
    }

    /// Begin a read-only transaction with a begin hook
    pub fn begin_readonly_transaction_with_hook(
        &self,
        hook: impl FnMut() + Send + 'static,
    ) -> Result<Transaction> {
        self.begin_impl(true, false, Some(Box::new(hook)))
    }

    /// Begin a write transaction over a privately cloned meta-tree
    /// snapshot
    ///
    /// For work that must observe its own prior writes while still
    /// appearing as a single commit unit, without sharing the snapshot
    /// object with concurrent readers.
    pub fn begin_clone_meta_transaction(&self) -> Result<Transaction> {
        self.begin_impl(false, true, None)
    }

    fn begin_impl(
        &self,
        readonly: bool,
        clone_meta: bool,
        hook: Option<BeginHook>,
    ) -> Result<Transaction> {
        self.check_operative()?;
        let inner = self.inner();
        let id = inner.next_txn_id.fetch_add(1, Ordering::SeqCst) + 1;
        let created = Instant::now();
        let thread_name = if inner.config.txn_timeout_ms > 0 {
            std::thread::current().name().map(str::to_owned)
        } else {
            None
        };
        let mut hook = hook;
        let (snapshot, root) = inner.acquire_snapshot_and_register(
            id,
            readonly,
            created,
            thread_name.clone(),
            hook.as_mut(),
        );
        let snapshot = if clone_meta {
            match snapshot.clone_private() {
                Ok(cloned) => Arc::new(cloned),
                Err(e) => {
                    inner.txns.remove(id);
                    return Err(e);
                }
            }
        } else {
            snapshot
        };
        Ok(Transaction::begin(
            self.clone(),
            id,
            readonly,
            clone_meta,
            snapshot,
            root,
            hook,
            thread_name,
            created,
        ))
    }

    // ------------------------------------------------------------------
    // Executor combinators
    // ------------------------------------------------------------------

    /// Run `f` in a write transaction, retrying on stale snapshots until
    /// the flush lands
    pub fn execute_in_transaction<F>(&self, mut f: F) -> Result<()>
    where
        F: FnMut(&mut Transaction) -> Result<()>,
    {
        self.compute_in_transaction(|txn| f(txn))
    }

    /// Like [`execute_in_transaction`](Environment::execute_in_transaction),
    /// returning the result of the attempt that flushed
    pub fn compute_in_transaction<T, F>(&self, mut f: F) -> Result<T>
    where
        F: FnMut(&mut Transaction) -> Result<T>,
    {
        let mut txn = self.begin_transaction()?;
        let result = loop {
            match f(&mut txn) {
                Ok(value) => match txn.flush() {
                    Ok(true) => break Ok(value),
                    Ok(false) => {
                        if let Err(e) = txn.revert() {
                            break Err(e);
                        }
                    }
                    Err(e) => break Err(e),
                },
                Err(e) => break Err(e),
            }
        };
        txn.abort();
        result
    }

    /// Run `f` once in a read-only transaction
    pub fn execute_in_readonly_transaction<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&Transaction) -> Result<()>,
    {
        self.compute_in_readonly_transaction(f)
    }

    /// Run `f` once in a read-only transaction and return its result
    pub fn compute_in_readonly_transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Transaction) -> Result<T>,
    {
        let mut txn = self.begin_readonly_transaction()?;
        let result = f(&txn);
        txn.abort();
        result
    }

    // ------------------------------------------------------------------
    // Deferred tasks and GC
    // ------------------------------------------------------------------

    /// Run `task` once no live transaction could still observe the
    /// current state
    ///
    /// With no live transaction it is submitted immediately; otherwise it
    /// is gated on the newest live snapshot root and runs after the
    /// oldest live root passes it. Tasks run on the shared IO worker in
    /// registration order; a panicking task is logged, never fatal.
    pub fn run_transaction_safe_task(
        &self,
        task: impl FnOnce() + Send + 'static,
    ) -> Result<()> {
        self.check_operative()?;
        let inner = self.inner();
        let mut queue = inner.deferred.lock();
        match inner.txns.newest_root() {
            Some(gate) => queue.push(Box::new(task), gate),
            None => {
                inner.worker.submit(task);
            }
        }
        Ok(())
    }

    /// Nudge the garbage collector
    pub fn gc_wake(&self) {
        self.inner.gc.wake();
    }

    /// Wait up to `timeout` for queued background work (deferred tasks,
    /// GC hand-offs) to finish
    pub fn drain_background(&self, timeout: Duration) -> bool {
        self.inner.worker.drain_timeout(timeout)
    }

    /// Point-in-time counters
    pub fn stats(&self) -> EnvironmentStats {
        EnvironmentStats {
            active_transactions: self.inner.txns.count(),
            log_high_address: self.inner.log.high_address(),
            log_cache_hit_rate: self.inner.log.cache_hit_rate(),
            reclaimable_bytes: self.inner.gc.reclaimable_bytes(),
        }
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Close the environment; one-way
    ///
    /// Fails with `ActiveTransactions` when transactions are live and
    /// forced close is disabled. Remaining deferred tasks are drained
    /// unconditionally, then the IO worker gets a bounded wait.
    pub fn close(&self) -> Result<()> {
        let inner = self.inner();
        // Outside any lock: the GC may be mid-cycle on the worker
        inner.gc.finish();
        if let Err(e) = inner.gc.save_utilization_profile(self) {
            warn!(error = %e, "failed to persist utilization profile on close");
        }
        {
            let _commit = inner.commit_lock.lock();
            let mut inoperative = inner.inoperative.lock();
            if matches!(*inoperative, Some(InoperativeCause::Closed)) {
                return Err(Error::Closed);
            }
            let live = inner.txns.count();
            if live > 0 && !inner.config.close_forcedly {
                return Err(Error::ActiveTransactions { count: live });
            }
            if live > 0 {
                warn!(live, "closing forcibly with live transactions");
            }
            inner.log.close()?;
            *inoperative = Some(InoperativeCause::Closed);
        }
        if let Some(monitor) = inner.monitor.lock().take() {
            monitor.stop();
        }
        {
            // No new reader can appear; every gate is moot
            let mut queue = inner.deferred.lock();
            for task in queue.drain_all() {
                inner.worker.submit(task);
            }
        }
        if !inner.worker.drain_timeout(CLOSE_IO_WAIT) {
            warn!("IO worker did not drain within the close wait");
        }
        inner.worker.shutdown();
        debug!("environment closed");
        Ok(())
    }

    /// Drop all data and start over with a fresh meta-tree
    ///
    /// Requires no live transactions. The GC is suspended for the
    /// duration and its accounting reset.
    pub fn clear(&self) -> Result<()> {
        self.check_operative()?;
        let inner = self.inner();
        inner.gc.suspend();
        let result = (|| {
            let _commit = inner.commit_lock.lock();
            let mut meta = inner.meta.lock();
            let live = inner.txns.count();
            if live > 0 {
                return Err(Error::ActiveTransactions { count: live });
            }
            inner.log.clear()?;
            {
                let mut queue = inner.deferred.lock();
                for task in queue.drain_all() {
                    inner.worker.submit(task);
                }
            }
            *meta = Arc::new(MetaTree::empty(inner.log.clone())?);
            inner
                .structure_id
                .store(StructureId::META.raw(), Ordering::SeqCst);
            inner.gc.reset();
            debug!("environment cleared");
            Ok(())
        })();
        inner.gc.resume();
        result
    }
}

/// Validate requested flags against an existing store's descriptor
fn check_existing(
    name: &str,
    requested: StoreConfig,
    info: TreeMetaInfo,
) -> Result<TreeMetaInfo> {
    if requested.use_existing {
        return Ok(info);
    }
    if requested.duplicates != info.duplicates {
        return Err(Error::config_mismatch(
            name,
            format!(
                "store {} duplicates",
                if info.duplicates {
                    "was created with"
                } else {
                    "was created without"
                }
            ),
        ));
    }
    if requested.prefixing && !info.prefixing {
        return Err(Error::config_mismatch(
            name,
            "prefixing requested but the store was created without it",
        ));
    }
    // A non-prefixing request against a prefixing store silently opens
    // the existing (prefixing) metadata.
    Ok(info)
}
