//! Transactions
//!
//! A transaction pins one meta-tree snapshot for its whole lifetime and
//! buffers writes in lazily materialized mutable trees. Readers are never
//! blocked; writers serialize through the environment's commit lock at
//! flush time.
//!
//! State machine: `Active` → (`Flushed` | `Aborted`), both terminal.
//! `revert` keeps the transaction `Active` on a freshly acquired snapshot.
//!
//! ## Commit protocol
//!
//! `flush` on a writer runs these stages under the commit lock:
//!
//! 1. Re-check the environment is operative.
//! 2. Compare the snapshot root with the currently published meta-tree
//!    root; a mismatch returns `false` (stale snapshot, caller reverts).
//! 3. Snapshot the log's high address.
//! 4. Append: every mutated tree commits, then a new meta-tree revision.
//!    Any failure rolls the log back to the snapshotted high address; if
//!    that rollback itself fails the environment latches inoperative.
//! 5. Publish the new meta-tree and run the commit hook under the
//!    meta-lock.
//! 6. Hand the expired records to the GC via the IO worker.
//! 7. Leave the transaction set and sweep deferred tasks.

use crate::environment::Environment;
use crate::meta_tree::MetaTree;
use arbor_concurrency::SnapshotRoot;
use arbor_core::bindings::encode_string;
use arbor_core::{Error, Result, TreeMetaInfo};
use arbor_storage::{ExpiredLoggable, ImmutableTree, MutableTree};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// Callback run under the meta-lock at snapshot acquisition (begin and
/// every revert)
pub type BeginHook = Box<dyn FnMut() + Send>;
/// Callback run under the meta-lock when the new meta-tree is published
pub type CommitHook = Box<dyn FnOnce() + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TxnState {
    Active,
    Flushed,
    Aborted,
}

/// Snapshot-owning unit of work
pub struct Transaction {
    env: Environment,
    id: u64,
    readonly: bool,
    cloned_meta: bool,
    state: TxnState,
    snapshot: Arc<MetaTree>,
    snapshot_root: SnapshotRoot,
    mutable_trees: BTreeMap<String, MutableTree>,
    created_stores: BTreeMap<String, TreeMetaInfo>,
    removed_stores: BTreeMap<String, TreeMetaInfo>,
    begin_hook: Option<BeginHook>,
    commit_hook: Option<CommitHook>,
    created: Instant,
    thread_name: Option<String>,
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("readonly", &self.readonly)
            .field("state", &self.state)
            .finish()
    }
}

impl Transaction {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn begin(
        env: Environment,
        id: u64,
        readonly: bool,
        cloned_meta: bool,
        snapshot: Arc<MetaTree>,
        snapshot_root: SnapshotRoot,
        begin_hook: Option<BeginHook>,
        thread_name: Option<String>,
        created: Instant,
    ) -> Transaction {
        Transaction {
            env,
            id,
            readonly,
            cloned_meta,
            state: TxnState::Active,
            snapshot,
            snapshot_root,
            mutable_trees: BTreeMap::new(),
            created_stores: BTreeMap::new(),
            removed_stores: BTreeMap::new(),
            begin_hook,
            commit_hook: None,
            created,
            thread_name,
        }
    }

    /// Identifier unique within this environment
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Whether this transaction may materialize mutable trees
    pub fn is_readonly(&self) -> bool {
        self.readonly
    }

    /// True iff no mutable tree has been materialized and no store was
    /// created or removed
    pub fn is_idempotent(&self) -> bool {
        self.mutable_trees.is_empty()
            && self.created_stores.is_empty()
            && self.removed_stores.is_empty()
    }

    /// Meta-tree root observed at begin or at the last revert
    pub fn snapshot_root(&self) -> SnapshotRoot {
        self.snapshot_root
    }

    /// Whether the transaction reached a terminal state
    pub fn is_finished(&self) -> bool {
        self.state != TxnState::Active
    }

    /// Install a callback to run under the meta-lock when this
    /// transaction publishes its meta-tree
    pub fn set_commit_hook(&mut self, hook: impl FnOnce() + Send + 'static) {
        self.commit_hook = Some(Box::new(hook));
    }

    /// Make buffered changes durable and visible
    ///
    /// Returns `false` iff a concurrent committer advanced the meta-tree
    /// past this transaction's snapshot; `revert` and retry. A writer
    /// with nothing to commit succeeds immediately without touching the
    /// log.
    pub fn flush(&mut self) -> Result<bool> {
        self.flush_impl(false)
    }

    /// Like [`flush`](Transaction::flush), but commits through the log
    /// even when no change is buffered
    pub fn force_flush(&mut self) -> Result<bool> {
        self.flush_impl(true)
    }

    /// Discard buffered changes and reacquire a fresh snapshot
    pub fn revert(&mut self) -> Result<()> {
        self.check_active()?;
        self.env.check_operative()?;
        self.mutable_trees.clear();
        self.created_stores.clear();
        self.removed_stores.clear();
        let env = self.env.clone();
        let (snapshot, root) = env.inner().acquire_snapshot_and_register(
            self.id,
            self.readonly,
            self.created,
            self.thread_name.clone(),
            self.begin_hook.as_mut(),
        );
        self.snapshot = if self.cloned_meta {
            Arc::new(snapshot.clone_private()?)
        } else {
            snapshot
        };
        self.snapshot_root = root;
        debug!(txn_id = self.id, root = ?root, "transaction reverted");
        Ok(())
    }

    /// Leave the transaction set and discard buffered changes
    ///
    /// Idempotent: aborting a finished transaction is a no-op.
    pub fn abort(&mut self) {
        if self.state != TxnState::Active {
            return;
        }
        self.mutable_trees.clear();
        self.created_stores.clear();
        self.removed_stores.clear();
        self.finish(TxnState::Aborted);
    }

    fn flush_impl(&mut self, force: bool) -> Result<bool> {
        self.check_active()?;
        self.env.check_operative()?;
        if self.readonly || (!force && self.is_idempotent()) {
            // Fast path: nothing to append, no locks to take
            self.finish(TxnState::Flushed);
            return Ok(true);
        }
        let committed = self.commit_changes()?;
        if committed {
            self.finish(TxnState::Flushed);
        }
        Ok(committed)
    }

    fn commit_changes(&mut self) -> Result<bool> {
        let env = self.env.clone();
        let inner = env.inner();
        let commit_guard = inner.commit_lock.lock();
        inner.check_operative()?;
        let current = inner.current_meta();
        if current.root() != self.snapshot_root {
            debug!(txn_id = self.id, "snapshot stale, flush returns false");
            return Ok(false);
        }
        let high = inner.log.high_address();
        match self.apply_changes(current.as_ref()) {
            Ok((new_meta, expired)) => {
                let new_meta = Arc::new(new_meta);
                {
                    let mut meta = inner.meta.lock();
                    *meta = Arc::clone(&new_meta);
                    if let Some(hook) = self.commit_hook.take() {
                        hook();
                    }
                }
                // Enqueued while still serialized so the GC observes
                // batches in commit order; the accounting itself runs on
                // the IO worker.
                inner.dispatch_expired(expired);
                drop(commit_guard);
                self.snapshot_root = new_meta.root();
                self.snapshot = new_meta;
                Ok(true)
            }
            Err(cause) => {
                let err = inner.roll_back_failed_commit(high, &cause);
                drop(commit_guard);
                Err(err)
            }
        }
    }

    /// Append every mutated tree and a new meta-tree revision
    fn apply_changes(
        &mut self,
        current: &MetaTree,
    ) -> Result<(MetaTree, Vec<Vec<ExpiredLoggable>>)> {
        let env = self.env.clone();
        let inner = env.inner();
        let log = inner.log.clone();
        let page_size = inner.config.tree_max_page_size;

        let mut meta_mut = current.to_mutable(page_size)?;
        let mut batches = Vec::new();

        for (name, info) in &self.removed_stores {
            if let Some(root) = current.tree_root(info.structure_id)? {
                let dead = ImmutableTree::open(log.clone(), info.structure_id, Some(root))?;
                batches.push(dead.all_loggables()?);
            }
            meta_mut.delete(&encode_string(name))?;
            meta_mut.delete(&info.structure_id.to_key_bytes())?;
        }
        for (name, info) in &self.created_stores {
            meta_mut.put(&encode_string(name), &info.encode())?;
        }
        for tree in self.mutable_trees.values_mut() {
            let committed = tree.commit()?;
            meta_mut.put(
                &tree.structure_id().to_key_bytes(),
                &committed.root.to_be_bytes(),
            )?;
            batches.push(committed.expired);
        }
        let meta_committed = meta_mut.commit_meta()?;
        batches.push(meta_committed.expired);
        let new_meta = MetaTree::load(&log, meta_committed.root)?;
        Ok((new_meta, batches))
    }

    fn finish(&mut self, state: TxnState) {
        self.state = state;
        let env = self.env.clone();
        env.inner().txns.remove(self.id);
        env.inner().sweep_deferred();
    }

    pub(crate) fn check_active(&self) -> Result<()> {
        match self.state {
            TxnState::Active => Ok(()),
            TxnState::Flushed => Err(Error::InvalidState(
                "transaction already flushed".to_owned(),
            )),
            TxnState::Aborted => Err(Error::InvalidState(
                "transaction already aborted".to_owned(),
            )),
        }
    }

    // ------------------------------------------------------------------
    // Store table overlays
    // ------------------------------------------------------------------

    /// Descriptor for `name` as seen by this transaction
    pub(crate) fn meta_info_for(&self, name: &str) -> Result<Option<TreeMetaInfo>> {
        self.check_active()?;
        if let Some(info) = self.created_stores.get(name) {
            return Ok(Some(*info));
        }
        if self.removed_stores.contains_key(name) {
            return Ok(None);
        }
        self.snapshot.meta_info(name)
    }

    pub(crate) fn register_store_creation(
        &mut self,
        name: &str,
        info: TreeMetaInfo,
    ) -> Result<()> {
        self.check_active()?;
        if self.readonly {
            return Err(Error::NoTransaction);
        }
        self.created_stores.insert(name.to_owned(), info);
        Ok(())
    }

    pub(crate) fn register_store_removal(
        &mut self,
        name: &str,
        info: TreeMetaInfo,
    ) -> Result<()> {
        self.check_active()?;
        if self.readonly {
            return Err(Error::ReadOnly);
        }
        self.mutable_trees.remove(name);
        // A store created inside this transaction never became durable;
        // dropping the registration is the whole removal.
        if self.created_stores.remove(name).is_none() {
            self.removed_stores.insert(name.to_owned(), info);
        }
        Ok(())
    }

    /// Store names as seen by this transaction
    pub(crate) fn visible_store_names(&self) -> Result<Vec<String>> {
        self.check_active()?;
        let mut names: BTreeSet<String> = self.snapshot.store_names()?.into_iter().collect();
        for name in self.removed_stores.keys() {
            names.remove(name);
        }
        for name in self.created_stores.keys() {
            names.insert(name.clone());
        }
        Ok(names.into_iter().collect())
    }

    // ------------------------------------------------------------------
    // Tree access
    // ------------------------------------------------------------------

    pub(crate) fn tree_get(
        &self,
        name: &str,
        meta: TreeMetaInfo,
        key: &[u8],
    ) -> Result<Option<Vec<u8>>> {
        self.check_active()?;
        if let Some(tree) = self.mutable_trees.get(name) {
            return tree.get(key);
        }
        self.snapshot_tree(name, meta)?.get(key)
    }

    pub(crate) fn tree_get_all(
        &self,
        name: &str,
        meta: TreeMetaInfo,
        key: &[u8],
    ) -> Result<Vec<Vec<u8>>> {
        self.check_active()?;
        if let Some(tree) = self.mutable_trees.get(name) {
            return tree.get_all(key);
        }
        self.snapshot_tree(name, meta)?.get_all(key)
    }

    pub(crate) fn tree_contains(
        &self,
        name: &str,
        meta: TreeMetaInfo,
        key: &[u8],
    ) -> Result<bool> {
        self.check_active()?;
        if let Some(tree) = self.mutable_trees.get(name) {
            return Ok(tree.contains(key));
        }
        self.snapshot_tree(name, meta)?.contains(key)
    }

    pub(crate) fn tree_count(&self, name: &str, meta: TreeMetaInfo) -> Result<u64> {
        self.check_active()?;
        if let Some(tree) = self.mutable_trees.get(name) {
            return Ok(tree.count());
        }
        Ok(self.snapshot_tree(name, meta)?.count())
    }

    pub(crate) fn tree_entries(
        &self,
        name: &str,
        meta: TreeMetaInfo,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        self.check_active()?;
        if let Some(tree) = self.mutable_trees.get(name) {
            return tree.entries();
        }
        self.snapshot_tree(name, meta)?.iter().collect()
    }

    pub(crate) fn tree_put(
        &mut self,
        name: &str,
        meta: TreeMetaInfo,
        key: &[u8],
        value: &[u8],
    ) -> Result<bool> {
        self.mutable_tree(name, meta)?.put(key, value)
    }

    pub(crate) fn tree_delete(
        &mut self,
        name: &str,
        meta: TreeMetaInfo,
        key: &[u8],
    ) -> Result<bool> {
        self.mutable_tree(name, meta)?.delete(key)
    }

    /// Lazily copy-on-write the store's tree; marks the transaction
    /// non-idempotent
    fn mutable_tree(&mut self, name: &str, meta: TreeMetaInfo) -> Result<&mut MutableTree> {
        self.check_active()?;
        if self.readonly {
            return Err(Error::ReadOnly);
        }
        // Created-in-this-transaction wins over removed: truncate registers
        // both, and the fresh store must stay readable and writable.
        if !self.created_stores.contains_key(name) && self.removed_stores.contains_key(name) {
            return Err(Error::no_such_store(name));
        }
        if !self.mutable_trees.contains_key(name) {
            let env = self.env.clone();
            let inner = env.inner();
            let page_size = inner.config.tree_max_page_size;
            let tree = if self.created_stores.contains_key(name) {
                MutableTree::empty(
                    inner.log.clone(),
                    meta.structure_id,
                    meta.duplicates,
                    page_size,
                )
            } else {
                let base = self.snapshot_tree(name, meta)?;
                MutableTree::from_snapshot(base, meta.duplicates, page_size)?
            };
            self.mutable_trees.insert(name.to_owned(), tree);
            debug!(txn_id = self.id, store = name, "mutable tree materialized");
        }
        Ok(self
            .mutable_trees
            .get_mut(name)
            .expect("materialized above"))
    }

    fn snapshot_tree(&self, name: &str, meta: TreeMetaInfo) -> Result<ImmutableTree> {
        let root = if self.created_stores.contains_key(name) {
            None
        } else if self.removed_stores.contains_key(name) {
            return Err(Error::no_such_store(name));
        } else {
            self.snapshot.tree_root(meta.structure_id)?
        };
        ImmutableTree::open(self.snapshot.log().clone(), meta.structure_id, root)
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.state == TxnState::Active {
            self.abort();
        }
    }
}
