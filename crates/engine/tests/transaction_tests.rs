//! Transaction lifecycle, snapshot, and combinator tests

use arbor_engine::{Environment, Error, StoreConfig};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

fn open_env(dir: &TempDir) -> Environment {
    Environment::open(dir.path()).unwrap()
}

/// Commit one value so the environment has a published meta-tree root.
fn seed_store(env: &Environment, store_name: &str) {
    env.execute_in_transaction(|txn| {
        let store = env.open_store(store_name, StoreConfig::WITHOUT_DUPLICATES, txn)?;
        store.put(txn, b"seed", b"seed")?;
        Ok(())
    })
    .unwrap();
}

// ============================================================================
// State machine
// ============================================================================

#[test]
fn test_flush_is_terminal() {
    let dir = TempDir::new().unwrap();
    let env = open_env(&dir);
    let mut txn = env.begin_transaction().unwrap();
    let store = env
        .open_store("s", StoreConfig::WITHOUT_DUPLICATES, &mut txn)
        .unwrap();
    store.put(&mut txn, b"k", b"v").unwrap();
    assert!(txn.flush().unwrap());
    assert!(txn.is_finished());

    // Further operations fail; abort stays a safe no-op
    assert!(matches!(txn.flush().unwrap_err(), Error::InvalidState(_)));
    assert!(matches!(txn.revert().unwrap_err(), Error::InvalidState(_)));
    txn.abort();
    env.close().unwrap();
}

#[test]
fn test_abort_discards_changes_and_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let env = open_env(&dir);
    seed_store(&env, "s");

    let mut txn = env.begin_transaction().unwrap();
    let store = env
        .open_store("s", StoreConfig::WITHOUT_DUPLICATES, &mut txn)
        .unwrap();
    store.put(&mut txn, b"k", b"v").unwrap();
    txn.abort();
    txn.abort();
    assert!(txn.is_finished());

    env.execute_in_readonly_transaction(|txn| {
        let store = env
            .try_open_store("s", StoreConfig::USE_EXISTING, txn)?
            .unwrap();
        assert!(store.get(txn, b"k").unwrap().is_none());
        Ok(())
    })
    .unwrap();
    env.close().unwrap();
}

#[test]
fn test_dropped_transaction_leaves_the_set() {
    let dir = TempDir::new().unwrap();
    let env = open_env(&dir);
    {
        let _txn = env.begin_transaction().unwrap();
        assert_eq!(env.stats().active_transactions, 1);
    }
    assert_eq!(env.stats().active_transactions, 0);
    env.close().unwrap();
}

#[test]
fn test_revert_refreshes_snapshot() {
    let dir = TempDir::new().unwrap();
    let env = open_env(&dir);
    seed_store(&env, "s");

    let mut txn = env.begin_transaction().unwrap();
    let root_before = txn.snapshot_root();

    // A concurrent commit advances the published root
    seed_store(&env, "other");

    txn.revert().unwrap();
    assert!(txn.snapshot_root() > root_before);
    assert!(!txn.is_finished());
    txn.abort();
    env.close().unwrap();
}

#[test]
fn test_revert_discards_buffered_writes() {
    let dir = TempDir::new().unwrap();
    let env = open_env(&dir);
    seed_store(&env, "s");

    let mut txn = env.begin_transaction().unwrap();
    let store = env
        .open_store("s", StoreConfig::WITHOUT_DUPLICATES, &mut txn)
        .unwrap();
    store.put(&mut txn, b"k", b"v").unwrap();
    assert!(!txn.is_idempotent());

    txn.revert().unwrap();
    assert!(txn.is_idempotent());
    assert!(store.get(&txn, b"k").unwrap().is_none());
    txn.abort();
    env.close().unwrap();
}

// ============================================================================
// Read-only transactions
// ============================================================================

#[test]
fn test_readonly_transaction_cannot_write() {
    let dir = TempDir::new().unwrap();
    let env = open_env(&dir);
    seed_store(&env, "s");

    let mut txn = env.begin_readonly_transaction().unwrap();
    let store = env
        .try_open_store("s", StoreConfig::USE_EXISTING, &txn)
        .unwrap()
        .unwrap();
    assert_eq!(store.get(&txn, b"seed").unwrap().unwrap(), b"seed");
    assert!(matches!(
        store.put(&mut txn, b"k", b"v").unwrap_err(),
        Error::ReadOnly
    ));
    assert!(matches!(
        store.delete(&mut txn, b"seed").unwrap_err(),
        Error::ReadOnly
    ));
    // Flush of a read-only transaction trivially succeeds
    assert!(txn.flush().unwrap());
    env.close().unwrap();
}

// ============================================================================
// Idempotent fast path
// ============================================================================

#[test]
fn test_idempotent_flush_skips_the_log() {
    let dir = TempDir::new().unwrap();
    let env = open_env(&dir);
    seed_store(&env, "s");

    let high_before = env.stats().log_high_address;
    let mut txn = env.begin_transaction().unwrap();
    let store = env
        .open_store("s", StoreConfig::WITHOUT_DUPLICATES, &mut txn)
        .unwrap();
    let _ = store.get(&txn, b"seed").unwrap();
    assert!(txn.is_idempotent());
    assert!(txn.flush().unwrap());
    assert_eq!(env.stats().log_high_address, high_before);
    env.close().unwrap();
}

#[test]
fn test_force_flush_commits_through_the_log() {
    let dir = TempDir::new().unwrap();
    let env = open_env(&dir);
    seed_store(&env, "s");

    let high_before = env.stats().log_high_address;
    let mut txn = env.begin_transaction().unwrap();
    assert!(txn.force_flush().unwrap());
    assert!(env.stats().log_high_address > high_before);
    env.close().unwrap();
}

// ============================================================================
// Hooks
// ============================================================================

#[test]
fn test_begin_hook_runs_at_begin_and_revert() {
    let dir = TempDir::new().unwrap();
    let env = open_env(&dir);
    seed_store(&env, "s");

    let calls = Arc::new(AtomicUsize::new(0));
    let hook_calls = Arc::clone(&calls);
    let mut txn = env
        .begin_transaction_with_hook(move || {
            hook_calls.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    txn.revert().unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    txn.abort();
    env.close().unwrap();
}

#[test]
fn test_commit_hook_runs_on_publication_only() {
    let dir = TempDir::new().unwrap();
    let env = open_env(&dir);
    seed_store(&env, "s");

    let calls = Arc::new(AtomicUsize::new(0));
    let mut txn = env.begin_transaction().unwrap();
    let store = env
        .open_store("s", StoreConfig::WITHOUT_DUPLICATES, &mut txn)
        .unwrap();
    store.put(&mut txn, b"k", b"v").unwrap();
    let hook_calls = Arc::clone(&calls);
    txn.set_commit_hook(move || {
        hook_calls.fetch_add(1, Ordering::SeqCst);
    });
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(txn.flush().unwrap());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    env.close().unwrap();
}

#[test]
fn test_commit_hook_not_run_on_abort() {
    let dir = TempDir::new().unwrap();
    let env = open_env(&dir);
    seed_store(&env, "s");

    let calls = Arc::new(AtomicUsize::new(0));
    let mut txn = env.begin_transaction().unwrap();
    let store = env
        .open_store("s", StoreConfig::WITHOUT_DUPLICATES, &mut txn)
        .unwrap();
    store.put(&mut txn, b"k", b"v").unwrap();
    let hook_calls = Arc::clone(&calls);
    txn.set_commit_hook(move || {
        hook_calls.fetch_add(1, Ordering::SeqCst);
    });
    txn.abort();
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    env.close().unwrap();
}

// ============================================================================
// Executor combinators
// ============================================================================

#[test]
fn test_compute_in_transaction_returns_value() {
    let dir = TempDir::new().unwrap();
    let env = open_env(&dir);
    let count = env
        .compute_in_transaction(|txn| {
            let store = env.open_store("s", StoreConfig::WITHOUT_DUPLICATES, txn)?;
            store.put(txn, b"a", b"1")?;
            store.put(txn, b"b", b"2")?;
            store.count(txn)
        })
        .unwrap();
    assert_eq!(count, 2);
    env.close().unwrap();
}

#[test]
fn test_execute_in_transaction_propagates_errors_and_aborts() {
    let dir = TempDir::new().unwrap();
    let env = open_env(&dir);
    seed_store(&env, "s");

    let err = env
        .execute_in_transaction(|txn| {
            let store = env.open_store("s", StoreConfig::WITHOUT_DUPLICATES, txn)?;
            store.put(txn, b"k", b"v")?;
            Err(Error::Config("boom".to_owned()))
        })
        .unwrap_err();
    assert!(matches!(err, Error::Config(_)));
    assert_eq!(env.stats().active_transactions, 0);

    env.execute_in_readonly_transaction(|txn| {
        let store = env
            .try_open_store("s", StoreConfig::USE_EXISTING, txn)?
            .unwrap();
        assert!(store.get(txn, b"k").unwrap().is_none());
        Ok(())
    })
    .unwrap();
    env.close().unwrap();
}

#[test]
fn test_clone_meta_transaction_observes_own_writes() {
    let dir = TempDir::new().unwrap();
    let env = open_env(&dir);
    seed_store(&env, "s");

    let mut txn = env.begin_clone_meta_transaction().unwrap();
    let store = env
        .open_store("s", StoreConfig::WITHOUT_DUPLICATES, &mut txn)
        .unwrap();
    store.put(&mut txn, b"mine", b"visible").unwrap();
    assert_eq!(store.get(&txn, b"mine").unwrap().unwrap(), b"visible");
    // Still a single commit unit
    assert!(txn.flush().unwrap());

    env.execute_in_readonly_transaction(|txn| {
        let store = env
            .try_open_store("s", StoreConfig::USE_EXISTING, txn)?
            .unwrap();
        assert_eq!(store.get(txn, b"mine").unwrap().unwrap(), b"visible");
        Ok(())
    })
    .unwrap();
    env.close().unwrap();
}

// ============================================================================
// Duplicates
// ============================================================================

#[test]
fn test_duplicate_store_round_trip() {
    let dir = TempDir::new().unwrap();
    let env = open_env(&dir);
    env.execute_in_transaction(|txn| {
        let store = env.open_store("dups", StoreConfig::WITH_DUPLICATES, txn)?;
        assert!(store.put(txn, b"k", b"a")?);
        assert!(store.put(txn, b"k", b"b")?);
        assert!(!store.put(txn, b"k", b"a")?);
        Ok(())
    })
    .unwrap();

    env.execute_in_readonly_transaction(|txn| {
        let store = env
            .try_open_store("dups", StoreConfig::USE_EXISTING, txn)?
            .unwrap();
        assert_eq!(
            store.get_all(txn, b"k").unwrap(),
            vec![b"a".to_vec(), b"b".to_vec()]
        );
        assert_eq!(store.count(txn).unwrap(), 1);
        Ok(())
    })
    .unwrap();
    env.close().unwrap();
}

// ============================================================================
// Invariants: published roots and snapshot stability
// ============================================================================

#[test]
fn test_successive_commits_publish_strictly_newer_roots() {
    let dir = TempDir::new().unwrap();
    let env = open_env(&dir);

    let mut roots = Vec::new();
    for i in 0..5 {
        env.execute_in_transaction(|txn| {
            let store = env.open_store("s", StoreConfig::WITHOUT_DUPLICATES, txn)?;
            store.put(txn, format!("k{i}").as_bytes(), b"v")?;
            Ok(())
        })
        .unwrap();
        let root = env
            .compute_in_readonly_transaction(|txn| Ok(txn.snapshot_root()))
            .unwrap();
        roots.push(root);
    }
    assert!(roots.windows(2).all(|w| w[0] < w[1]));

    // Every earlier key stays visible after later commits
    env.execute_in_readonly_transaction(|txn| {
        let store = env
            .try_open_store("s", StoreConfig::USE_EXISTING, txn)?
            .unwrap();
        for i in 0..5 {
            assert!(store.get(txn, format!("k{i}").as_bytes()).unwrap().is_some());
        }
        Ok(())
    })
    .unwrap();
    env.close().unwrap();
}

#[test]
fn test_failed_flush_leaves_snapshot_unchanged() {
    let dir = TempDir::new().unwrap();
    let env = open_env(&dir);
    seed_store(&env, "s");

    let mut stale = env.begin_transaction().unwrap();
    let store = env
        .open_store("s", StoreConfig::WITHOUT_DUPLICATES, &mut stale)
        .unwrap();
    store.put(&mut stale, b"stale", b"1").unwrap();
    let root_before = stale.snapshot_root();

    // Another writer advances the meta-tree
    seed_store(&env, "other");

    assert!(!stale.flush().unwrap());
    assert_eq!(stale.snapshot_root(), root_before);
    assert!(!stale.is_finished());
    // The buffered write is still there and lands after a revert + retry
    stale.revert().unwrap();
    store.put(&mut stale, b"stale", b"1").unwrap();
    assert!(stale.flush().unwrap());
    env.close().unwrap();
}
