//! Reopen and crash-recovery tests

use arbor_engine::{Environment, Error, StoreConfig};
use std::io::Write;
use std::time::Duration;
use tempfile::TempDir;

#[test]
fn test_data_survives_reopen() {
    let dir = TempDir::new().unwrap();
    {
        let env = Environment::open(dir.path()).unwrap();
        env.execute_in_transaction(|txn| {
            let store = env.open_store("users", StoreConfig::WITHOUT_DUPLICATES, txn)?;
            store.put(txn, b"alice", b"admin")?;
            store.put(txn, b"bob", b"guest")?;
            Ok(())
        })
        .unwrap();
        env.close().unwrap();
    }

    let env = Environment::open(dir.path()).unwrap();
    env.execute_in_readonly_transaction(|txn| {
        let store = env
            .try_open_store("users", StoreConfig::USE_EXISTING, txn)?
            .unwrap();
        assert_eq!(store.get(txn, b"alice").unwrap().unwrap(), b"admin");
        assert_eq!(store.get(txn, b"bob").unwrap().unwrap(), b"guest");
        assert_eq!(store.count(txn).unwrap(), 2);
        Ok(())
    })
    .unwrap();
    env.close().unwrap();
}

#[test]
fn test_last_meta_root_wins_after_reopen() {
    let dir = TempDir::new().unwrap();
    {
        let env = Environment::open(dir.path()).unwrap();
        for i in 0..5u8 {
            env.execute_in_transaction(|txn| {
                let store = env.open_store("s", StoreConfig::WITHOUT_DUPLICATES, txn)?;
                store.put(txn, b"k", &[i])?;
                Ok(())
            })
            .unwrap();
        }
        env.close().unwrap();
    }

    let env = Environment::open(dir.path()).unwrap();
    env.execute_in_readonly_transaction(|txn| {
        let store = env
            .try_open_store("s", StoreConfig::USE_EXISTING, txn)?
            .unwrap();
        assert_eq!(store.get(txn, b"k").unwrap().unwrap(), vec![4u8]);
        Ok(())
    })
    .unwrap();
    env.close().unwrap();
}

#[test]
fn test_torn_tail_is_discarded_on_reopen() {
    let dir = TempDir::new().unwrap();
    let high;
    {
        let env = Environment::open(dir.path()).unwrap();
        env.execute_in_transaction(|txn| {
            let store = env.open_store("s", StoreConfig::WITHOUT_DUPLICATES, txn)?;
            store.put(txn, b"good", b"1")?;
            Ok(())
        })
        .unwrap();
        high = env.log().high_address();
        env.close().unwrap();
    }

    // Simulate a crash half-way through a later append
    let log_path = dir.path().join(arbor_durability::LOG_FILE_NAME);
    let mut file = std::fs::OpenOptions::new()
        .append(true)
        .open(&log_path)
        .unwrap();
    file.write_all(&[0x01, 0x00, 0x00, 0x00, 0x00, 0x07]).unwrap();
    file.sync_data().unwrap();
    drop(file);

    let env = Environment::open(dir.path()).unwrap();
    assert_eq!(env.log().high_address(), high);
    env.execute_in_readonly_transaction(|txn| {
        let store = env
            .try_open_store("s", StoreConfig::USE_EXISTING, txn)?
            .unwrap();
        assert_eq!(store.get(txn, b"good").unwrap().unwrap(), b"1");
        Ok(())
    })
    .unwrap();

    // Writes keep landing after recovery
    env.execute_in_transaction(|txn| {
        let store = env.open_store("s", StoreConfig::WITHOUT_DUPLICATES, txn)?;
        store.put(txn, b"more", b"2")?;
        Ok(())
    })
    .unwrap();
    env.close().unwrap();
}

#[test]
fn test_removed_store_stays_removed_after_reopen() {
    let dir = TempDir::new().unwrap();
    {
        let env = Environment::open(dir.path()).unwrap();
        env.execute_in_transaction(|txn| {
            let store = env.open_store("doomed", StoreConfig::WITHOUT_DUPLICATES, txn)?;
            store.put(txn, b"k", b"v")?;
            Ok(())
        })
        .unwrap();
        env.execute_in_transaction(|txn| env.remove_store("doomed", txn))
            .unwrap();
        env.close().unwrap();
    }

    let env = Environment::open(dir.path()).unwrap();
    env.execute_in_readonly_transaction(|txn| {
        assert!(!env.store_exists("doomed", txn).unwrap());
        Ok(())
    })
    .unwrap();
    env.close().unwrap();
}

#[test]
fn test_utilization_profile_survives_reopen() {
    let dir = TempDir::new().unwrap();
    {
        let env = Environment::open(dir.path()).unwrap();
        // Overwrite so the old value records become reclaimable
        for round in 0..3u8 {
            env.execute_in_transaction(|txn| {
                let store = env.open_store("s", StoreConfig::WITHOUT_DUPLICATES, txn)?;
                store.put(txn, b"k", &[round; 64])?;
                Ok(())
            })
            .unwrap();
        }
        assert!(env.drain_background(Duration::from_secs(5)));
        assert!(env.stats().reclaimable_bytes > 0);
        env.close().unwrap();
    }

    let env = Environment::open(dir.path()).unwrap();
    assert!(env.stats().reclaimable_bytes > 0);
    // The profile lives in a reserved store callers can identify
    env.execute_in_readonly_transaction(|txn| {
        let names = env.all_store_names(txn).unwrap();
        assert!(names
            .iter()
            .any(|name| arbor_engine::GarbageCollector::is_utilization_profile(name)));
        Ok(())
    })
    .unwrap();
    env.close().unwrap();
}

#[test]
fn test_expired_accounting_after_overwrites() {
    let dir = TempDir::new().unwrap();
    let env = Environment::open(dir.path()).unwrap();
    env.execute_in_transaction(|txn| {
        let store = env.open_store("s", StoreConfig::WITHOUT_DUPLICATES, txn)?;
        store.put(txn, b"k", b"first")?;
        Ok(())
    })
    .unwrap();
    assert!(env.drain_background(Duration::from_secs(5)));
    let before = env.stats().reclaimable_bytes;

    env.execute_in_transaction(|txn| {
        let store = env.open_store("s", StoreConfig::WITHOUT_DUPLICATES, txn)?;
        store.put(txn, b"k", b"second")?;
        Ok(())
    })
    .unwrap();
    assert!(env.drain_background(Duration::from_secs(5)));
    assert!(env.stats().reclaimable_bytes > before);
    env.close().unwrap();
}

#[test]
fn test_inoperative_environment_reopens_cleanly() {
    let dir = TempDir::new().unwrap();
    {
        let env = Environment::open(dir.path()).unwrap();
        env.execute_in_transaction(|txn| {
            let store = env.open_store("s", StoreConfig::WITHOUT_DUPLICATES, txn)?;
            store.put(txn, b"k", b"v")?;
            Ok(())
        })
        .unwrap();

        let mut txn = env.begin_transaction().unwrap();
        let store = env
            .open_store("s", StoreConfig::WITHOUT_DUPLICATES, &mut txn)
            .unwrap();
        store.put(&mut txn, b"k2", b"v2").unwrap();
        env.log().inject_append_failures_after(1, 1);
        env.log().inject_set_high_failures(1);
        assert!(matches!(
            txn.flush().unwrap_err(),
            Error::TransactionFailed { .. }
        ));
        txn.abort();
        assert!(!env.is_operative());
        // No close: the latch is process-lifetime, the files are fine
    }

    let env = Environment::open(dir.path()).unwrap();
    env.execute_in_readonly_transaction(|txn| {
        let store = env
            .try_open_store("s", StoreConfig::USE_EXISTING, txn)?
            .unwrap();
        assert_eq!(store.get(txn, b"k").unwrap().unwrap(), b"v");
        Ok(())
    })
    .unwrap();
    env.close().unwrap();
}

#[test]
fn test_structure_id_allocator_resumes_past_existing_ids() {
    let dir = TempDir::new().unwrap();
    let first_id;
    {
        let env = Environment::open(dir.path()).unwrap();
        first_id = env
            .compute_in_transaction(|txn| {
                let store = env.open_store("a", StoreConfig::WITHOUT_DUPLICATES, txn)?;
                Ok(store.structure_id())
            })
            .unwrap();
        env.close().unwrap();
    }

    let env = Environment::open(dir.path()).unwrap();
    let second_id = env
        .compute_in_transaction(|txn| {
            let store = env.open_store("b", StoreConfig::WITHOUT_DUPLICATES, txn)?;
            Ok(store.structure_id())
        })
        .unwrap();
    assert!(second_id.raw() > first_id.raw());
    env.close().unwrap();
}
