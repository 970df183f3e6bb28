//! Stuck-transaction monitor
//!
//! A background thread that periodically scans the live-transaction set
//! and reports any transaction whose wall-clock age exceeds the configured
//! timeout. It never aborts anything; the report is the whole job.
//!
//! The monitor is spawned by the environment's activation step, after
//! construction has finished.

use arbor_concurrency::TransactionSet;
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::warn;

struct StopSignal {
    stopped: Mutex<bool>,
    condvar: Condvar,
}

/// Background watcher for overdue transactions
pub struct StuckTransactionMonitor {
    signal: Arc<StopSignal>,
    handle: Option<JoinHandle<()>>,
}

impl StuckTransactionMonitor {
    /// Spawn the monitor thread
    ///
    /// Scans every `timeout / 2` (at least every 50ms) and warns about
    /// transactions older than `timeout`.
    pub fn spawn(txns: TransactionSet, timeout: Duration) -> Self {
        let signal = Arc::new(StopSignal {
            stopped: Mutex::new(false),
            condvar: Condvar::new(),
        });
        let thread_signal = Arc::clone(&signal);
        let interval = (timeout / 2).max(Duration::from_millis(50));
        let handle = std::thread::Builder::new()
            .name("arbor-txn-monitor".to_owned())
            .spawn(move || monitor_loop(&thread_signal, &txns, timeout, interval))
            .expect("failed to spawn transaction monitor thread");
        StuckTransactionMonitor {
            signal,
            handle: Some(handle),
        }
    }

    /// Stop the monitor and join its thread
    pub fn stop(mut self) {
        self.signal_and_join();
    }

    fn signal_and_join(&mut self) {
        {
            let mut stopped = self.signal.stopped.lock();
            *stopped = true;
            self.signal.condvar.notify_all();
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for StuckTransactionMonitor {
    fn drop(&mut self) {
        self.signal_and_join();
    }
}

fn monitor_loop(
    signal: &StopSignal,
    txns: &TransactionSet,
    timeout: Duration,
    interval: Duration,
) {
    loop {
        {
            let mut stopped = signal.stopped.lock();
            if *stopped {
                return;
            }
            let _ = signal.condvar.wait_for(&mut stopped, interval);
            if *stopped {
                return;
            }
        }
        for (id, entry) in txns.entries() {
            let age = entry.created.elapsed();
            if age > timeout {
                warn!(
                    txn_id = id,
                    age_ms = age.as_millis() as u64,
                    readonly = entry.readonly,
                    thread = entry.thread_name.as_deref().unwrap_or("<unknown>"),
                    "transaction exceeds timeout"
                );
            }
        }
    }
}
