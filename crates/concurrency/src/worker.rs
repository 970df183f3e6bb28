//! Shared IO worker
//!
//! A single background thread executing submitted jobs in FIFO order.
//! One thread is deliberate: deferred tasks must run in registration
//! order, and a single consumer gives that for free.
//!
//! A panicking job is caught and logged; it must not take the worker (or
//! the environment) down with it. `drain_timeout` gives close a bounded
//! wait for in-flight IO before the thread is joined.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::error;

type Job = Box<dyn FnOnce() + Send + 'static>;

struct WorkerInner {
    queue: Mutex<VecDeque<Job>>,
    work_ready: Condvar,
    idle: Condvar,
    shutdown: AtomicBool,
    active: AtomicUsize,
}

/// Single-threaded FIFO job executor
pub struct IoWorker {
    inner: Arc<WorkerInner>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl IoWorker {
    /// Spawn the worker thread under the given name
    pub fn new(thread_name: &str) -> Self {
        let inner = Arc::new(WorkerInner {
            queue: Mutex::new(VecDeque::new()),
            work_ready: Condvar::new(),
            idle: Condvar::new(),
            shutdown: AtomicBool::new(false),
            active: AtomicUsize::new(0),
        });
        let inner_clone = Arc::clone(&inner);
        let handle = std::thread::Builder::new()
            .name(thread_name.to_owned())
            .spawn(move || worker_loop(&inner_clone))
            .expect("failed to spawn IO worker thread");
        IoWorker {
            inner,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Submit a job; returns `false` after shutdown
    pub fn submit(&self, job: impl FnOnce() + Send + 'static) -> bool {
        if self.inner.shutdown.load(Ordering::Acquire) {
            return false;
        }
        {
            let mut queue = self.inner.queue.lock();
            queue.push_back(Box::new(job));
        }
        self.inner.work_ready.notify_one();
        true
    }

    /// Wait up to `timeout` for all queued and in-flight jobs to finish
    ///
    /// Returns `true` if the worker went idle within the bound.
    pub fn drain_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut queue = self.inner.queue.lock();
        while !queue.is_empty() || self.inner.active.load(Ordering::Acquire) > 0 {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            if self
                .inner
                .idle
                .wait_for(&mut queue, deadline - now)
                .timed_out()
            {
                return queue.is_empty() && self.inner.active.load(Ordering::Acquire) == 0;
            }
        }
        true
    }

    /// Signal shutdown and join the thread; remaining jobs run first.
    /// Idempotent.
    pub fn shutdown(&self) {
        self.inner.shutdown.store(true, Ordering::Release);
        // Lock the queue before notifying to prevent a lost wakeup: a
        // worker between its shutdown check and its condvar wait holds
        // this lock, so acquiring it guarantees the notify lands.
        {
            let _queue = self.inner.queue.lock();
            self.inner.work_ready.notify_all();
        }
        if let Some(handle) = self.handle.lock().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for IoWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Decrements `active` and notifies idle waiters on drop, so bookkeeping
/// survives a panicking job.
struct ActiveJobGuard<'a> {
    inner: &'a WorkerInner,
}

impl Drop for ActiveJobGuard<'_> {
    fn drop(&mut self) {
        let prev_active = self.inner.active.fetch_sub(1, Ordering::Release);
        if prev_active == 1 {
            let queue = self.inner.queue.lock();
            if queue.is_empty() {
                self.inner.idle.notify_all();
            }
        }
    }
}

fn worker_loop(inner: &WorkerInner) {
    loop {
        let job = {
            let mut queue = inner.queue.lock();
            loop {
                if let Some(job) = queue.pop_front() {
                    inner.active.fetch_add(1, Ordering::Release);
                    break job;
                }
                if inner.shutdown.load(Ordering::Acquire) {
                    return;
                }
                inner.work_ready.wait(&mut queue);
            }
        };

        let _guard = ActiveJobGuard { inner };
        if let Err(panic) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(job)) {
            error!(
                "IO worker job panicked: {:?}",
                panic.downcast_ref::<&str>().copied().unwrap_or("(non-string panic)")
            );
        }
    }
}
