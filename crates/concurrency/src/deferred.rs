//! Deferred ("transaction-safe") task queue
//!
//! A task registered while transactions are live must not run until no
//! live transaction could still observe the state it existed under. Each
//! task carries the snapshot root current at registration; it becomes
//! ready once the oldest live root is strictly greater. With no live
//! transactions everything is ready, and close/clear drain the queue
//! unconditionally.

use crate::transaction_set::SnapshotRoot;
use std::collections::VecDeque;

/// The callback of a deferred task
pub type DeferredFn = Box<dyn FnOnce() + Send + 'static>;

struct DeferredTask {
    run: DeferredFn,
    gate: SnapshotRoot,
}

/// FIFO queue of root-gated tasks
#[derive(Default)]
pub struct DeferredTaskQueue {
    queue: VecDeque<DeferredTask>,
}

impl DeferredTaskQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        DeferredTaskQueue::default()
    }

    /// Enqueue a task gated on `gate`
    pub fn push(&mut self, run: DeferredFn, gate: SnapshotRoot) {
        self.queue.push_back(DeferredTask { run, gate });
    }

    /// Pop every ready task, preserving registration order
    ///
    /// `oldest_live` is the oldest live snapshot root, or `None` when no
    /// transaction is live (in which case every task is ready). Popping
    /// stops at the first non-ready task: later tasks must not overtake
    /// it.
    pub fn drain_ready(&mut self, oldest_live: Option<SnapshotRoot>) -> Vec<DeferredFn> {
        let mut ready = Vec::new();
        while let Some(front) = self.queue.front() {
            let runnable = match oldest_live {
                None => true,
                Some(oldest) => front.gate < oldest,
            };
            if !runnable {
                break;
            }
            ready.push(self.queue.pop_front().expect("front checked").run);
        }
        ready
    }

    /// Pop every task regardless of gates; used by close and clear
    pub fn drain_all(&mut self) -> Vec<DeferredFn> {
        self.queue.drain(..).map(|task| task.run).collect()
    }

    /// Number of queued tasks
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Check if the queue is empty
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}
