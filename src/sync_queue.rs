// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Ordered, best-effort write-back queue.
//!
//! Tasks (e.g. "propagate this primary-tier read to the replica") are
//! executed strictly FIFO by a single drain loop, so write-backs to the
//! same backend never race each other. The drain runs on a background
//! task and never blocks the caller.
//!
//! Write-back is explicitly best-effort: a failing task is logged,
//! recorded for diagnostics, and dropped. No retries, no guaranteed
//! delivery - the read path must never depend on the queue.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, warn};

use crate::health::HealthTracker;
use crate::metrics;

#[derive(Error, Debug)]
pub enum SyncTaskError {
    #[error("write-back failed: {0}")]
    Failed(String),
}

type TaskFuture = Pin<Box<dyn Future<Output = Result<(), SyncTaskError>> + Send>>;

/// One write-back operation. Executed at most once, in enqueue order.
pub struct SyncTask {
    label: String,
    op: Box<dyn FnOnce() -> TaskFuture + Send>,
}

impl SyncTask {
    pub fn new<F, Fut>(label: impl Into<String>, op: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), SyncTaskError>> + Send + 'static,
    {
        Self {
            label: label.into(),
            op: Box::new(move || Box::pin(op())),
        }
    }

    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    async fn run(self) -> Result<(), SyncTaskError> {
        (self.op)().await
    }
}

struct QueueInner {
    queue: Mutex<VecDeque<SyncTask>>,
    /// Reentrancy guard: only one logical drain at a time
    draining: AtomicBool,
    health: Arc<HealthTracker>,
}

/// Handle to the queue. Cheap to clone; all clones share one queue and
/// one drain loop.
#[derive(Clone)]
pub struct SyncQueue {
    inner: Arc<QueueInner>,
}

impl SyncQueue {
    #[must_use]
    pub fn new(health: Arc<HealthTracker>) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                queue: Mutex::new(VecDeque::new()),
                draining: AtomicBool::new(false),
                health,
            }),
        }
    }

    /// Append a task and kick the drain loop if it is not already
    /// running. An enqueue during an active drain simply extends the
    /// queue the current drain will consume.
    pub fn enqueue(&self, task: SyncTask) {
        let depth = {
            let mut queue = self.inner.queue.lock();
            queue.push_back(task);
            queue.len()
        };
        metrics::set_sync_queue_depth(depth);

        if !self.inner.draining.swap(true, Ordering::AcqRel) {
            let inner = Arc::clone(&self.inner);
            tokio::spawn(async move {
                drain(inner).await;
            });
        }
    }

    /// Pending task count.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.queue.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wait (bounded by the caller's patience) until the queue is idle.
    /// Test helper; production code never waits on write-backs.
    pub async fn drained(&self) {
        while self.inner.draining.load(Ordering::Acquire) || !self.is_empty() {
            tokio::task::yield_now().await;
        }
    }
}

async fn drain(inner: Arc<QueueInner>) {
    loop {
        let task = inner.queue.lock().pop_front();
        match task {
            Some(task) => {
                let label = task.label().to_string();
                match task.run().await {
                    Ok(()) => {
                        debug!(task = %label, "write-back completed");
                        metrics::record_sync_task("ok");
                    }
                    Err(e) => {
                        warn!(task = %label, error = %e, "write-back failed, dropping task");
                        metrics::record_sync_task("error");
                        inner.health.record_error("sync", &format!("{}: {}", label, e));
                    }
                }
                metrics::set_sync_queue_depth(inner.queue.lock().len());
            }
            None => {
                inner.draining.store(false, Ordering::Release);
                // An enqueue may have landed between the pop and the flag
                // reset; if so, take the drain back and keep going.
                if inner.queue.lock().is_empty() {
                    break;
                }
                if inner.draining.swap(true, Ordering::AcqRel) {
                    // Another enqueue already spawned a fresh drain.
                    break;
                }
            }
        }
    }
}
