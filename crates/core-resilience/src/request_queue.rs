//! Request Queue: bounded-concurrency admission for one resource
//!
//! Submitted operations are appended to a FIFO backlog. Whenever fewer than
//! `concurrency` operations are running, the dispatcher pops the oldest entry
//! and spawns it; when an operation finishes it frees its slot and dispatches
//! again. Arrival bursts never push the number of running operations above
//! `concurrency`.
//!
//! Entries are enqueued synchronously inside [`RequestQueue::submit`], so
//! dispatch order follows call order even if the returned futures are polled
//! in a different order.
//!
//! # Example
//!
//! ```no_run
//! use waypoint_core_resilience::{RequestQueue, QueueConfig, ResilienceError};
//!
//! # async fn example() -> Result<(), ResilienceError> {
//! let queue = RequestQueue::new(QueueConfig { concurrency: 5, max_pending: None });
//!
//! let offers = queue.submit(async { Ok::<_, ResilienceError>(vec![1, 2, 3]) }).await?;
//! # Ok(())
//! # }
//! ```

use super::error::ResilienceError;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// Configuration for a request queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Maximum operations executing at once
    pub concurrency: usize,
    /// Maximum operations waiting in the backlog (`None` = unbounded)
    pub max_pending: Option<usize>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            concurrency: 5,
            max_pending: None,
        }
    }
}

/// Queue occupancy snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    /// Operations waiting for a slot
    pub queued: usize,
    /// Operations currently executing
    pub running: usize,
    /// Configured concurrency
    pub concurrency: usize,
}

type Job = BoxFuture<'static, ()>;

#[derive(Default)]
struct QueueState {
    pending: VecDeque<Job>,
    running: usize,
}

struct QueueInner {
    config: QueueConfig,
    state: Mutex<QueueState>,
}

/// Bounded-concurrency FIFO executor.
///
/// Cloning is cheap and clones share the same backlog and slots. Operations
/// are spawned onto the ambient tokio runtime.
#[derive(Clone)]
pub struct RequestQueue {
    inner: Arc<QueueInner>,
}

impl std::fmt::Debug for RequestQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestQueue")
            .field("config", &self.inner.config)
            .field("stats", &self.stats())
            .finish()
    }
}

impl RequestQueue {
    /// Create a queue. A concurrency of 0 is treated as 1.
    pub fn new(config: QueueConfig) -> Self {
        let config = QueueConfig {
            concurrency: config.concurrency.max(1),
            ..config
        };
        Self {
            inner: Arc::new(QueueInner {
                config,
                state: Mutex::new(QueueState::default()),
            }),
        }
    }

    /// Enqueue `op` and return a future resolving to its result.
    ///
    /// The entry joins the backlog before this function returns. Dropping the
    /// returned future does not cancel the operation once dispatched.
    pub fn submit<F, T>(&self, op: F) -> impl Future<Output = Result<T, ResilienceError>>
    where
        F: Future<Output = Result<T, ResilienceError>> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let job: Job = Box::pin(async move {
            let _ = tx.send(op.await);
        });

        let admitted = self.enqueue(job);
        if admitted.is_ok() {
            self.dispatch();
        }

        // Outside a runtime dispatch waits until the returned future is first polled
        let queue = self.clone();
        async move {
            admitted?;
            queue.dispatch();
            rx.await.unwrap_or(Err(ResilienceError::Cancelled))
        }
    }

    fn enqueue(&self, job: Job) -> Result<(), ResilienceError> {
        let mut state = self.inner.state.lock();
        if let Some(capacity) = self.inner.config.max_pending {
            if state.pending.len() >= capacity {
                warn!(capacity, "Request queue full, rejecting operation");
                return Err(ResilienceError::QueueFull { capacity });
            }
        }
        state.pending.push_back(job);
        Ok(())
    }

    /// Start as many pending jobs as free slots allow
    fn dispatch(&self) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        loop {
            let job = {
                let mut state = self.inner.state.lock();
                if state.running >= self.inner.config.concurrency {
                    return;
                }
                match state.pending.pop_front() {
                    Some(job) => {
                        state.running += 1;
                        job
                    }
                    None => return,
                }
            };

            let queue = self.clone();
            runtime.spawn(async move {
                let _slot = SlotRelease(queue);
                job.await;
            });
        }
    }

    /// Current occupancy
    pub fn stats(&self) -> QueueStats {
        let state = self.inner.state.lock();
        QueueStats {
            queued: state.pending.len(),
            running: state.running,
            concurrency: self.inner.config.concurrency,
        }
    }

    /// Drop every operation still waiting in the backlog.
    ///
    /// Their callers observe [`ResilienceError::Cancelled`]. Running
    /// operations are unaffected.
    pub fn clear(&self) -> usize {
        let dropped: Vec<Job> = self.inner.state.lock().pending.drain(..).collect();
        let count = dropped.len();
        drop(dropped);
        debug!(count, "Cleared request queue backlog");
        count
    }
}

/// Frees a slot and re-dispatches even if the job panics
struct SlotRelease(RequestQueue);

impl Drop for SlotRelease {
    fn drop(&mut self) {
        self.0.inner.state.lock().running -= 1;
        self.0.dispatch();
    }
}
