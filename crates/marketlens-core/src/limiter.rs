//! Process-wide serializing scheduler for upstream calls.
//!
//! One worker task owns the execution slot. Callers enqueue work with
//! [`RateLimiter::submit`] and await a completion handle; nothing else talks to
//! the worker. This gives three guarantees by construction:
//!
//! - at most one task runs at a time,
//! - a task starts no earlier than `last_completion + min_interval`, where
//!   `last_completion` is recorded after the previous task *settled*,
//! - ready tasks run by priority (higher first), then arrival order.
//!
//! ```text
//! submit ──► [priority queue] ──► worker: wait spacing ─► pop ─► run ─► stamp ─► deliver
//! ```

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::FutureExt;
use serde::Serialize;
use tokio::sync::{oneshot, Notify};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, warn};

use crate::error::{GovernorError, GovernorResult};

type Delivery = Box<dyn FnOnce() + Send>;
type Job = Box<dyn FnOnce() -> Pin<Box<dyn Future<Output = Delivery> + Send>> + Send>;

/// Non-blocking snapshot of the limiter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LimiterStatus {
    pub queued: usize,
    /// Tasks currently executing; never more than one.
    pub pending: usize,
}

struct QueuedTask {
    priority: i32,
    seq: u64,
    job: Job,
}

impl PartialEq for QueuedTask {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for QueuedTask {}

impl PartialOrd for QueuedTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedTask {
    // Max-heap: higher priority wins, then the lower (earlier) sequence number.
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct LimiterState {
    queue: BinaryHeap<QueuedTask>,
    executing: bool,
    last_completion: Option<Instant>,
    next_seq: u64,
    /// Set once every `RateLimiter` handle is gone.
    closed: bool,
}

impl LimiterState {
    fn ready_at(&self, min_interval: Duration) -> Option<Instant> {
        self.last_completion.map(|at| at + min_interval)
    }

    fn push_anchor(&mut self, at: Instant) {
        self.last_completion = Some(match self.last_completion {
            Some(current) => current.max(at),
            None => at,
        });
    }
}

struct Shared {
    state: Mutex<LimiterState>,
    wake: Notify,
    min_interval: Duration,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, LimiterState> {
        self.state
            .lock()
            .expect("limiter state lock is not poisoned")
    }
}

/// Closes the queue when the last `RateLimiter` clone drops.
struct Lifeline {
    shared: Arc<Shared>,
}

impl Drop for Lifeline {
    fn drop(&mut self) {
        self.shared.lock().closed = true;
        self.shared.wake.notify_one();
    }
}

/// Handle to a single admission queue. Clones share the same queue and worker.
///
/// The worker exits once every clone is dropped and the queue has drained.
#[derive(Clone)]
pub struct RateLimiter {
    shared: Arc<Shared>,
    _lifeline: Arc<Lifeline>,
}

impl RateLimiter {
    /// Creates the queue and spawns its worker on the current Tokio runtime.
    /// The worker stops after the last clone is dropped and queued tasks ran.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime.
    pub fn new(min_interval: Duration) -> Self {
        let shared = Arc::new(Shared {
            state: Mutex::new(LimiterState {
                queue: BinaryHeap::new(),
                executing: false,
                last_completion: None,
                next_seq: 0,
                closed: false,
            }),
            wake: Notify::new(),
            min_interval,
        });
        tokio::spawn(run_worker(Arc::clone(&shared)));
        Self {
            _lifeline: Arc::new(Lifeline {
                shared: Arc::clone(&shared),
            }),
            shared,
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.shared.min_interval
    }

    /// Enqueues `task` immediately and returns a handle resolving to its result.
    ///
    /// The task is enqueued when `submit` is called, not when the returned
    /// future is first polled. Dropping the handle does not dequeue the task.
    /// A panicking task resolves to [`GovernorError::TaskFailed`].
    pub fn submit<T, F, Fut>(
        &self,
        priority: i32,
        task: F,
    ) -> impl Future<Output = GovernorResult<T>> + Send + 'static
    where
        T: Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = GovernorResult<T>> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let job: Job = Box::new(move || -> Pin<Box<dyn Future<Output = Delivery> + Send>> {
            Box::pin(async move {
                let result = AssertUnwindSafe(async move { task().await })
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|panic| Err(GovernorError::from_panic(panic.as_ref())));
                Box::new(move || {
                    let _ = tx.send(result);
                }) as Delivery
            })
        });

        {
            let mut state = self.shared.lock();
            let seq = state.next_seq;
            state.next_seq += 1;
            state.queue.push(QueuedTask { priority, seq, job });
            debug!(priority, seq, queued = state.queue.len(), "task queued");
        }
        self.shared.wake.notify_one();

        async move { rx.await.unwrap_or(Err(GovernorError::Cancelled)) }
    }

    pub fn status(&self) -> LimiterStatus {
        let state = self.shared.lock();
        LimiterStatus {
            queued: state.queue.len(),
            pending: usize::from(state.executing),
        }
    }

    /// Fails every queued task with [`GovernorError::Cancelled`]. The task
    /// currently executing, if any, is unaffected, as is the spacing state.
    pub fn clear(&self) -> usize {
        let drained: Vec<QueuedTask> = self.shared.lock().queue.drain().collect();
        let cancelled = drained.len();
        if cancelled > 0 {
            warn!(cancelled, "cleared queued upstream tasks");
        }
        cancelled
    }

    /// Pushes the spacing anchor to `now + cooldown` so that no task starts
    /// before `now + cooldown + min_interval`. Never moves the anchor back.
    pub fn hold_off(&self, cooldown: Duration) {
        let until = Instant::now() + cooldown;
        self.shared.lock().push_anchor(until);
        debug!(?cooldown, "limiter holding off after throttling");
    }
}

async fn run_worker(shared: Arc<Shared>) {
    loop {
        let idle = {
            let state = shared.lock();
            if state.queue.is_empty() {
                if state.closed {
                    debug!("all limiter handles dropped; worker exiting");
                    return;
                }
                true
            } else {
                false
            }
        };
        if idle {
            shared.wake.notified().await;
            continue;
        }

        // Re-evaluated after each wake: `hold_off` may move the deadline.
        loop {
            let ready_at = shared.lock().ready_at(shared.min_interval);
            match ready_at {
                Some(at) if at > Instant::now() => sleep_until(at).await,
                _ => break,
            }
        }

        let task = {
            let mut state = shared.lock();
            match state.queue.pop() {
                Some(task) => {
                    state.executing = true;
                    task
                }
                None => continue,
            }
        };

        let QueuedTask { priority, seq, job } = task;
        debug!(priority, seq, "task admitted");

        // Panics are caught inside the job; a join error means the runtime
        // is shutting down and the caller sees `Cancelled`.
        let delivery = match tokio::spawn(job()).await {
            Ok(delivery) => Some(delivery),
            Err(join_error) => {
                error!(priority, seq, error = %join_error, "upstream task did not finish");
                None
            }
        };

        {
            let mut state = shared.lock();
            state.executing = false;
            state.push_anchor(Instant::now());
        }

        if let Some(deliver) = delivery {
            deliver();
        }
    }
}
