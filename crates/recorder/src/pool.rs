//! Bounded worker pool with a resizable slot budget.
//!
//! Tasks are granted slots in FIFO order. A granted slot is an RAII
//! [`SlotLease`]: it is released when the task's future completes, is
//! cancelled, or unwinds from a panic, and the release hands the slot to the
//! next queued task under the same lock. Capacity may shrink while slots
//! are leased; running tasks are never preempted.

use std::{
    collections::VecDeque,
    future::Future,
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use {
    tokio::{sync::oneshot, task::JoinHandle},
    tokio_util::sync::CancellationToken,
    tracing::{debug, warn},
};

use crate::{Error, Result};

pub type TaskId = u64;

/// How a pooled task ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskExit {
    /// The task held a slot and its future completed.
    Ran,
    /// Cancelled before a slot was granted; the future never ran.
    CancelledWhileQueued,
    /// The task's future panicked. Its slot was released.
    Panicked,
    /// The task was aborted after failing to stop in time.
    Aborted,
}

struct Waiter {
    id: TaskId,
    grant: oneshot::Sender<SlotLease>,
}

struct PoolState {
    capacity: usize,
    running: usize,
    queue: VecDeque<Waiter>,
}

struct Inner {
    state: Mutex<PoolState>,
    next_id: AtomicU64,
}

impl Inner {
    fn lock(&self) -> std::sync::MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Grant free slots to queued waiters, oldest first.
    fn dispatch(self: &Arc<Self>, state: &mut PoolState) {
        while state.running < state.capacity {
            let Some(waiter) = state.queue.pop_front() else {
                break;
            };
            state.running += 1;
            let lease = SlotLease {
                inner: Arc::clone(self),
                armed: true,
            };
            if let Err(mut lease) = waiter.grant.send(lease) {
                // Waiter went away; undo without re-entering the lock.
                lease.armed = false;
                state.running -= 1;
            }
        }
    }

    fn release(self: &Arc<Self>) {
        let mut state = self.lock();
        state.running = state.running.saturating_sub(1);
        self.dispatch(&mut state);
    }

    fn dequeue(&self, id: TaskId) -> bool {
        let mut state = self.lock();
        let before = state.queue.len();
        state.queue.retain(|w| w.id != id);
        state.queue.len() != before
    }
}

/// One leased execution slot. Dropping it frees the slot.
pub struct SlotLease {
    inner: Arc<Inner>,
    armed: bool,
}

impl Drop for SlotLease {
    fn drop(&mut self) {
        if self.armed {
            self.inner.release();
        }
    }
}

/// Handle to a submitted task.
pub struct TaskHandle {
    pub id: TaskId,
    pub channel_id: String,
    token: CancellationToken,
    join: JoinHandle<TaskExit>,
}

impl TaskHandle {
    /// Request cooperative cancellation.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait for the task to end.
    pub async fn join(self) -> TaskExit {
        match self.join.await {
            Ok(exit) => exit,
            Err(e) if e.is_panic() => TaskExit::Panicked,
            Err(_) => TaskExit::Aborted,
        }
    }

    /// Wait up to `limit`; aborts the task if it does not finish in time.
    /// Returns `None` on timeout.
    pub async fn join_timeout(mut self, limit: Duration) -> Option<TaskExit> {
        let finished = tokio::time::timeout(limit, &mut self.join).await;
        match finished {
            Ok(Ok(exit)) => Some(exit),
            Ok(Err(e)) if e.is_panic() => Some(TaskExit::Panicked),
            Ok(Err(_)) => Some(TaskExit::Aborted),
            Err(_) => {
                warn!(task = self.id, channel = %self.channel_id, "task did not stop in time, aborting");
                self.join.abort();
                None
            },
        }
    }
}

/// Bounded pool of execution slots.
#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<Inner>,
}

impl WorkerPool {
    pub fn new(capacity: usize) -> Result<Self> {
        check_capacity(capacity)?;
        Ok(Self {
            inner: Arc::new(Inner {
                state: Mutex::new(PoolState {
                    capacity,
                    running: 0,
                    queue: VecDeque::new(),
                }),
                next_id: AtomicU64::new(1),
            }),
        })
    }

    /// Queue `task`; it starts once a slot is free. Returns immediately.
    ///
    /// The task receives a token that is cancelled by [`WorkerPool::cancel`]
    /// or [`TaskHandle::cancel`]; honouring it is up to the task.
    pub fn submit<F, Fut>(&self, channel_id: impl Into<String>, task: F) -> TaskHandle
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let channel_id = channel_id.into();
        let token = CancellationToken::new();
        let (grant_tx, mut grant_rx) = oneshot::channel();

        {
            let mut state = self.inner.lock();
            state.queue.push_back(Waiter {
                id,
                grant: grant_tx,
            });
            self.inner.dispatch(&mut state);
        }

        let inner = Arc::clone(&self.inner);
        let task_token = token.clone();
        let join = tokio::spawn(async move {
            let granted = tokio::select! {
                granted = &mut grant_rx => granted.ok(),
                () = task_token.cancelled() => None,
            };
            let Some(lease) = granted else {
                inner.dequeue(id);
                // A lease granted in the meantime is released with the receiver.
                drop(grant_rx);
                return TaskExit::CancelledWhileQueued;
            };
            task(task_token).await;
            drop(lease);
            TaskExit::Ran
        });

        debug!(task = id, channel = %channel_id, "task submitted");
        TaskHandle {
            id,
            channel_id,
            token,
            join,
        }
    }

    /// Cancel a queued or running task.
    pub fn cancel(&self, handle: &TaskHandle) {
        handle.cancel();
        self.inner.dequeue(handle.id);
    }

    /// Change the slot budget. Growing grants queued tasks immediately;
    /// shrinking never preempts running tasks.
    pub fn set_capacity(&self, capacity: usize) -> Result<()> {
        check_capacity(capacity)?;
        let mut state = self.inner.lock();
        state.capacity = capacity;
        self.inner.dispatch(&mut state);
        Ok(())
    }

    pub fn capacity(&self) -> usize {
        self.inner.lock().capacity
    }

    pub fn running(&self) -> usize {
        self.inner.lock().running
    }

    pub fn queued(&self) -> usize {
        self.inner.lock().queue.len()
    }
}

fn check_capacity(capacity: usize) -> Result<()> {
    if capacity == 0 {
        return Err(Error::invalid_config(
            "max concurrent downloads must be at least 1",
        ));
    }
    Ok(())
}
