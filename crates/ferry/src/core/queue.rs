//! The admission queue between submitters and workers.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;

use crate::error::Rejection;
use crate::job::Job;

#[derive(Debug, Default)]
struct QueueState {
    jobs: VecDeque<Arc<Job>>,
    closed: bool,
}

/// # InputQueue
///
/// A FIFO of admitted jobs awaiting a worker, optionally bounded.
///
/// Pushing never blocks: a full or closed queue rejects the job immediately.
/// Popping waits until a job is available or the queue is closed. Once closed,
/// pops keep returning what is still queued and then `None`, which tells a
/// worker to leave its loop.
///
/// The closed flag lives under the same lock as the jobs, so a push can never
/// slip in after the queue has been closed.
#[derive(Debug)]
pub struct InputQueue {
    state: Mutex<QueueState>,
    capacity: Option<usize>,
    available: Notify,
}

impl InputQueue {
    pub fn new(capacity: Option<usize>) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            capacity,
            available: Notify::new(),
        }
    }

    /// A queue that never rejects a job for being full.
    pub fn unbounded() -> Self {
        Self::new(None)
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        // every critical section is a single deque operation, so the state
        // behind a poisoned lock is still consistent
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Admit a job, or reject it if the queue is closed or full.
    pub fn push(&self, job: Arc<Job>) -> Result<(), Rejection> {
        {
            let mut state = self.lock();
            if state.closed {
                return Err(Rejection::Closed);
            }
            if let Some(capacity) = self.capacity {
                if state.jobs.len() >= capacity {
                    return Err(Rejection::Full { capacity });
                }
            }
            state.jobs.push_back(job);
        }
        self.available.notify_one();
        Ok(())
    }

    /// Wait for the next job. Returns `None` once the queue is closed and empty.
    pub async fn pop(&self) -> Option<Arc<Job>> {
        self.pop_batch(1).await.and_then(|mut jobs| jobs.pop())
    }

    /// Wait for at least one job and take up to `max` of them, oldest first.
    /// Returns `None` once the queue is closed and empty.
    pub async fn pop_batch(&self, max: usize) -> Option<Vec<Arc<Job>>> {
        let max = max.max(1);
        loop {
            // register interest before checking, so a push or close between
            // the check and the await still wakes us
            let notified = self.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.lock();
                if !state.jobs.is_empty() {
                    let take = max.min(state.jobs.len());
                    let batch: Vec<_> = state.jobs.drain(..take).collect();
                    let more = !state.jobs.is_empty();
                    drop(state);
                    if more {
                        // pass the wakeup on to another idle worker
                        self.available.notify_one();
                    }
                    return Some(batch);
                }
                if state.closed {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Refuse further pushes and wake every waiting worker.
    pub fn close(&self) {
        self.lock().closed = true;
        self.available.notify_waiters();
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Remove and return everything still queued.
    pub fn drain(&self) -> Vec<Arc<Job>> {
        self.lock().jobs.drain(..).collect()
    }

    /// Number of queued jobs. Approximate by the time the caller reads it.
    pub fn size(&self) -> usize {
        self.lock().jobs.len()
    }

    /// The configured bound, `None` if the queue is unbounded.
    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }
}
