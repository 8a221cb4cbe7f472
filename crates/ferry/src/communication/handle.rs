use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::sync::oneshot;
use tokio::sync::oneshot::error::TryRecvError;

use crate::error::JobError;
use crate::job::{FinishedJob, Job, JobId};

/// # CompletionHandle
///
/// The caller's side of a single-use result slot, returned by
/// [`TranslationService::submit`](crate::TranslationService::submit).
///
/// Awaiting the handle yields the job's [`FinishedJob`] once a worker has
/// produced it, in whatever order jobs happen to complete. The slot is written
/// at most once. If the writing side disappears without writing, the handle
/// resolves to [`JobError::Abandoned`] instead of hanging.
///
/// Dropping the handle does not cancel the job; the result is discarded when
/// it arrives.
#[derive(Debug)]
pub struct CompletionHandle {
    job: Arc<Job>,
    /// `None` once the result has been taken.
    receiver: Option<oneshot::Receiver<FinishedJob>>,
}

impl CompletionHandle {
    pub(crate) fn new(job: Arc<Job>, receiver: oneshot::Receiver<FinishedJob>) -> Self {
        Self { job, receiver: Some(receiver) }
    }

    /// A handle that is already resolved, used when admission fails.
    pub(crate) fn ready(finished: FinishedJob) -> Self {
        let (sender, receiver) = oneshot::channel();
        let job = finished.shared_job();
        // the receiver is alive, so this cannot fail
        let _ = sender.send(finished);
        Self::new(job, receiver)
    }

    pub fn id(&self) -> JobId {
        self.job.id()
    }

    pub fn job(&self) -> &Job {
        &self.job
    }

    /// Take the result without waiting. Returns `None` while the job is still
    /// in flight or after the result has already been taken.
    pub fn try_take(&mut self) -> Option<FinishedJob> {
        let receiver = self.receiver.as_mut()?;
        match receiver.try_recv() {
            Ok(finished) => {
                self.receiver = None;
                Some(finished)
            }
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Closed) => {
                self.receiver = None;
                Some(FinishedJob::failed(self.job.clone(), JobError::Abandoned))
            }
        }
    }
}

impl Future for CompletionHandle {
    type Output = FinishedJob;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        // a result already taken through `try_take` is not delivered twice
        let Some(receiver) = this.receiver.as_mut() else {
            return Poll::Ready(FinishedJob::failed(this.job.clone(), JobError::Abandoned));
        };
        let finished = match Pin::new(receiver).poll(cx) {
            Poll::Pending => return Poll::Pending,
            Poll::Ready(Ok(finished)) => finished,
            Poll::Ready(Err(_)) => FinishedJob::failed(this.job.clone(), JobError::Abandoned),
        };
        this.receiver = None;
        Poll::Ready(finished)
    }
}
