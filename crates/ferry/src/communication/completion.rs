use tokio::sync::mpsc;

use crate::error::JobError;
use crate::job::{Candidate, JobId};

/// # Completion
///
/// The event a worker emits for every job it finishes, successfully or not.
/// Completions are matched to waiting callers purely by [`JobId`].
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub id: JobId,
    /// Index of the worker that produced the event.
    pub worker: usize,
    pub result: Result<Vec<Candidate>, JobError>,
}

impl Completion {
    pub fn success(id: JobId, worker: usize, candidates: Vec<Candidate>) -> Self {
        Self { id, worker, result: Ok(candidates) }
    }

    pub fn failure(id: JobId, worker: usize, error: JobError) -> Self {
        Self { id, worker, result: Err(error) }
    }
}

/// The sending side of the completion channel, cloned into every worker.
#[derive(Debug, Clone)]
pub struct CompletionSink {
    sender: mpsc::UnboundedSender<Completion>,
}

impl CompletionSink {
    /// Hand a completion to the registry resolver. Returns `false` if the
    /// resolver is no longer running, in which case the event is dropped.
    pub fn complete(&self, completion: Completion) -> bool {
        self.sender.send(completion).is_ok()
    }
}

/// Create the channel connecting workers to the registry resolver.
pub(crate) fn completion_channel() -> (CompletionSink, mpsc::UnboundedReceiver<Completion>) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (CompletionSink { sender }, receiver)
}
