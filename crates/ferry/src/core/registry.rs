//! Matching worker completions back to the callers waiting on them.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, warn};

use crate::communication::{Completion, CompletionHandle};
use crate::error::JobError;
use crate::job::{FinishedJob, Job, JobId, Translation};
use crate::vocab::Vocabulary;

/// An in-flight job and the write side of its completion handle.
#[derive(Debug)]
struct Entry {
    job: Arc<Job>,
    sender: oneshot::Sender<FinishedJob>,
}

impl Entry {
    fn fulfil(self, outcome: Result<Translation, JobError>) {
        let id = self.job.id();
        if self.sender.send(FinishedJob::new(self.job, outcome)).is_err() {
            debug!(job = %id, "caller dropped its handle; discarding result");
        }
    }
}

/// # JobRegistry
///
/// Maps every in-flight [`JobId`] to the caller waiting on it.
///
/// An entry exists from the moment a job is registered until the first
/// completion for it arrives (or the service fails it at shutdown). Insert and
/// lookup-and-remove happen under a single lock; turning the raw candidates
/// into a [`Translation`] and waking the caller happen after the lock is
/// released, so a slow decode never holds up unrelated completions.
///
/// A completion for an id that is not registered is discarded with a warning.
/// That is the expected outcome of a duplicate completion.
#[derive(Debug)]
pub struct JobRegistry {
    entries: Mutex<HashMap<JobId, Entry>>,
    target: Arc<dyn Vocabulary>,
    right_left: bool,
}

impl JobRegistry {
    /// `target` decodes the candidates of every completed job.
    pub fn new(target: Arc<dyn Vocabulary>, right_left: bool) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            target,
            right_left,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<JobId, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Track `job` and return the handle its caller will wait on.
    pub fn register(&self, job: Arc<Job>) -> CompletionHandle {
        let (sender, receiver) = oneshot::channel();
        let handle = CompletionHandle::new(job.clone(), receiver);
        let previous = self.lock().insert(job.id(), Entry { job, sender });
        debug_assert!(previous.is_none(), "job ids are never reused");
        handle
    }

    /// Resolve a worker's completion in place. Returns `false` if the job was
    /// unknown.
    pub fn complete(&self, completion: Completion) -> bool {
        match self.claim(completion) {
            Some(finalize) => {
                finalize.run();
                true
            }
            None => false,
        }
    }

    /// Remove the entry a completion belongs to and return the work that
    /// decodes its result and wakes the caller. Only the removal happens under
    /// the lock. `None` if the job was unknown.
    pub(crate) fn claim(&self, completion: Completion) -> Option<Finalize> {
        let entry = self.lock().remove(&completion.id);
        let Some(entry) = entry else {
            warn!(job = %completion.id, worker = completion.worker, "job not found; discarding completion");
            return None;
        };
        Some(Finalize {
            entry,
            completion,
            target: self.target.clone(),
            right_left: self.right_left,
        })
    }

    /// Resolve a single job with `error`. Returns `false` if the job was unknown.
    pub fn fail(&self, id: JobId, error: JobError) -> bool {
        let entry = self.lock().remove(&id);
        match entry {
            Some(entry) => {
                entry.fulfil(Err(error));
                true
            }
            None => false,
        }
    }

    /// Resolve every registered job with `error`, returning how many there were.
    pub fn fail_all(&self, error: JobError) -> usize {
        let entries: Vec<Entry> = self.lock().drain().map(|(_, entry)| entry).collect();
        let count = entries.len();
        for entry in entries {
            entry.fulfil(Err(error.clone()));
        }
        count
    }

    pub fn contains(&self, id: JobId) -> bool {
        self.lock().contains_key(&id)
    }

    /// Number of jobs in flight.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A claimed completion waiting to be decoded and handed to its caller.
pub(crate) struct Finalize {
    entry: Entry,
    completion: Completion,
    target: Arc<dyn Vocabulary>,
    right_left: bool,
}

impl Finalize {
    pub(crate) fn run(self) {
        let Finalize { entry, completion, target, right_left } = self;
        let outcome = completion.result.and_then(|candidates| {
            Translation::from_candidates(candidates, entry.job.nbest(), right_left, target.as_ref())
        });
        debug!(job = %completion.id, worker = completion.worker, ok = outcome.is_ok(), "job completed");
        entry.fulfil(outcome);
    }
}

/// Drain the completion channel into the registry until every sender is gone.
///
/// The resolver only claims entries. Decoding runs on the blocking pool, one
/// task per job, so a slow vocabulary never delays unrelated completions. The
/// resolver returns once every decode it started has delivered.
pub(crate) async fn resolve_completions(
    registry: Arc<JobRegistry>,
    mut completions: mpsc::UnboundedReceiver<Completion>,
) {
    let mut finalizing = JoinSet::new();
    while let Some(completion) = completions.recv().await {
        if let Some(finalize) = registry.claim(completion) {
            finalizing.spawn_blocking(move || finalize.run());
        }
        while let Some(result) = finalizing.try_join_next() {
            log_finalize(result);
        }
    }
    while let Some(result) = finalizing.join_next().await {
        log_finalize(result);
    }
    debug!("completion channel closed; resolver exiting");
}

fn log_finalize(result: Result<(), JoinError>) {
    // a panicking decode drops the sender, so the caller sees `Abandoned`
    if let Err(err) = result {
        warn!(error = %err, "result finalization failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::communication::completion_channel;
    use crate::job::Candidate;
    use crate::vocab::{PlainVocab, WordId};
    use std::time::{Duration, Instant};
    use tokio::time;

    fn registry() -> JobRegistry {
        JobRegistry::new(Arc::new(PlainVocab::new(["eins", "zwei", "drei"])), false)
    }

    fn job(id: u64, nbest: usize) -> Arc<Job> {
        Arc::new(Job::new(JobId::new(id), 100 + id, "source", nbest, 0))
    }

    #[tokio::test]
    async fn test_complete_fulfils_and_removes() {
        let registry = registry();
        let handle = registry.register(job(1, 1));
        assert!(registry.contains(JobId::new(1)));

        let done = registry.complete(Completion::success(JobId::new(1), 0, vec![Candidate::new(vec![2, 3], 0.0)]));
        assert!(done);
        assert!(registry.is_empty());

        let finished = handle.await;
        assert_eq!(finished.external_id(), 101);
        assert_eq!(finished.text(), Some("eins zwei"));
    }

    #[tokio::test]
    async fn test_duplicate_completion_is_a_noop() {
        let registry = registry();
        let handle = registry.register(job(1, 1));

        assert!(registry.complete(Completion::success(JobId::new(1), 0, vec![Candidate::new(vec![4], 0.0)])));
        assert!(!registry.complete(Completion::failure(JobId::new(1), 1, JobError::Pipeline("late".into()))));

        let finished = handle.await;
        assert_eq!(finished.text(), Some("drei"));
    }

    #[tokio::test]
    async fn test_unknown_job_is_discarded() {
        let registry = registry();
        assert!(!registry.complete(Completion::success(JobId::new(42), 0, vec![])));
        assert!(!registry.fail(JobId::new(42), JobError::ShutDown));
    }

    #[tokio::test]
    async fn test_error_completion_is_delivered() {
        let registry = registry();
        let handle = registry.register(job(5, 1));

        registry.complete(Completion::failure(
            JobId::new(5),
            2,
            JobError::WorkerFatal { worker: 2, message: "device lost".into() },
        ));

        let finished = handle.await;
        assert_eq!(
            finished.error(),
            Some(&JobError::WorkerFatal { worker: 2, message: "device lost".into() })
        );
    }

    #[tokio::test]
    async fn test_nbest_follows_job_request() {
        let registry = registry();
        let handle = registry.register(job(1, 2));

        registry.complete(Completion::success(
            JobId::new(1),
            0,
            vec![
                Candidate::new(vec![2], -1.0),
                Candidate::new(vec![3], -2.0),
                Candidate::new(vec![4], -3.0),
            ],
        ));

        let translation = handle.await.into_outcome().unwrap();
        assert_eq!(translation.nbest.len(), 2);
        assert_eq!(translation.text, "eins");
    }

    #[tokio::test]
    async fn test_abandoned_handle_does_not_break_completion() {
        let registry = registry();
        drop(registry.register(job(1, 1)));
        assert!(registry.complete(Completion::success(JobId::new(1), 0, vec![Candidate::new(vec![2], 0.0)])));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_fail_all_resolves_everything() {
        let registry = registry();
        let handles: Vec<_> = (1..=3).map(|id| registry.register(job(id, 1))).collect();

        assert_eq!(registry.fail_all(JobError::ShutDown), 3);
        assert!(registry.is_empty());
        for handle in handles {
            assert_eq!(handle.await.error(), Some(&JobError::ShutDown));
        }
    }

    /// Decodes like `inner`, but takes `delay` whenever `slow_word` appears.
    #[derive(Debug)]
    struct SlowVocab {
        inner: PlainVocab,
        slow_word: WordId,
        delay: Duration,
    }

    impl Vocabulary for SlowVocab {
        fn len(&self) -> usize {
            self.inner.len()
        }

        fn encode(&self, text: &str) -> Vec<WordId> {
            self.inner.encode(text)
        }

        fn decode(&self, words: &[WordId]) -> String {
            if words.contains(&self.slow_word) {
                std::thread::sleep(self.delay);
            }
            self.inner.decode(words)
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_slow_decode_does_not_hold_up_other_jobs() {
        let target = SlowVocab {
            inner: PlainVocab::new(["langsam", "schnell"]),
            slow_word: 2,
            delay: Duration::from_millis(400),
        };
        let registry = Arc::new(JobRegistry::new(Arc::new(target), false));
        let (sink, receiver) = completion_channel();
        let resolver = tokio::spawn(resolve_completions(registry.clone(), receiver));

        let slow = registry.register(job(1, 1));
        let fast = registry.register(job(2, 1));
        sink.complete(Completion::success(JobId::new(1), 0, vec![Candidate::new(vec![2], 0.0)]));
        sink.complete(Completion::success(JobId::new(2), 1, vec![Candidate::new(vec![3], 0.0)]));

        let started = Instant::now();
        let fast = time::timeout(Duration::from_millis(200), fast)
            .await
            .expect("fast job is not queued behind the slow decode");
        assert_eq!(fast.text(), Some("schnell"));
        assert!(started.elapsed() < Duration::from_millis(200));

        assert_eq!(slow.await.text(), Some("langsam"));
        drop(sink);
        resolver.await.unwrap();
    }

    #[tokio::test]
    async fn test_resolver_waits_for_pending_decodes() {
        let target = SlowVocab {
            inner: PlainVocab::new(["langsam"]),
            slow_word: 2,
            delay: Duration::from_millis(50),
        };
        let registry = Arc::new(JobRegistry::new(Arc::new(target), false));
        let (sink, receiver) = completion_channel();
        let resolver = tokio::spawn(resolve_completions(registry.clone(), receiver));

        let mut handle = registry.register(job(1, 1));
        sink.complete(Completion::success(JobId::new(1), 0, vec![Candidate::new(vec![2], 0.0)]));
        drop(sink);
        resolver.await.unwrap();

        // the resolver only exits after the decode has delivered
        let finished = handle.try_take().expect("resolved before the resolver exited");
        assert_eq!(finished.text(), Some("langsam"));
    }

    #[tokio::test]
    async fn test_resolver_consumes_channel() {
        let registry = Arc::new(registry());
        let (sink, receiver) = completion_channel();
        let resolver = tokio::spawn(resolve_completions(registry.clone(), receiver));

        let first = registry.register(job(1, 1));
        let second = registry.register(job(2, 1));

        // completions arrive in the opposite order of registration
        sink.complete(Completion::success(JobId::new(2), 1, vec![Candidate::new(vec![3], 0.0)]));
        sink.complete(Completion::success(JobId::new(1), 0, vec![Candidate::new(vec![2], 0.0)]));

        assert_eq!(second.await.text(), Some("zwei"));
        assert_eq!(first.await.text(), Some("eins"));

        drop(sink);
        resolver.await.unwrap();
    }
}
