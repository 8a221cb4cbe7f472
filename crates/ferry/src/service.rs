//! The translation service: submission, lifecycle, and the line-oriented wrapper.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::communication::{CompletionHandle, completion_channel};
use crate::config::ServiceConfig;
use crate::core::queue::InputQueue;
use crate::core::registry::{JobRegistry, resolve_completions};
use crate::core::worker::Worker;
use crate::error::{ConfigError, JobError, Rejection};
use crate::job::{FinishedJob, Job, JobId};
use crate::pipeline::{PipelineFactory, TranslationPipeline};
use crate::vocab::{Vocabularies, Vocabulary, VocabularyLoader, load_vocabularies};

/// Everything that exists only between `start` and `stop`.
struct Running {
    vocabs: Vocabularies,
    queue: Arc<InputQueue>,
    registry: Arc<JobRegistry>,
    workers: Vec<Worker>,
    /// `None` once awaited by `stop`
    resolver: Option<JoinHandle<()>>,
}

impl Drop for Running {
    /// Dropping without `stop` still releases every worker blocked on the queue.
    fn drop(&mut self) {
        self.queue.close();
    }
}

/// # TranslationService
///
/// Accepts translation requests, fans them out over one worker per configured
/// device and hands each caller its result as soon as it is ready, regardless
/// of the order in which jobs finish.
///
/// ## Lifecycle
///
/// 1. [`start`](Self::start) loads the vocabularies, builds one pipeline per
///    device and spawns the workers and the completion resolver. It must be
///    called from within a Tokio runtime.
/// 2. [`submit`](Self::submit) and [`translate`](Self::translate) may be
///    called concurrently from any number of tasks.
/// 3. [`stop`](Self::stop) closes the queue, waits for every worker to exit
///    and fails whatever is still pending with [`JobError::ShutDown`]. Once it
///    returns, every handle ever returned by `submit` has resolved. Concurrent
///    calls to `stop` wait for the one in progress, and `start` is refused
///    with [`ConfigError::Stopping`] until it has finished.
///
/// A stopped service can be started again. Job ids keep increasing across
/// restarts and are never reused.
///
/// ## Cancellation
///
/// There is none. Dropping a [`CompletionHandle`] abandons interest in the
/// result, but the job still runs and its result is discarded.
pub struct TranslationService {
    config: ServiceConfig,
    loader: Arc<dyn VocabularyLoader>,
    factory: Arc<dyn PipelineFactory>,
    next_id: AtomicU64,
    running: Mutex<Option<Running>>,
    /// Held for the whole of `stop`
    lifecycle: tokio::sync::Mutex<()>,
}

impl TranslationService {
    pub fn new<L, F>(config: ServiceConfig, loader: L, factory: F) -> Self
    where
        L: VocabularyLoader + 'static,
        F: PipelineFactory + 'static,
    {
        Self {
            config,
            loader: Arc::new(loader),
            factory: Arc::new(factory),
            next_id: AtomicU64::new(0),
            running: Mutex::new(None),
            lifecycle: tokio::sync::Mutex::new(()),
        }
    }

    /// The configuration the service starts with.
    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    fn state(&self) -> MutexGuard<'_, Option<Running>> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Load vocabularies and start one worker per configured device.
    ///
    /// Nothing is started unless every pipeline could be built.
    pub fn start(&self) -> Result<(), ConfigError> {
        let Ok(_lifecycle) = self.lifecycle.try_lock() else {
            return Err(ConfigError::Stopping);
        };
        let mut state = self.state();
        if state.is_some() {
            return Err(ConfigError::AlreadyStarted);
        }

        self.config.validate()?;
        let vocabs = load_vocabularies(&self.config.vocabs, self.loader.as_ref())?;
        let target = vocabs
            .target()
            .cloned()
            .ok_or(ConfigError::InsufficientVocabularies { found: vocabs.len() })?;

        let mut pipelines: Vec<Arc<dyn TranslationPipeline>> = Vec::with_capacity(self.config.devices.len());
        for &device in &self.config.devices {
            let pipeline = self
                .factory
                .build(device, &vocabs)
                .map_err(|err| ConfigError::Pipeline { device, message: err.to_string() })?;
            pipelines.push(Arc::from(pipeline));
        }

        let queue = Arc::new(InputQueue::new(self.config.queue_capacity));
        let registry = Arc::new(JobRegistry::new(target, self.config.right_left));
        let (sink, completions) = completion_channel();
        let resolver = tokio::spawn(resolve_completions(registry.clone(), completions));

        let workers = self
            .config
            .devices
            .iter()
            .zip(pipelines)
            .enumerate()
            .map(|(index, (&device, pipeline))| {
                let mut worker = Worker::new(
                    index,
                    device,
                    queue.clone(),
                    pipeline,
                    sink.clone(),
                    self.config.mini_batch,
                );
                worker.start();
                worker
            })
            .collect::<Vec<_>>();

        info!(
            workers = workers.len(),
            vocabs = vocabs.len(),
            mini_batch = self.config.mini_batch,
            queue_capacity = ?queue.capacity(),
            "translation service started"
        );

        *state = Some(Running {
            vocabs,
            queue,
            registry,
            workers,
            resolver: Some(resolver),
        });
        Ok(())
    }

    /// Submit one sentence for translation.
    ///
    /// Always returns a handle. If the job could not be admitted the handle is
    /// already resolved with [`JobError::Admission`], and nothing about the job
    /// is retained.
    pub fn submit(
        &self,
        external_id: u64,
        text: impl Into<String>,
        nbest: usize,
        priority: usize,
    ) -> (JobId, CompletionHandle) {
        let id = JobId::new(self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        let job = Arc::new(Job::new(id, external_id, text, nbest, priority));

        let shared = self
            .state()
            .as_ref()
            .map(|running| (running.queue.clone(), running.registry.clone()));
        let Some((queue, registry)) = shared else {
            warn!(job = %id, "service is not running; rejecting job");
            let failed = FinishedJob::failed(job, Rejection::NotStarted.into());
            return (id, CompletionHandle::ready(failed));
        };

        // register first so a worker finishing instantly always finds the entry
        let handle = registry.register(job.clone());
        match queue.push(job) {
            Ok(()) => {
                info!(job = %id, queued = queue.size(), "pushed job");
            }
            Err(rejection) => {
                warn!(job = %id, reason = %rejection, "job rejected");
                registry.fail(id, JobError::Admission(rejection));
            }
        }
        (id, handle)
    }

    /// [`submit`](Self::submit) with a single best translation and default priority.
    pub fn submit_line(&self, external_id: u64, text: impl Into<String>) -> (JobId, CompletionHandle) {
        self.submit(external_id, text, 1, 0)
    }

    /// Translate a multi-line text, one job per line.
    ///
    /// Lines are submitted together and may finish in any order, but the
    /// output keeps the input order. The output ends with a newline exactly
    /// when the input does. Lines are split on `\n` alone; a `\r` before it
    /// stays part of the line handed to the pipeline. The first failed line
    /// aborts with its error.
    pub async fn translate(&self, text: &str) -> Result<String, JobError> {
        let handles: Vec<CompletionHandle> = text
            .strip_suffix('\n')
            .unwrap_or(text)
            .split('\n')
            .filter(|_| !text.is_empty())
            .enumerate()
            .map(|(line, source)| self.submit_line(line as u64, source).1)
            .collect();

        let mut output = String::with_capacity(text.len());
        for handle in handles {
            let translation = handle.await.into_outcome()?;
            output.push_str(&translation.text);
            output.push('\n');
        }

        if !text.is_empty() && !text.ends_with('\n') {
            output.pop();
        }
        Ok(output)
    }

    /// Stop all workers and wait for them to exit.
    ///
    /// Jobs still queued or in flight once the workers are gone are completed
    /// with [`JobError::ShutDown`]. A call made while another `stop` is in
    /// progress waits for it to finish. Stopping a service that is not running
    /// does nothing.
    pub async fn stop(&self) {
        let _lifecycle = self.lifecycle.lock().await;
        let running = self.state().take();
        let Some(mut running) = running else {
            return;
        };
        info!(queued = running.queue.size(), in_flight = running.registry.len(), "stopping translation service");

        // close before joining, or a worker parked on an empty queue never wakes
        running.queue.close();
        for worker in &running.workers {
            worker.stop();
        }
        for worker in &mut running.workers {
            debug!(worker = worker.index(), device = %worker.device(), "joining worker");
            worker.join().await;
        }

        // the workers held the last completion senders
        running.workers.clear();
        if let Some(resolver) = running.resolver.take() {
            if let Err(err) = resolver.await {
                warn!(error = %err, "completion resolver ended abnormally");
            }
        }

        let abandoned = running.queue.drain().len();
        let failed = running.registry.fail_all(JobError::ShutDown);
        info!(abandoned, failed, "translation service stopped");
    }

    /// Whether the service is started and not stopped (or stopping).
    pub fn is_running(&self) -> bool {
        self.state().is_some()
    }

    /// Look up a vocabulary by position; negative indices count from the end.
    /// `None` if the service is not running or the index is out of range.
    pub fn vocabulary(&self, index: isize) -> Option<Arc<dyn Vocabulary>> {
        self.state().as_ref().and_then(|running| running.vocabs.get(index))
    }

    /// Number of jobs waiting for a worker.
    pub fn queue_size(&self) -> usize {
        self.state().as_ref().map_or(0, |running| running.queue.size())
    }

    /// Number of jobs admitted but not yet completed.
    pub fn in_flight(&self) -> usize {
        self.state().as_ref().map_or(0, |running| running.registry.len())
    }
}
