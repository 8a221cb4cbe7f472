//! Long-lived workers that pull batches from the input queue.

use std::any::Any;
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::communication::{Completion, CompletionSink};
use crate::config::DeviceId;
use crate::core::queue::InputQueue;
use crate::error::{JobError, PipelineError};
use crate::pipeline::{Batch, TranslationPipeline};

/// Everything the worker loop needs, moved into the spawned task.
#[derive(Clone)]
struct WorkerContext {
    index: usize,
    queue: Arc<InputQueue>,
    pipeline: Arc<dyn TranslationPipeline>,
    sink: CompletionSink,
    mini_batch: usize,
}

/// # Worker
///
/// One execution context, repeatedly taking up to `mini_batch` jobs from the
/// shared [`InputQueue`], running its pipeline on them and emitting exactly one
/// [`Completion`] per job.
///
/// A worker leaves its loop when it is stopped, when the queue is closed and
/// empty, or when its pipeline fails fatally. In the last case every job of
/// the failing batch is completed with [`JobError::WorkerFatal`] first; the
/// worker is not restarted.
///
/// `stop` only signals; `join` waits for the loop to exit. A worker that is
/// dropped is signalled to stop but not awaited.
pub struct Worker {
    index: usize,
    device: DeviceId,
    context: WorkerContext,

    /// Flag indicating whether the loop should take another batch
    running: Arc<AtomicBool>,

    /// Wakes the loop while it waits on the queue, so it can observe `running`
    stop_signal: Arc<Notify>,

    /// Handle to the spawned loop, `None` before `start` and after `join`
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    /// Create a stopped worker. `mini_batch` is raised to at least one.
    pub fn new(
        index: usize,
        device: DeviceId,
        queue: Arc<InputQueue>,
        pipeline: Arc<dyn TranslationPipeline>,
        sink: CompletionSink,
        mini_batch: usize,
    ) -> Self {
        Self {
            index,
            device,
            context: WorkerContext {
                index,
                queue,
                pipeline,
                sink,
                mini_batch: mini_batch.max(1),
            },
            running: Arc::new(AtomicBool::new(false)),
            stop_signal: Arc::new(Notify::new()),
            handle: None,
        }
    }

    /// Position of the worker in the pool, reported in its completions.
    pub fn index(&self) -> usize {
        self.index
    }

    /// The device the worker's pipeline was built for.
    pub fn device(&self) -> DeviceId {
        self.device
    }

    /// Spawn the worker loop on the current Tokio runtime. Starting a worker
    /// that is already started does nothing.
    pub fn start(&mut self) {
        if self.handle.is_some() {
            return;
        }
        self.running.store(true, Ordering::SeqCst);

        let span = info_span!("worker", worker = self.index, device = %self.device);
        let task = work_loop(self.context.clone(), self.running.clone(), self.stop_signal.clone());
        self.handle = Some(tokio::spawn(task.instrument(span)));
    }

    /// Ask the loop to exit after its current batch. Does not wait.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.stop_signal.notify_one();
    }

    /// Wait until the loop has exited. Returns immediately if it never started.
    pub async fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            if let Err(err) = handle.await {
                error!(worker = self.index, error = %err, "worker task ended abnormally");
            }
        }
    }

    /// Whether the loop has been started and has not exited yet.
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|handle| !handle.is_finished())
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn work_loop(context: WorkerContext, running: Arc<AtomicBool>, stop_signal: Arc<Notify>) {
    info!("worker started");
    loop {
        if !running.load(Ordering::SeqCst) {
            break;
        }

        let jobs = tokio::select! {
            biased;
            _ = stop_signal.notified() => continue,
            jobs = context.queue.pop_batch(context.mini_batch) => jobs,
        };
        let Some(jobs) = jobs else {
            debug!("queue closed");
            break;
        };

        let batch = Batch::new(jobs);
        if let Err(fatal) = run_batch(&context, &batch).await {
            error!(error = %fatal, "worker failed irrecoverably; leaving loop");
            break;
        }
    }
    info!("worker stopped");
}

/// Run one batch and complete each of its jobs exactly once. Returns the
/// fatal error if the worker must not continue.
async fn run_batch(context: &WorkerContext, batch: &Batch) -> Result<(), PipelineError> {
    debug!(batch = %batch.id(), jobs = batch.len(), "dispatching batch");

    let result = AssertUnwindSafe(context.pipeline.translate(batch))
        .catch_unwind()
        .await
        .unwrap_or_else(|panic| Err(PipelineError::Fatal(panic_message(&*panic))));

    match result {
        Ok(outputs) => {
            let mut completed = HashSet::with_capacity(batch.len());
            for output in outputs {
                if !batch.contains(output.id) {
                    warn!(batch = %batch.id(), job = %output.id, "pipeline produced output for a job outside the batch");
                    continue;
                }
                if !completed.insert(output.id) {
                    warn!(batch = %batch.id(), job = %output.id, "pipeline produced more than one output for a job");
                    continue;
                }
                emit(context, Completion::success(output.id, context.index, output.candidates));
            }
            for job in batch.jobs().iter().filter(|job| !completed.contains(&job.id())) {
                emit(context, Completion::failure(job.id(), context.index, JobError::MissingOutput));
            }
            Ok(())
        }
        Err(PipelineError::Batch(message)) => {
            warn!(batch = %batch.id(), error = %message, "batch failed");
            fail_batch(context, batch, JobError::Pipeline(message));
            Ok(())
        }
        Err(PipelineError::Fatal(message)) => {
            let error = JobError::WorkerFatal {
                worker: context.index,
                message: message.clone(),
            };
            fail_batch(context, batch, error);
            Err(PipelineError::Fatal(message))
        }
    }
}

fn fail_batch(context: &WorkerContext, batch: &Batch, error: JobError) {
    for job in batch.jobs() {
        emit(context, Completion::failure(job.id(), context.index, error.clone()));
    }
}

fn emit(context: &WorkerContext, completion: Completion) {
    let id = completion.id;
    if !context.sink.complete(completion) {
        warn!(job = %id, "completion resolver is gone; dropping completion");
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("pipeline panicked: {}", message)
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("pipeline panicked: {}", message)
    } else {
        "pipeline panicked".to_string()
    }
}
