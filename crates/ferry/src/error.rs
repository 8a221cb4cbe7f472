//! Error types shared across the dispatch layer.
//!
//! Errors fall into three families:
//!
//! * admission failures ([`Rejection`]), reported synchronously through an
//!   already-fulfilled [`CompletionHandle`](crate::CompletionHandle)
//! * per-job failures ([`JobError`]), carried inside a finished job's result
//! * startup failures ([`ConfigError`]), returned from
//!   [`TranslationService::start`](crate::TranslationService::start)

use std::path::PathBuf;

use crate::config::DeviceId;

/// Why the input queue refused a job.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
    /// The queue has been closed for shutdown.
    #[error("queue is closed")]
    Closed,

    /// The queue is at its configured capacity.
    #[error("queue is full ({capacity} jobs)")]
    Full { capacity: usize },

    /// The service has not been started, so there is no queue to push to.
    #[error("service is not running")]
    NotStarted,
}

/// The error payload of a job that did not produce a translation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JobError {
    /// The job was never admitted to the queue.
    #[error("could not push to queue: {0}")]
    Admission(#[from] Rejection),

    /// The worker that owned the job failed irrecoverably.
    #[error("worker {worker} failed: {message}")]
    WorkerFatal { worker: usize, message: String },

    /// The pipeline failed the batch containing this job.
    #[error("translation failed: {0}")]
    Pipeline(String),

    /// The pipeline finished the batch without output for this job.
    #[error("pipeline produced no output for the job")]
    MissingOutput,

    /// The job was still waiting when the service stopped.
    #[error("service stopped before the job was translated")]
    ShutDown,

    /// The fulfilling side went away without writing a result.
    #[error("job was abandoned without a result")]
    Abandoned,
}

/// Failure reported by a [`TranslationPipeline`](crate::pipeline::TranslationPipeline).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PipelineError {
    /// Only the current batch is lost; the worker keeps going.
    #[error("batch failed: {0}")]
    Batch(String),

    /// The execution context is unusable; the worker terminates.
    #[error("fatal: {0}")]
    Fatal(String),
}

/// Failure loading a vocabulary file.
#[derive(Debug, thiserror::Error)]
pub enum VocabError {
    #[error("could not read vocabulary {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("vocabulary {path} contains no entries")]
    Empty { path: PathBuf },
}

/// Startup failure. None of these are recoverable by retrying `start`.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("insufficient number of vocabularies: need at least 2, got {found}")]
    InsufficientVocabularies { found: usize },

    #[error("no execution devices configured")]
    NoDevices,

    #[error("invalid value {value:?} for {key}")]
    InvalidValue { key: &'static str, value: String },

    #[error(transparent)]
    Vocabulary(#[from] VocabError),

    #[error("could not build pipeline for device {device}: {message}")]
    Pipeline { device: DeviceId, message: String },

    #[error("malformed configuration: {0}")]
    Json(#[from] serde_json::Error),

    #[error("could not read configuration {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("service is already running")]
    AlreadyStarted,

    /// A previous `stop` is still joining its workers.
    #[error("service is still stopping")]
    Stopping,
}
