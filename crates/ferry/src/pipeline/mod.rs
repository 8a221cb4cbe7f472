//! # Translation Pipelines
//!
//! The model itself lives outside this crate. A worker only needs something
//! that turns a [`Batch`] of jobs into scored candidates for each of them;
//! that capability is the [`TranslationPipeline`] trait. Search strategies and
//! model backends are implementations of it, chosen when the service is built
//! through a [`PipelineFactory`], which creates one pipeline per device.
//!
//! ## Contract
//!
//! - Return one [`JobOutput`] per job in the batch, in any order. Jobs with no
//!   output are completed with [`JobError::MissingOutput`](crate::JobError::MissingOutput).
//! - Return [`PipelineError::Batch`] to fail only the current batch.
//! - Return [`PipelineError::Fatal`] (or panic) when the device is unusable.
//!   Every job of the batch is failed and the worker stops for good.

mod batch;
#[cfg(test)]
pub(crate) mod mock;

pub use batch::{Batch, JobOutput};

use async_trait::async_trait;

use crate::config::DeviceId;
use crate::error::PipelineError;
use crate::vocab::Vocabularies;

/// Produces candidates for a batch of jobs on one execution device.
///
/// ```rust
/// use async_trait::async_trait;
/// use ferry::pipeline::{Batch, JobOutput, TranslationPipeline};
/// use ferry::{Candidate, PipelineError};
///
/// /// Emits every source sentence as a single unknown word.
/// struct Unknown;
///
/// #[async_trait]
/// impl TranslationPipeline for Unknown {
///     async fn translate(&self, batch: &Batch) -> Result<Vec<JobOutput>, PipelineError> {
///         Ok(batch
///             .jobs()
///             .iter()
///             .map(|job| JobOutput::new(job.id(), vec![Candidate::new(vec![1], 0.0)]))
///             .collect())
///     }
/// }
/// ```
#[async_trait]
pub trait TranslationPipeline: Send + Sync {
    async fn translate(&self, batch: &Batch) -> Result<Vec<JobOutput>, PipelineError>;
}

/// Builds the pipeline a worker runs on `device`.
pub trait PipelineFactory: Send + Sync {
    fn build(
        &self,
        device: DeviceId,
        vocabs: &Vocabularies,
    ) -> Result<Box<dyn TranslationPipeline>, PipelineError>;
}

impl<F> PipelineFactory for F
where
    F: Fn(DeviceId, &Vocabularies) -> Result<Box<dyn TranslationPipeline>, PipelineError> + Send + Sync,
{
    fn build(
        &self,
        device: DeviceId,
        vocabs: &Vocabularies,
    ) -> Result<Box<dyn TranslationPipeline>, PipelineError> {
        self(device, vocabs)
    }
}
