use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use super::{Batch, JobOutput, TranslationPipeline};
use crate::error::PipelineError;
use crate::job::Candidate;
use crate::vocab::{PlainVocab, Vocabulary};

/// Target vocabulary understood by [`PrefixPipeline`]: `t` + each source word.
pub fn target_vocab(words: &[&str]) -> Arc<dyn Vocabulary> {
    Arc::new(PlainVocab::new(words.iter().map(|w| format!("t{}", w))))
}

/// "Translates" by prefixing every source word with `t`, optionally sleeping
/// per job first so tests can force an arbitrary completion order.
pub struct PrefixPipeline {
    pub target: Arc<dyn Vocabulary>,
    pub delay: fn(&str) -> Duration,
    pub batches: Arc<AtomicUsize>,
}

impl PrefixPipeline {
    pub fn new(target: Arc<dyn Vocabulary>) -> Self {
        Self {
            target,
            delay: |_| Duration::ZERO,
            batches: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_delay(mut self, delay: fn(&str) -> Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl TranslationPipeline for PrefixPipeline {
    async fn translate(&self, batch: &Batch) -> Result<Vec<JobOutput>, PipelineError> {
        self.batches.fetch_add(1, Ordering::SeqCst);
        let mut outputs = Vec::with_capacity(batch.len());
        for job in batch.jobs() {
            let delay = (self.delay)(job.source());
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let prefixed: Vec<String> = job.source().split_whitespace().map(|w| format!("t{}", w)).collect();
            let words = self.target.encode(&prefixed.join(" "));
            outputs.push(JobOutput::new(job.id(), vec![Candidate::new(words, 0.0)]));
        }
        Ok(outputs)
    }
}

/// Fails every batch with the configured error.
pub struct FailingPipeline(pub PipelineError);

#[async_trait]
impl TranslationPipeline for FailingPipeline {
    async fn translate(&self, _batch: &Batch) -> Result<Vec<JobOutput>, PipelineError> {
        Err(self.0.clone())
    }
}

/// Panics on every batch.
pub struct PanickingPipeline;

#[async_trait]
impl TranslationPipeline for PanickingPipeline {
    async fn translate(&self, _batch: &Batch) -> Result<Vec<JobOutput>, PipelineError> {
        panic!("kernel launch failed")
    }
}

/// Answers only the first job of each batch, plus a stray output for a job
/// that is not in the batch.
pub struct ForgetfulPipeline;

#[async_trait]
impl TranslationPipeline for ForgetfulPipeline {
    async fn translate(&self, batch: &Batch) -> Result<Vec<JobOutput>, PipelineError> {
        let mut outputs = Vec::new();
        if let Some(first) = batch.jobs().first() {
            outputs.push(JobOutput::new(first.id(), vec![Candidate::new(vec![], 0.0)]));
            outputs.push(JobOutput::new(first.id(), vec![Candidate::new(vec![], -1.0)]));
        }
        outputs.push(JobOutput::new(crate::job::JobId::new(u64::MAX), vec![]));
        Ok(outputs)
    }
}

/// Records the source of every job it sees and answers each with an empty
/// sentence.
#[derive(Clone, Default)]
pub struct RecordingPipeline {
    pub sources: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl TranslationPipeline for RecordingPipeline {
    async fn translate(&self, batch: &Batch) -> Result<Vec<JobOutput>, PipelineError> {
        let mut sources = self.sources.lock().unwrap();
        Ok(batch
            .jobs()
            .iter()
            .map(|job| {
                sources.push(job.source().to_string());
                JobOutput::new(job.id(), vec![Candidate::new(vec![], 0.0)])
            })
            .collect())
    }
}
