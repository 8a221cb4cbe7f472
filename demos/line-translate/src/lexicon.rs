use std::sync::Arc;

use async_trait::async_trait;
use ferry::pipeline::{Batch, JobOutput, TranslationPipeline};
use ferry::vocab::{EOS_ID, Vocabularies, Vocabulary};
use ferry::{Candidate, DeviceId, PipelineError};
use tracing::debug;

/// Word-by-word "model": a source word is replaced by the target word on the
/// same line of the target vocabulary file. Good enough to drive the service
/// end to end without a real network behind it.
pub struct LexiconPipeline {
    device: DeviceId,
    source: Arc<dyn Vocabulary>,
    target: Arc<dyn Vocabulary>,
}

impl LexiconPipeline {
    pub fn build(device: DeviceId, vocabs: &Vocabularies) -> Result<Box<dyn TranslationPipeline>, PipelineError> {
        let source = vocabs
            .source()
            .cloned()
            .ok_or_else(|| PipelineError::Fatal("missing source vocabulary".into()))?;
        let target = vocabs
            .target()
            .cloned()
            .ok_or_else(|| PipelineError::Fatal("missing target vocabulary".into()))?;
        Ok(Box::new(Self { device, source, target }))
    }
}

#[async_trait]
impl TranslationPipeline for LexiconPipeline {
    async fn translate(&self, batch: &Batch) -> Result<Vec<JobOutput>, PipelineError> {
        debug!(device = %self.device, jobs = batch.len(), "translating batch");
        let outputs = batch
            .jobs()
            .iter()
            .map(|job| {
                let mut words: Vec<_> = self
                    .source
                    .encode(job.source())
                    .into_iter()
                    .filter(|&word| word != EOS_ID && (word as usize) < self.target.len())
                    .collect();
                words.push(EOS_ID);
                JobOutput::new(job.id(), vec![Candidate::new(words, 0.0)])
            })
            .collect();
        Ok(outputs)
    }
}
