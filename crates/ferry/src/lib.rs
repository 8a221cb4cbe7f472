//! # Ferry
//!
//! An in-process dispatch layer for neural machine translation: it accepts
//! translation requests, fans them out over a fixed pool of model workers and
//! returns each result to its caller as soon as it is ready, independent of
//! submission order.
//!
//! ## Overview
//!
//! Ferry does not translate anything itself. The model, its search algorithm
//! and its device handling are plugged in through the
//! [`TranslationPipeline`](pipeline::TranslationPipeline) trait. What Ferry
//! provides is the machinery around it:
//!
//! - Admission of jobs into a shared, optionally bounded input queue
//! - One long-lived worker per execution device, pulling mini-batches
//! - Tracking of in-flight jobs and exactly-once delivery of their results
//! - A line-oriented convenience wrapper that keeps input order
//!
//! ## Architecture
//!
//! ```text
//! caller ──submit──▶ InputQueue ──pop──▶ Worker (one per device)
//!    ▲                                      │
//!    │                               Completion event
//!    │                                      ▼
//! CompletionHandle ◀──fulfil── JobRegistry ◀── resolver task
//! ```
//!
//! Every accepted job is registered before it is queued, so a completion can
//! never arrive for a job the registry does not yet know. A completion for a
//! job that is no longer registered is discarded, which makes duplicate
//! completions harmless. Every handle resolves, with a translation or an
//! explicit [`JobError`], at the latest when the service is stopped.
//!
//! ## Example
//!
//! ```rust
//! # use std::io;
//! use std::sync::Arc;
//! use async_trait::async_trait;
//! use ferry::pipeline::{Batch, JobOutput, TranslationPipeline};
//! use ferry::vocab::{PlainVocab, Vocabularies, Vocabulary, VocabularyLoader};
//! use ferry::{Candidate, DeviceId, PipelineError, ServiceConfig, TranslationService, VocabError};
//!
//! struct Loader;
//!
//! impl VocabularyLoader for Loader {
//!     fn load(&self, _path: &std::path::Path, _index: usize) -> Result<Arc<dyn Vocabulary>, VocabError> {
//!         Ok(Arc::new(PlainVocab::new(["hallo", "welt"])))
//!     }
//! }
//!
//! /// Copies the source words into the target vocabulary.
//! struct Echo(Arc<dyn Vocabulary>);
//!
//! #[async_trait]
//! impl TranslationPipeline for Echo {
//!     async fn translate(&self, batch: &Batch) -> Result<Vec<JobOutput>, PipelineError> {
//!         Ok(batch
//!             .jobs()
//!             .iter()
//!             .map(|job| JobOutput::new(job.id(), vec![Candidate::new(self.0.encode(job.source()), 0.0)]))
//!             .collect())
//!     }
//! }
//!
//! # #[tokio::main]
//! # async fn main() -> io::Result<()> {
//! let config = ServiceConfig {
//!     vocabs: vec!["src.vocab".into(), "trg.vocab".into()],
//!     devices: vec![DeviceId::cpu(0), DeviceId::cpu(1)],
//!     ..ServiceConfig::default()
//! };
//!
//! let service = TranslationService::new(
//!     config,
//!     Loader,
//!     |_device: DeviceId, vocabs: &Vocabularies| -> Result<Box<dyn TranslationPipeline>, PipelineError> {
//!         let target = vocabs.get(-1).ok_or(PipelineError::Fatal("no target vocabulary".into()))?;
//!         Ok(Box::new(Echo(target)))
//!     },
//! );
//! service.start().expect("service starts");
//!
//! let translated = service.translate("hallo welt\nwelt\n").await.expect("translated");
//! assert_eq!(translated, "hallo welt\nwelt\n");
//!
//! service.stop().await;
//! # Ok(())
//! # }
//! ```

mod communication;
mod error;
mod job;
mod service;

pub mod config;
pub mod core;
pub mod pipeline;
pub mod vocab;

pub use communication::{Completion, CompletionHandle, CompletionSink};
pub use config::{DeviceId, DeviceKind, ServiceConfig};
pub use error::{ConfigError, JobError, PipelineError, Rejection, VocabError};
pub use job::{Candidate, FinishedJob, Hypothesis, Job, JobId, Translation};
pub use service::TranslationService;
