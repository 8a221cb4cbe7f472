//! Jobs and their results.
//!
//! A [`Job`] is created when a request is submitted and is immutable from then
//! on. It is shared through an `Arc` by the input queue, the job registry and
//! the caller's [`CompletionHandle`](crate::CompletionHandle). The outcome is
//! kept separately in a [`FinishedJob`], which is written exactly once.

use std::fmt;
use std::sync::Arc;

use crate::error::JobError;
use crate::vocab::{Vocabulary, WordId};

/// Service-assigned identifier of a job, unique for the lifetime of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(u64);

impl JobId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One accepted translation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    id: JobId,
    external_id: u64,
    source: String,
    nbest: usize,
    priority: usize,
}

impl Job {
    pub fn new(id: JobId, external_id: u64, source: impl Into<String>, nbest: usize, priority: usize) -> Self {
        Self {
            id,
            external_id,
            source: source.into(),
            nbest,
            priority,
        }
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    /// The caller's own request number, echoed back untouched.
    pub fn external_id(&self) -> u64 {
        self.external_id
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Number of alternatives requested; at least one is always produced.
    pub fn nbest(&self) -> usize {
        self.nbest
    }

    /// Accepted for API compatibility. Scheduling ignores it.
    pub fn priority(&self) -> usize {
        self.priority
    }
}

/// A scored output sequence as produced by a translation pipeline, in target word ids.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub words: Vec<WordId>,
    pub score: f32,
}

impl Candidate {
    pub fn new(words: Vec<WordId>, score: f32) -> Self {
        Self { words, score }
    }
}

/// A decoded, scored alternative.
#[derive(Debug, Clone, PartialEq)]
pub struct Hypothesis {
    pub text: String,
    pub score: f32,
}

/// The successful result of a job.
#[derive(Debug, Clone, PartialEq)]
pub struct Translation {
    /// The best hypothesis.
    pub text: String,
    /// Up to `nbest` alternatives, best first. Always contains the best one.
    pub nbest: Vec<Hypothesis>,
}

impl Translation {
    /// Decode pipeline candidates into a translation.
    ///
    /// Candidates are ranked by score (highest first, ties keep their order).
    /// When the model decodes right-to-left the word order of every candidate
    /// is reversed before decoding.
    pub fn from_candidates(
        mut candidates: Vec<Candidate>,
        nbest: usize,
        right_left: bool,
        target: &dyn Vocabulary,
    ) -> Result<Self, JobError> {
        if candidates.is_empty() {
            return Err(JobError::MissingOutput);
        }
        candidates.sort_by(|a, b| b.score.total_cmp(&a.score));
        candidates.truncate(nbest.max(1));

        let nbest: Vec<Hypothesis> = candidates
            .into_iter()
            .map(|mut candidate| {
                if right_left {
                    candidate.words.reverse();
                }
                Hypothesis {
                    text: target.decode(&candidate.words),
                    score: candidate.score,
                }
            })
            .collect();

        Ok(Self {
            text: nbest[0].text.clone(),
            nbest,
        })
    }
}

/// A job together with its single, final outcome.
#[derive(Debug, Clone)]
pub struct FinishedJob {
    job: Arc<Job>,
    outcome: Result<Translation, JobError>,
}

impl FinishedJob {
    pub fn new(job: Arc<Job>, outcome: Result<Translation, JobError>) -> Self {
        Self { job, outcome }
    }

    pub fn failed(job: Arc<Job>, error: JobError) -> Self {
        Self::new(job, Err(error))
    }

    pub fn job(&self) -> &Job {
        &self.job
    }

    pub(crate) fn shared_job(&self) -> Arc<Job> {
        self.job.clone()
    }

    pub fn id(&self) -> JobId {
        self.job.id()
    }

    pub fn external_id(&self) -> u64 {
        self.job.external_id()
    }

    pub fn outcome(&self) -> Result<&Translation, &JobError> {
        self.outcome.as_ref()
    }

    pub fn is_ok(&self) -> bool {
        self.outcome.is_ok()
    }

    /// The best translation, if the job succeeded.
    pub fn text(&self) -> Option<&str> {
        self.outcome.as_ref().ok().map(|t| t.text.as_str())
    }

    pub fn error(&self) -> Option<&JobError> {
        self.outcome.as_ref().err()
    }

    pub fn into_outcome(self) -> Result<Translation, JobError> {
        self.outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vocab::PlainVocab;

    fn target() -> PlainVocab {
        PlainVocab::new(["das", "ist", "gut", "schlecht"])
    }

    #[test]
    fn test_best_candidate_wins() {
        let candidates = vec![
            Candidate::new(vec![2, 3, 5], -2.5),
            Candidate::new(vec![2, 3, 4], -0.5),
        ];
        let translation = Translation::from_candidates(candidates, 1, false, &target()).unwrap();

        assert_eq!(translation.text, "das ist gut");
        assert_eq!(translation.nbest.len(), 1);
    }

    #[test]
    fn test_nbest_is_ranked_and_truncated() {
        let candidates = vec![
            Candidate::new(vec![4], -3.0),
            Candidate::new(vec![2], -1.0),
            Candidate::new(vec![5], -2.0),
        ];
        let translation = Translation::from_candidates(candidates, 2, false, &target()).unwrap();

        let texts: Vec<_> = translation.nbest.iter().map(|h| h.text.as_str()).collect();
        assert_eq!(texts, vec!["das", "schlecht"]);
        assert_eq!(translation.text, "das");
    }

    #[test]
    fn test_right_left_reverses_words() {
        let candidates = vec![Candidate::new(vec![4, 3, 2, 0], 0.0)];
        let translation = Translation::from_candidates(candidates, 1, true, &target()).unwrap();
        assert_eq!(translation.text, "das ist gut");
    }

    #[test]
    fn test_no_candidates_is_missing_output() {
        let err = Translation::from_candidates(vec![], 1, false, &target()).unwrap_err();
        assert_eq!(err, JobError::MissingOutput);
    }

    #[test]
    fn test_finished_job_accessors() {
        let job = Arc::new(Job::new(JobId::new(7), 3, "hallo", 1, 0));
        let finished = FinishedJob::failed(job.clone(), JobError::ShutDown);

        assert_eq!(finished.id(), JobId::new(7));
        assert_eq!(finished.external_id(), 3);
        assert!(!finished.is_ok());
        assert_eq!(finished.text(), None);
        assert_eq!(finished.error(), Some(&JobError::ShutDown));
    }
}
