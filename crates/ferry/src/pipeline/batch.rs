use std::sync::Arc;

use uuid::Uuid;

use crate::job::{Candidate, Job, JobId};

/// # Batch
///
/// The unit of work a worker hands to its pipeline: the jobs it took from the
/// input queue in one go, oldest first. Each batch carries a random id so its
/// jobs can be correlated in logs.
#[derive(Debug, Clone)]
pub struct Batch {
    id: Uuid,
    jobs: Vec<Arc<Job>>,
}

impl Batch {
    pub fn new(jobs: Vec<Arc<Job>>) -> Self {
        Self {
            id: Uuid::new_v4(),
            jobs,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn jobs(&self) -> &[Arc<Job>] {
        &self.jobs
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Whether `id` belongs to this batch.
    pub fn contains(&self, id: JobId) -> bool {
        self.jobs.iter().any(|job| job.id() == id)
    }
}

/// The candidates a pipeline produced for one job.
#[derive(Debug, Clone, PartialEq)]
pub struct JobOutput {
    pub id: JobId,
    pub candidates: Vec<Candidate>,
}

impl JobOutput {
    pub fn new(id: JobId, candidates: Vec<Candidate>) -> Self {
        Self { id, candidates }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_preserves_order_and_membership() {
        let jobs: Vec<_> = (1..=3)
            .map(|id| Arc::new(Job::new(JobId::new(id), 0, "x", 1, 0)))
            .collect();
        let batch = Batch::new(jobs);

        assert_eq!(batch.len(), 3);
        assert_eq!(batch.jobs()[0].id(), JobId::new(1));
        assert!(batch.contains(JobId::new(2)));
        assert!(!batch.contains(JobId::new(4)));
    }

    #[test]
    fn test_batches_get_distinct_ids() {
        assert_ne!(Batch::new(vec![]).id(), Batch::new(vec![]).id());
    }
}
