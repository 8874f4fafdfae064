//! In-memory job store.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::Utc;

use super::{CreateJobRequest, Job, JobError, JobFilter, JobStore, JobUpdate};

/// Job store backed by a map; state is lost on restart.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<String, Job>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn poisoned() -> JobError {
        JobError::Database("job map lock poisoned".to_string())
    }

    fn matching(&self, filter: &JobFilter) -> Result<Vec<Job>, JobError> {
        let jobs = self.jobs.read().map_err(|_| Self::poisoned())?;
        let mut matched: Vec<Job> = jobs
            .values()
            .filter(|job| filter.state.is_none_or(|s| job.state == s))
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(matched)
    }
}

impl JobStore for InMemoryJobStore {
    fn create(&self, request: CreateJobRequest) -> Result<Job, JobError> {
        let job = Job::new(uuid::Uuid::new_v4().to_string(), request.reference, Utc::now());
        self.jobs
            .write()
            .map_err(|_| Self::poisoned())?
            .insert(job.id.clone(), job.clone());
        Ok(job)
    }

    fn get(&self, id: &str) -> Result<Option<Job>, JobError> {
        let jobs = self.jobs.read().map_err(|_| Self::poisoned())?;
        Ok(jobs.get(id).cloned())
    }

    fn list(&self, filter: &JobFilter) -> Result<Vec<Job>, JobError> {
        let offset = filter.offset.max(0) as usize;
        let limit = filter.limit.max(0) as usize;
        Ok(self
            .matching(filter)?
            .into_iter()
            .skip(offset)
            .take(limit)
            .collect())
    }

    fn count(&self, filter: &JobFilter) -> Result<i64, JobError> {
        Ok(self.matching(filter)?.len() as i64)
    }

    fn update(&self, id: &str, update: JobUpdate) -> Result<Job, JobError> {
        let mut jobs = self.jobs.write().map_err(|_| Self::poisoned())?;
        let current = jobs
            .get_mut(id)
            .ok_or_else(|| JobError::NotFound(id.to_string()))?;
        let next = current.apply(&update, Utc::now())?;
        *current = next.clone();
        Ok(next)
    }
}
