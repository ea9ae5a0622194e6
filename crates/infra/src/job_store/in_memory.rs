//! In-memory job store for tests and single-process dev mode.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};

use vendorflow_core::{Job, JobUpdate, RequestId};

use super::{JobStats, JobStore, JobStoreError, TransitionOutcome};

/// In-memory job store.
///
/// A single write lock per update gives the same per-document atomicity a
/// real document store provides.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<RequestId, Job>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<RequestId, Job>>, JobStoreError> {
        self.jobs
            .read()
            .map_err(|_| JobStoreError::Storage("job map lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<RequestId, Job>>, JobStoreError> {
        self.jobs
            .write()
            .map_err(|_| JobStoreError::Storage("job map lock poisoned".to_string()))
    }
}

#[async_trait::async_trait]
impl JobStore for InMemoryJobStore {
    async fn create_job(&self, job: Job) -> Result<(), JobStoreError> {
        let mut jobs = self.write()?;
        if jobs.contains_key(&job.request_id) {
            return Err(JobStoreError::AlreadyExists(job.request_id));
        }
        jobs.insert(job.request_id, job);
        Ok(())
    }

    async fn get_job(&self, request_id: RequestId) -> Result<Option<Job>, JobStoreError> {
        Ok(self.read()?.get(&request_id).cloned())
    }

    async fn apply_update(
        &self,
        request_id: RequestId,
        update: &JobUpdate,
    ) -> Result<TransitionOutcome, JobStoreError> {
        let mut jobs = self.write()?;
        let job = jobs
            .get_mut(&request_id)
            .ok_or(JobStoreError::NotFound(request_id))?;

        if !update.permits(job.status) {
            return Ok(TransitionOutcome::Rejected {
                current: job.status,
            });
        }

        job.apply(update, Utc::now());
        Ok(TransitionOutcome::Applied(job.clone()))
    }

    async fn list_overdue(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Job>, JobStoreError> {
        let jobs = self.read()?;
        let mut overdue: Vec<_> = jobs.values().filter(|j| j.is_overdue(now)).cloned().collect();

        overdue.sort_by_key(|j| j.deadline_at);
        overdue.truncate(limit);
        Ok(overdue)
    }

    async fn stats(&self) -> Result<JobStats, JobStoreError> {
        let jobs = self.read()?;
        let mut stats = JobStats::default();
        for job in jobs.values() {
            stats.record(job.status, 1);
        }
        Ok(stats)
    }
}
