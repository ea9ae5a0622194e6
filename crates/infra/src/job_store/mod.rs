//! Job Store accessor: atomic create/read/partial-update of job records.
//!
//! The store is a keyed document store. Every write after creation is a
//! [`JobUpdate`] merged into one record atomically, so concurrent writers
//! only ever touch the fields they supply. Conditional updates (a `JobUpdate`
//! with `expected` states) are how the dispatcher, the webhook handler and
//! the deadline sweep avoid overwriting each other.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;

use vendorflow_core::{Job, JobStatus, JobUpdate, RequestId};

pub mod in_memory;
pub mod postgres;

pub use in_memory::InMemoryJobStore;
pub use postgres::PostgresJobStore;

/// Job store error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum JobStoreError {
    #[error("job not found: {0}")]
    NotFound(RequestId),
    #[error("job already exists: {0}")]
    AlreadyExists(RequestId),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("corrupt job record: {0}")]
    Corrupt(String),
}

/// Result of a (possibly conditional) update.
#[derive(Debug, Clone, PartialEq)]
pub enum TransitionOutcome {
    /// The update was merged; carries the job as stored afterwards.
    Applied(Job),
    /// The stored status did not satisfy the update's precondition.
    Rejected { current: JobStatus },
}

impl TransitionOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, TransitionOutcome::Applied(_))
    }
}

/// Per-status job counts.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct JobStats {
    pub pending: usize,
    pub processing: usize,
    pub complete: usize,
    pub failed: usize,
}

impl JobStats {
    pub fn record(&mut self, status: JobStatus, count: usize) {
        match status {
            JobStatus::Pending => self.pending += count,
            JobStatus::Processing => self.processing += count,
            JobStatus::Complete => self.complete += count,
            JobStatus::Failed => self.failed += count,
        }
    }
}

/// Job store abstraction.
#[async_trait::async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new job. Fails with `AlreadyExists` if the id is taken.
    async fn create_job(&self, job: Job) -> Result<(), JobStoreError>;

    /// Get a job by id.
    async fn get_job(&self, request_id: RequestId) -> Result<Option<Job>, JobStoreError>;

    /// Merge `update` into the stored job atomically.
    ///
    /// Honors `update.expected`: when the stored status is not listed, nothing
    /// is written and `Rejected` reports the current status.
    async fn apply_update(
        &self,
        request_id: RequestId,
        update: &JobUpdate,
    ) -> Result<TransitionOutcome, JobStoreError>;

    /// Processing jobs whose callback deadline is before `now`, oldest first.
    async fn list_overdue(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Job>, JobStoreError>;

    /// Per-status counts.
    async fn stats(&self) -> Result<JobStats, JobStoreError>;

    /// Unconditional partial merge of status and, optionally, result/error.
    ///
    /// Fields that are not supplied are left untouched.
    async fn update_status(
        &self,
        request_id: RequestId,
        status: JobStatus,
        result: Option<JsonValue>,
        error: Option<String>,
    ) -> Result<Job, JobStoreError> {
        let update = JobUpdate {
            result,
            error,
            ..JobUpdate::status(status)
        };

        match self.apply_update(request_id, &update).await? {
            TransitionOutcome::Applied(job) => Ok(job),
            TransitionOutcome::Rejected { current } => Err(JobStoreError::Storage(format!(
                "unconditional update rejected while job was {current}"
            ))),
        }
    }
}

#[async_trait::async_trait]
impl<T: JobStore + ?Sized> JobStore for Arc<T> {
    async fn create_job(&self, job: Job) -> Result<(), JobStoreError> {
        (**self).create_job(job).await
    }

    async fn get_job(&self, request_id: RequestId) -> Result<Option<Job>, JobStoreError> {
        (**self).get_job(request_id).await
    }

    async fn apply_update(
        &self,
        request_id: RequestId,
        update: &JobUpdate,
    ) -> Result<TransitionOutcome, JobStoreError> {
        (**self).apply_update(request_id, update).await
    }

    async fn list_overdue(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Job>, JobStoreError> {
        (**self).list_overdue(now, limit).await
    }

    async fn stats(&self) -> Result<JobStats, JobStoreError> {
        (**self).stats().await
    }
}
