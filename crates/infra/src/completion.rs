//! Webhook completion: finalizes callback jobs when the vendor reports back.
//!
//! Only a `processing` job accepts a completion. The write is conditional, so
//! it cannot overwrite a failure recorded by the dispatcher or the deadline
//! sweep, and a duplicate callback for a completed job is a no-op.

use serde_json::Value as JsonValue;
use tracing::{info, instrument};

use vendorflow_core::wire::WebhookCallback;
use vendorflow_core::{Job, JobStatus, JobUpdate, RequestId};

use crate::job_store::{JobStore, JobStoreError, TransitionOutcome};

#[derive(Debug, Clone, PartialEq)]
pub enum CompletionOutcome {
    /// The result was stored; carries the finalized job.
    Completed(Job),
    /// The job was already complete; nothing was written.
    AlreadyComplete,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum CompletionError {
    #[error("invalid job id: {0}")]
    InvalidJobId(String),

    #[error("job not found: {0}")]
    NotFound(RequestId),

    #[error("job is {current}, not awaiting a callback")]
    NotProcessing { current: JobStatus },

    #[error(transparent)]
    Store(JobStoreError),
}

#[derive(Debug, Clone)]
pub struct CompletionHandler<S> {
    store: S,
}

impl<S: JobStore> CompletionHandler<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Store `data` verbatim as the job's result and mark it complete.
    #[instrument(skip_all, fields(request_id = %request_id))]
    pub async fn complete(
        &self,
        request_id: RequestId,
        data: JsonValue,
    ) -> Result<CompletionOutcome, CompletionError> {
        let update = JobUpdate::complete(data).guarded();

        match self.store.apply_update(request_id, &update).await {
            Ok(TransitionOutcome::Applied(job)) => {
                info!("job completed by vendor callback");
                Ok(CompletionOutcome::Completed(job))
            }
            Ok(TransitionOutcome::Rejected {
                current: JobStatus::Complete,
            }) => Ok(CompletionOutcome::AlreadyComplete),
            Ok(TransitionOutcome::Rejected { current }) => {
                Err(CompletionError::NotProcessing { current })
            }
            Err(JobStoreError::NotFound(id)) => Err(CompletionError::NotFound(id)),
            Err(e) => Err(CompletionError::Store(e)),
        }
    }

    /// Complete from a raw webhook body.
    pub async fn handle_callback(
        &self,
        callback: WebhookCallback,
    ) -> Result<CompletionOutcome, CompletionError> {
        let request_id = callback
            .job_id
            .parse::<RequestId>()
            .map_err(|_| CompletionError::InvalidJobId(callback.job_id.clone()))?;
        self.complete(request_id, callback.data).await
    }
}
