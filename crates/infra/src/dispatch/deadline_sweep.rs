//! Fails callback jobs whose vendor never called back.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{error, info, warn};

use vendorflow_core::{JobStatus, JobUpdate};

use super::{WorkerHandle, shutdown_requested};
use crate::job_store::{JobStore, JobStoreError, TransitionOutcome};

pub const DEADLINE_EXCEEDED: &str = "vendor callback deadline exceeded";

pub struct DeadlineSweeper<S> {
    store: S,
    interval: Duration,
    batch: usize,
}

impl<S: JobStore + 'static> DeadlineSweeper<S> {
    pub fn new(store: S, interval: Duration) -> Self {
        Self {
            store,
            interval,
            batch: 100,
        }
    }

    pub fn with_batch(mut self, batch: usize) -> Self {
        self.batch = batch.max(1);
        self
    }

    /// Fail every overdue job, one batch at a time. Returns how many were failed.
    ///
    /// Each write only applies to a job still in `processing`, so a webhook
    /// that lands first keeps its result.
    pub async fn sweep_once(&self, now: DateTime<Utc>) -> Result<usize, JobStoreError> {
        let mut failed = 0;

        loop {
            let overdue = self.store.list_overdue(now, self.batch).await?;
            let listed = overdue.len();
            let mut progressed = false;

            for job in overdue {
                let update = JobUpdate::failed(DEADLINE_EXCEEDED)
                    .only_from(&[JobStatus::Processing]);
                match self.store.apply_update(job.request_id, &update).await {
                    Ok(TransitionOutcome::Applied(_)) => {
                        warn!(request_id = %job.request_id, "callback deadline passed, job failed");
                        failed += 1;
                        progressed = true;
                    }
                    Ok(TransitionOutcome::Rejected { .. }) | Err(JobStoreError::NotFound(_)) => {
                        progressed = true;
                    }
                    Err(e) => return Err(e),
                }
            }

            if listed < self.batch || !progressed {
                return Ok(failed);
            }
        }
    }

    pub fn spawn(self) -> WorkerHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let join = tokio::spawn(async move {
            info!(interval_ms = self.interval.as_millis() as u64, "deadline sweep started");
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = shutdown_requested(&mut shutdown_rx) => break,
                    _ = ticker.tick() => {}
                }

                if let Err(e) = self.sweep_once(Utc::now()).await {
                    error!(error = %e, "deadline sweep failed");
                }
            }

            info!("deadline sweep stopped");
        });

        WorkerHandle::new("deadline-sweep", shutdown_tx, join)
    }
}
