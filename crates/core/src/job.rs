//! Job record and its lifecycle state machine.
//!
//! ```text
//! pending ──► processing ──► complete
//!    │            │  ▲
//!    │            └──┘ (redelivered entry)
//!    └────────────┴────► failed
//! ```
//!
//! `complete` and `failed` are terminal. Writers never replace a whole job:
//! every write is a [`JobUpdate`] merged into the stored record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::channel::VendorChannel;
use crate::id::RequestId;

/// Job execution status.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Accepted at intake, waiting in the queue
    Pending,
    /// Claimed by a dispatcher; for callback vendors, waiting for the webhook
    Processing,
    /// Result recorded
    Complete,
    /// Error recorded
    Failed,
}

impl JobStatus {
    pub const ALL: [JobStatus; 4] = [
        JobStatus::Pending,
        JobStatus::Processing,
        JobStatus::Complete,
        JobStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Complete => "complete",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Complete | JobStatus::Failed)
    }

    /// Whether the lifecycle allows moving from `self` to `next`.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Pending, Processing)
                | (Pending, Failed)
                | (Processing, Processing)
                | (Processing, Complete)
                | (Processing, Failed)
        )
    }

    /// All states that may legally move into `target`.
    pub fn predecessors(target: JobStatus) -> Vec<JobStatus> {
        Self::ALL
            .into_iter()
            .filter(|s| s.can_transition_to(target))
            .collect()
    }
}

impl core::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for JobStatus {
    type Err = crate::DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|st| st.as_str() == s)
            .ok_or_else(|| crate::DomainError::validation(format!("unknown job status '{s}'")))
    }
}

/// A tracked unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub request_id: RequestId,
    pub status: JobStatus,
    /// Original request payload, immutable after creation
    pub payload: JsonValue,
    /// Present once the job is complete
    pub result: Option<JsonValue>,
    /// Present once the job has failed
    pub error: Option<String>,
    /// Channel chosen at intake, when known
    pub vendor_channel: Option<VendorChannel>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Latest time a callback vendor may deliver its result
    pub deadline_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Create a new pending job.
    pub fn new(
        request_id: RequestId,
        payload: JsonValue,
        vendor_channel: Option<VendorChannel>,
    ) -> Self {
        let now = Utc::now();
        Self {
            request_id,
            status: JobStatus::Pending,
            payload,
            result: None,
            error: None,
            vendor_channel,
            created_at: now,
            updated_at: now,
            deadline_at: None,
        }
    }

    /// Merge a partial update into this record.
    ///
    /// Only the fields the update carries are written. `updated_at` never
    /// moves backwards. Preconditions are the caller's concern
    /// (see [`JobUpdate::permits`]).
    pub fn apply(&mut self, update: &JobUpdate, now: DateTime<Utc>) {
        self.status = update.status;
        if let Some(result) = &update.result {
            self.result = Some(result.clone());
        }
        if let Some(error) = &update.error {
            self.error = Some(error.clone());
        }
        if let Some(deadline) = update.deadline_at {
            self.deadline_at = Some(deadline);
        }
        self.updated_at = self.updated_at.max(now);
    }

    /// A processing job whose callback deadline has passed.
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.status == JobStatus::Processing && self.deadline_at.is_some_and(|d| d < now)
    }
}

/// Partial update of a job record.
///
/// `expected` turns the write into a conditional one: it only applies when
/// the stored status is one of the listed states.
#[derive(Debug, Clone, PartialEq)]
pub struct JobUpdate {
    pub status: JobStatus,
    pub result: Option<JsonValue>,
    pub error: Option<String>,
    pub deadline_at: Option<DateTime<Utc>>,
    pub expected: Option<Vec<JobStatus>>,
}

impl JobUpdate {
    /// Status-only update.
    pub fn status(status: JobStatus) -> Self {
        Self {
            status,
            result: None,
            error: None,
            deadline_at: None,
            expected: None,
        }
    }

    pub fn complete(result: JsonValue) -> Self {
        Self::status(JobStatus::Complete).with_result(result)
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self::status(JobStatus::Failed).with_error(error)
    }

    pub fn with_result(mut self, result: JsonValue) -> Self {
        self.result = Some(result);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_deadline(mut self, deadline: DateTime<Utc>) -> Self {
        self.deadline_at = Some(deadline);
        self
    }

    /// Only apply when the stored status is one of `states`.
    pub fn only_from(mut self, states: &[JobStatus]) -> Self {
        self.expected = Some(states.to_vec());
        self
    }

    /// Only apply when the state machine allows the move.
    pub fn guarded(self) -> Self {
        let states = JobStatus::predecessors(self.status);
        self.only_from(&states)
    }

    /// Whether this update may be applied on top of `current`.
    pub fn permits(&self, current: JobStatus) -> bool {
        self.expected
            .as_ref()
            .is_none_or(|states| states.contains(&current))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn new_job() -> Job {
        Job::new(RequestId::new(), json!({"x": 1}), Some(VendorChannel::Sync))
    }

    #[test]
    fn terminal_states_have_no_exits() {
        for from in [JobStatus::Complete, JobStatus::Failed] {
            for to in JobStatus::ALL {
                assert!(!from.can_transition_to(to), "{from} -> {to} must be rejected");
            }
        }
    }

    #[test]
    fn nothing_returns_to_pending() {
        for from in JobStatus::ALL {
            assert!(!from.can_transition_to(JobStatus::Pending));
        }
    }

    #[test]
    fn only_processing_completes() {
        assert_eq!(
            JobStatus::predecessors(JobStatus::Complete),
            vec![JobStatus::Processing]
        );
    }

    #[test]
    fn status_only_update_keeps_result() {
        let mut job = new_job();
        job.apply(&JobUpdate::status(JobStatus::Processing), Utc::now());
        job.apply(&JobUpdate::complete(json!({"r": 1})), Utc::now());

        job.apply(&JobUpdate::status(JobStatus::Complete), Utc::now());
        assert_eq!(job.result, Some(json!({"r": 1})));
        assert_eq!(job.payload, json!({"x": 1}));
    }

    #[test]
    fn updated_at_is_monotonic() {
        let mut job = new_job();
        let before = job.updated_at;
        let earlier = before - chrono::Duration::seconds(30);

        job.apply(&JobUpdate::status(JobStatus::Processing), earlier);
        assert_eq!(job.updated_at, before);
    }

    #[test]
    fn guarded_update_checks_current_state() {
        let update = JobUpdate::complete(json!({})).guarded();
        assert!(update.permits(JobStatus::Processing));
        assert!(!update.permits(JobStatus::Pending));
        assert!(!update.permits(JobStatus::Complete));

        let unconditional = JobUpdate::failed("boom");
        assert!(unconditional.permits(JobStatus::Complete));
    }

    #[test]
    fn overdue_requires_processing_and_past_deadline() {
        let now = Utc::now();
        let mut job = new_job();
        job.apply(
            &JobUpdate::status(JobStatus::Processing).with_deadline(now - chrono::Duration::seconds(1)),
            now,
        );
        assert!(job.is_overdue(now));

        job.apply(&JobUpdate::complete(json!({})), now);
        assert!(!job.is_overdue(now));
    }

    #[test]
    fn status_serializes_snake_case() {
        assert_eq!(serde_json::to_value(JobStatus::Processing).unwrap(), json!("processing"));
        assert_eq!("failed".parse::<JobStatus>().unwrap(), JobStatus::Failed);
    }
}
