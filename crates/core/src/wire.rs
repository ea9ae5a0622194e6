//! Wire shapes exchanged with the queue, vendors, webhooks and intake callers.

use std::collections::HashMap;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::channel::VendorChannel;
use crate::error::{DomainError, DomainResult};
use crate::id::RequestId;
use crate::job::{Job, JobStatus};

// -------------------------
// Queue
// -------------------------

/// Field names of a queue entry on the stream.
pub mod fields {
    pub const REQUEST_ID: &str = "request_id";
    pub const PAYLOAD: &str = "payload";
    pub const VENDOR_TYPE: &str = "vendor_type";
    pub const TIMESTAMP: &str = "timestamp";
}

/// Decoded body of a queue entry.
///
/// On the stream it is a flat string map: the payload travels as serialized
/// JSON text and the timestamp as fractional Unix seconds.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueMessage {
    pub request_id: RequestId,
    pub payload: JsonValue,
    pub channel: VendorChannel,
    pub enqueued_at: DateTime<Utc>,
}

impl QueueMessage {
    pub fn new(request_id: RequestId, payload: JsonValue, channel: VendorChannel) -> Self {
        Self {
            request_id,
            payload,
            channel,
            enqueued_at: Utc::now(),
        }
    }

    /// Flatten into stream fields.
    pub fn to_fields(&self) -> DomainResult<Vec<(&'static str, String)>> {
        let payload = serde_json::to_string(&self.payload)
            .map_err(|e| DomainError::validation(format!("payload is not serializable: {e}")))?;
        let secs = self.enqueued_at.timestamp_micros() as f64 / 1_000_000.0;

        Ok(vec![
            (fields::REQUEST_ID, self.request_id.to_string()),
            (fields::PAYLOAD, payload),
            (fields::VENDOR_TYPE, self.channel.as_str().to_string()),
            (fields::TIMESTAMP, format!("{secs:.6}")),
        ])
    }

    /// Rebuild from stream fields.
    pub fn from_fields(map: &HashMap<String, String>) -> DomainResult<Self> {
        let get = |name: &str| {
            map.get(name)
                .ok_or_else(|| DomainError::validation(format!("missing field '{name}'")))
        };

        let request_id = get(fields::REQUEST_ID)?.parse::<RequestId>()?;
        let payload = serde_json::from_str(get(fields::PAYLOAD)?)
            .map_err(|e| DomainError::validation(format!("payload is not valid JSON: {e}")))?;
        let channel = get(fields::VENDOR_TYPE)?.parse::<VendorChannel>()?;
        let enqueued_at = map
            .get(fields::TIMESTAMP)
            .and_then(|raw| parse_timestamp(raw))
            .unwrap_or_else(Utc::now);

        Ok(Self {
            request_id,
            payload,
            channel,
            enqueued_at,
        })
    }
}

/// Unix seconds (fractional) or RFC 3339.
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(secs) = raw.parse::<f64>() {
        let micros = (secs * 1_000_000.0).round() as i64;
        return Utc.timestamp_micros(micros).single();
    }
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

// -------------------------
// Vendors
// -------------------------

/// Body POSTed to a vendor's `/process` endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VendorRequest {
    pub job_id: String,
    pub payload: JsonValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,
}

/// Response of an immediate-completion vendor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VendorSyncResponse {
    pub success: bool,
    #[serde(default)]
    pub data: Option<JsonValue>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Callback delivered by a callback vendor once work is done.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookCallback {
    pub job_id: String,
    pub data: JsonValue,
}

// -------------------------
// Intake
// -------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateJobRequest {
    pub payload: JsonValue,
    #[serde(default)]
    pub vendor_type: Option<VendorChannel>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateJobResponse {
    pub request_id: RequestId,
}

/// Status view rendered by the intake GET path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatusResponse {
    pub status: JobStatus,
    pub result: Option<JsonValue>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Job> for JobStatusResponse {
    fn from(job: &Job) -> Self {
        Self {
            status: job.status,
            result: job.result.clone(),
            error: job.error.clone(),
            created_at: job.created_at,
            updated_at: job.updated_at,
        }
    }
}
