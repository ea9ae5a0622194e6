//! Work Queue accessor: durable enqueue/dequeue with consumer-group semantics.
//!
//! One shared append-only stream, read by competing consumers registered in
//! a named group. Each entry is claimed by exactly one consumer at a time and
//! stays in the group's pending set until acknowledged (at-least-once).
//! Entries whose consumer died can be taken over with
//! [`WorkQueue::reclaim_stale`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use vendorflow_core::DomainResult;
use vendorflow_core::wire::QueueMessage;

pub mod in_memory;
#[cfg(feature = "redis")]
pub mod redis_streams;

pub use in_memory::InMemoryWorkQueue;
#[cfg(feature = "redis")]
pub use redis_streams::RedisStreamsWorkQueue;

/// Default stream key for jobs.
pub const DEFAULT_STREAM_KEY: &str = "vendorflow:jobs";

/// Default consumer group.
pub const DEFAULT_GROUP: &str = "vendorflow.workers";

/// Default dead-letter stream key.
pub const DEFAULT_DLQ_KEY: &str = "vendorflow:jobs:dlq";

#[derive(Debug, Clone, thiserror::Error)]
pub enum WorkQueueError {
    #[error("queue connection error: {0}")]
    Connection(String),

    #[error("queue command error: {0}")]
    Command(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("deserialization error: {0}")]
    Deserialization(String),

    #[error("consumer group error: {0}")]
    ConsumerGroup(String),
}

/// Names that identify one consumer on the shared stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueSettings {
    pub stream_key: String,
    pub group: String,
    pub dlq_key: String,
    pub consumer: String,
}

impl QueueSettings {
    pub fn new(consumer: impl Into<String>) -> Self {
        Self {
            stream_key: DEFAULT_STREAM_KEY.to_string(),
            group: DEFAULT_GROUP.to_string(),
            dlq_key: DEFAULT_DLQ_KEY.to_string(),
            consumer: consumer.into(),
        }
    }
}

/// An entry claimed by this consumer.
///
/// The raw stream fields are kept so malformed entries can still be
/// dead-lettered verbatim.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueEntry {
    /// Stream-assigned entry id (e.g. `1714564800000-0`)
    pub entry_id: String,
    /// How many times the entry has been handed to a consumer, this time included
    pub delivery_count: u32,
    pub fields: HashMap<String, String>,
}

impl QueueEntry {
    /// Decode the entry body.
    pub fn message(&self) -> DomainResult<QueueMessage> {
        QueueMessage::from_fields(&self.fields)
    }

    /// The request id field, if present, without validating anything else.
    pub fn raw_request_id(&self) -> Option<&str> {
        self.fields
            .get(vendorflow_core::wire::fields::REQUEST_ID)
            .map(String::as_str)
    }
}

/// Work queue abstraction.
#[async_trait::async_trait]
pub trait WorkQueue: Send + Sync {
    /// Name of the consumer this handle claims entries as.
    fn consumer_name(&self) -> &str;

    /// Append a message. On failure nothing is written.
    async fn enqueue(&self, message: &QueueMessage) -> Result<String, WorkQueueError>;

    /// Claim the next new entry, waiting up to `block` for one to arrive.
    ///
    /// Returns at most one entry per call.
    async fn dequeue(&self, block: Duration) -> Result<Option<QueueEntry>, WorkQueueError>;

    /// Remove an entry from the group's pending set.
    async fn acknowledge(&self, entry: &QueueEntry) -> Result<(), WorkQueueError>;

    /// Take over up to `count` pending entries that have been idle for at
    /// least `min_idle`, whoever owned them.
    async fn reclaim_stale(
        &self,
        min_idle: Duration,
        count: usize,
    ) -> Result<Vec<QueueEntry>, WorkQueueError>;

    /// Copy an entry to the dead-letter stream. Does not acknowledge it.
    async fn dead_letter(&self, entry: &QueueEntry, reason: &str) -> Result<(), WorkQueueError>;

    /// Number of entries in the stream.
    async fn len(&self) -> Result<u64, WorkQueueError>;
}

#[async_trait::async_trait]
impl<T: WorkQueue + ?Sized> WorkQueue for Arc<T> {
    fn consumer_name(&self) -> &str {
        (**self).consumer_name()
    }

    async fn enqueue(&self, message: &QueueMessage) -> Result<String, WorkQueueError> {
        (**self).enqueue(message).await
    }

    async fn dequeue(&self, block: Duration) -> Result<Option<QueueEntry>, WorkQueueError> {
        (**self).dequeue(block).await
    }

    async fn acknowledge(&self, entry: &QueueEntry) -> Result<(), WorkQueueError> {
        (**self).acknowledge(entry).await
    }

    async fn reclaim_stale(
        &self,
        min_idle: Duration,
        count: usize,
    ) -> Result<Vec<QueueEntry>, WorkQueueError> {
        (**self).reclaim_stale(min_idle, count).await
    }

    async fn dead_letter(&self, entry: &QueueEntry, reason: &str) -> Result<(), WorkQueueError> {
        (**self).dead_letter(entry, reason).await
    }

    async fn len(&self) -> Result<u64, WorkQueueError> {
        (**self).len().await
    }
}
