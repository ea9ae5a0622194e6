//! Redis Streams-backed work queue (durable, at-least-once delivery).
//!
//! - **Stream Key**: `vendorflow:jobs` (single stream for all jobs)
//! - **Consumer Group**: `vendorflow.workers` (all worker processes)
//! - **Consumers**: one named consumer per worker process (e.g. `worker-1`)
//! - **Dead-Letter Queue**: `vendorflow:jobs:dlq`
//!
//! Commands: XADD to enqueue, XREADGROUP `COUNT 1 BLOCK` to claim, XACK to
//! acknowledge, XPENDING + XCLAIM to take over entries from dead consumers.
//!
//! The `redis` client used here is synchronous; every command runs on the
//! blocking thread pool so a `BLOCK` read never stalls the async runtime.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, instrument, warn};

use vendorflow_core::wire::QueueMessage;

use super::{QueueEntry, QueueSettings, WorkQueue, WorkQueueError};

#[derive(Debug, Clone)]
pub struct RedisStreamsWorkQueue {
    client: Arc<redis::Client>,
    settings: QueueSettings,
}

impl RedisStreamsWorkQueue {
    /// Create a queue handle. Does not touch the network.
    ///
    /// # Arguments
    ///
    /// * `redis_url` - Redis connection URL (e.g., "redis://localhost:6379")
    /// * `settings` - stream, group, DLQ and consumer names
    pub fn new(redis_url: impl AsRef<str>, settings: QueueSettings) -> Result<Self, WorkQueueError> {
        let client = redis::Client::open(redis_url.as_ref())
            .map_err(|e| WorkQueueError::Connection(e.to_string()))?;

        Ok(Self {
            client: Arc::new(client),
            settings,
        })
    }

    /// Create a handle and register the consumer group (startup check).
    pub async fn connect(
        redis_url: impl AsRef<str>,
        settings: QueueSettings,
    ) -> Result<Self, WorkQueueError> {
        let queue = Self::new(redis_url, settings)?;
        queue.run_blocking(|q| q.ensure_consumer_group_sync()).await?;
        Ok(queue)
    }

    pub fn settings(&self) -> &QueueSettings {
        &self.settings
    }

    async fn run_blocking<T, F>(&self, f: F) -> Result<T, WorkQueueError>
    where
        T: Send + 'static,
        F: FnOnce(&RedisStreamsWorkQueue) -> Result<T, WorkQueueError> + Send + 'static,
    {
        let this = self.clone();
        tokio::task::spawn_blocking(move || f(&this))
            .await
            .map_err(|e| WorkQueueError::Command(format!("blocking task failed: {e}")))?
    }

    fn connection(&self) -> Result<redis::Connection, WorkQueueError> {
        self.client
            .get_connection()
            .map_err(|e| WorkQueueError::Connection(e.to_string()))
    }

    /// Ensure the consumer group exists (idempotent).
    ///
    /// MKSTREAM creates the stream if needed; starting at "0" lets a fresh
    /// group see entries written before it existed.
    fn ensure_consumer_group_sync(&self) -> Result<(), WorkQueueError> {
        let mut conn = self.connection()?;

        let created: redis::RedisResult<String> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.settings.stream_key)
            .arg(&self.settings.group)
            .arg("0")
            .arg("MKSTREAM")
            .query(&mut conn);

        match created {
            Ok(_) => Ok(()),
            Err(e) if e.to_string().contains("BUSYGROUP") => Ok(()),
            Err(e) => Err(WorkQueueError::ConsumerGroup(e.to_string())),
        }
    }

    #[instrument(
        skip(self, pairs),
        fields(stream_key = %self.settings.stream_key),
        err
    )]
    fn enqueue_sync(&self, pairs: Vec<(&'static str, String)>) -> Result<String, WorkQueueError> {
        let mut conn = self.connection()?;

        let mut cmd = redis::cmd("XADD");
        cmd.arg(&self.settings.stream_key).arg("*");
        for (name, value) in &pairs {
            cmd.arg(*name).arg(value);
        }

        cmd.query(&mut conn)
            .map_err(|e| WorkQueueError::Command(format!("XADD failed: {}", e)))
    }

    fn read_new_sync(&self, block_ms: u64) -> Result<Option<QueueEntry>, WorkQueueError> {
        let mut conn = self.connection()?;

        // ">" asks for entries never delivered to any consumer of the group.
        let reply: redis::Value = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(&self.settings.group)
            .arg(&self.settings.consumer)
            .arg("COUNT")
            .arg(1)
            .arg("BLOCK")
            .arg(block_ms.max(1))
            .arg("STREAMS")
            .arg(&self.settings.stream_key)
            .arg(">")
            .query(&mut conn)
            .map_err(|e| WorkQueueError::Command(format!("XREADGROUP failed: {}", e)))?;

        // Reply: nil on timeout, else [[stream_key, [[id, [field, value, ...]], ...]]]
        let streams = match reply {
            redis::Value::Nil => return Ok(None),
            redis::Value::Bulk(streams) => streams,
            _ => {
                return Err(WorkQueueError::Deserialization(
                    "unexpected XREADGROUP reply".to_string(),
                ));
            }
        };

        for stream in streams {
            let redis::Value::Bulk(pair) = stream else { continue };
            let Some(redis::Value::Bulk(entries)) = pair.into_iter().nth(1) else {
                continue;
            };
            if let Some(entry) = entries.into_iter().next() {
                let (entry_id, fields) = parse_stream_entry(entry)?;
                return Ok(Some(QueueEntry {
                    entry_id,
                    delivery_count: 1,
                    fields,
                }));
            }
        }

        Ok(None)
    }

    fn acknowledge_sync(&self, entry_id: &str) -> Result<(), WorkQueueError> {
        let mut conn = self.connection()?;

        let _: u64 = redis::cmd("XACK")
            .arg(&self.settings.stream_key)
            .arg(&self.settings.group)
            .arg(entry_id)
            .query(&mut conn)
            .map_err(|e| WorkQueueError::Command(format!("XACK failed: {}", e)))?;

        Ok(())
    }

    fn reclaim_stale_sync(
        &self,
        min_idle_ms: u64,
        count: usize,
    ) -> Result<Vec<QueueEntry>, WorkQueueError> {
        let mut conn = self.connection()?;

        // XPENDING summary rows: (id, owner, idle ms, delivery count)
        let pending: Vec<(String, String, u64, u64)> = redis::cmd("XPENDING")
            .arg(&self.settings.stream_key)
            .arg(&self.settings.group)
            .arg("-")
            .arg("+")
            .arg(count.max(1))
            .query(&mut conn)
            .map_err(|e| WorkQueueError::Command(format!("XPENDING failed: {}", e)))?;

        let stale: HashMap<String, u64> = pending
            .into_iter()
            .filter(|(_, _, idle_ms, _)| *idle_ms >= min_idle_ms)
            .map(|(id, _, _, deliveries)| (id, deliveries))
            .collect();

        if stale.is_empty() {
            return Ok(vec![]);
        }

        let ids: Vec<&String> = stale.keys().collect();

        // XCLAIM re-checks idle time, so a consumer that acked meanwhile keeps its entry.
        let claimed: Vec<redis::Value> = redis::cmd("XCLAIM")
            .arg(&self.settings.stream_key)
            .arg(&self.settings.group)
            .arg(&self.settings.consumer)
            .arg(min_idle_ms)
            .arg(&ids[..])
            .query(&mut conn)
            .map_err(|e| WorkQueueError::Command(format!("XCLAIM failed: {}", e)))?;

        let mut entries = Vec::new();
        for value in claimed {
            // Entries trimmed from the stream come back as nil.
            if value == redis::Value::Nil {
                continue;
            }
            match parse_stream_entry(value) {
                Ok((entry_id, fields)) => {
                    let previous = stale.get(&entry_id).copied().unwrap_or(0);
                    entries.push(QueueEntry {
                        entry_id,
                        delivery_count: u32::try_from(previous + 1).unwrap_or(u32::MAX),
                        fields,
                    });
                }
                Err(e) => warn!(error = %e, "skipping unparseable claimed entry"),
            }
        }

        debug!(claimed = entries.len(), "reclaimed stale entries");
        Ok(entries)
    }

    fn dead_letter_sync(&self, entry: &QueueEntry, reason: &str) -> Result<(), WorkQueueError> {
        let mut conn = self.connection()?;

        let mut cmd = redis::cmd("XADD");
        cmd.arg(&self.settings.dlq_key)
            .arg("*")
            .arg("original_entry_id")
            .arg(&entry.entry_id)
            .arg("delivery_count")
            .arg(entry.delivery_count)
            .arg("reason")
            .arg(reason)
            .arg("failed_at")
            .arg(chrono::Utc::now().to_rfc3339());
        for (name, value) in &entry.fields {
            cmd.arg(name).arg(value);
        }

        let _: String = cmd
            .query(&mut conn)
            .map_err(|e| WorkQueueError::Command(format!("DLQ XADD failed: {}", e)))?;

        warn!(
            entry_id = %entry.entry_id,
            delivery_count = entry.delivery_count,
            reason,
            "entry sent to dead-letter queue"
        );

        Ok(())
    }

    fn len_sync(&self) -> Result<u64, WorkQueueError> {
        let mut conn = self.connection()?;
        redis::cmd("XLEN")
            .arg(&self.settings.stream_key)
            .query(&mut conn)
            .map_err(|e| WorkQueueError::Command(format!("XLEN failed: {}", e)))
    }
}

#[async_trait::async_trait]
impl WorkQueue for RedisStreamsWorkQueue {
    fn consumer_name(&self) -> &str {
        &self.settings.consumer
    }

    async fn enqueue(&self, message: &QueueMessage) -> Result<String, WorkQueueError> {
        let fields = message
            .to_fields()
            .map_err(|e| WorkQueueError::Serialization(e.to_string()))?;
        self.run_blocking(move |q| q.enqueue_sync(fields)).await
    }

    async fn dequeue(&self, block: Duration) -> Result<Option<QueueEntry>, WorkQueueError> {
        let block_ms = u64::try_from(block.as_millis()).unwrap_or(u64::MAX);
        self.run_blocking(move |q| q.read_new_sync(block_ms)).await
    }

    async fn acknowledge(&self, entry: &QueueEntry) -> Result<(), WorkQueueError> {
        let entry_id = entry.entry_id.clone();
        self.run_blocking(move |q| q.acknowledge_sync(&entry_id)).await
    }

    async fn reclaim_stale(
        &self,
        min_idle: Duration,
        count: usize,
    ) -> Result<Vec<QueueEntry>, WorkQueueError> {
        let min_idle_ms = u64::try_from(min_idle.as_millis()).unwrap_or(u64::MAX);
        self.run_blocking(move |q| q.reclaim_stale_sync(min_idle_ms, count))
            .await
    }

    async fn dead_letter(&self, entry: &QueueEntry, reason: &str) -> Result<(), WorkQueueError> {
        let entry = entry.clone();
        let reason = reason.to_string();
        self.run_blocking(move |q| q.dead_letter_sync(&entry, &reason))
            .await
    }

    async fn len(&self) -> Result<u64, WorkQueueError> {
        self.run_blocking(|q| q.len_sync()).await
    }
}

/// Parse a Redis stream entry: `[entry_id, [field1, value1, field2, value2, ...]]`.
fn parse_stream_entry(
    entry: redis::Value,
) -> Result<(String, HashMap<String, String>), WorkQueueError> {
    let entry_vec: Vec<redis::Value> = match entry {
        redis::Value::Bulk(v) => v,
        _ => return Err(WorkQueueError::Deserialization("Invalid entry format".to_string())),
    };

    if entry_vec.len() < 2 {
        return Err(WorkQueueError::Deserialization("Entry too short".to_string()));
    }

    let entry_id = match &entry_vec[0] {
        redis::Value::Data(data) => String::from_utf8_lossy(data).to_string(),
        redis::Value::Status(s) => s.clone(),
        _ => return Err(WorkQueueError::Deserialization("Invalid entry ID format".to_string())),
    };

    let fields_vec = match &entry_vec[1] {
        redis::Value::Bulk(v) => v,
        _ => return Err(WorkQueueError::Deserialization("Invalid fields format".to_string())),
    };

    let mut fields = HashMap::new();
    for chunk in fields_vec.chunks(2) {
        if let [redis::Value::Data(key), redis::Value::Data(value)] = chunk {
            fields.insert(
                String::from_utf8_lossy(key).to_string(),
                String::from_utf8_lossy(value).to_string(),
            );
        }
    }

    Ok((entry_id, fields))
}
