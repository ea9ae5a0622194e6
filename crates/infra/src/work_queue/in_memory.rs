//! In-memory work queue with consumer-group semantics.
//!
//! Handles created with [`InMemoryWorkQueue::consumer`] share one log and one
//! pending set, so several of them behave like competing consumers in the
//! same group.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;

use vendorflow_core::wire::QueueMessage;

use super::{QueueEntry, WorkQueue, WorkQueueError};

#[derive(Debug)]
struct PendingEntry {
    fields: HashMap<String, String>,
    consumer: String,
    claimed_at: Instant,
    deliveries: u32,
}

/// A dead-lettered entry.
#[derive(Debug, Clone, PartialEq)]
pub struct DeadLetter {
    pub entry_id: String,
    pub reason: String,
    pub fields: HashMap<String, String>,
}

#[derive(Debug, Default)]
struct State {
    next_seq: u64,
    undelivered: VecDeque<(String, HashMap<String, String>)>,
    pending: BTreeMap<String, PendingEntry>,
    dead_letters: Vec<DeadLetter>,
}

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<State>,
    arrivals: Notify,
}

#[derive(Debug, Clone)]
pub struct InMemoryWorkQueue {
    shared: Arc<Shared>,
    consumer: String,
}

impl InMemoryWorkQueue {
    pub fn new(consumer: impl Into<String>) -> Self {
        Self {
            shared: Arc::new(Shared::default()),
            consumer: consumer.into(),
        }
    }

    /// Another consumer in the same group, sharing this queue's log.
    pub fn consumer(&self, name: impl Into<String>) -> Self {
        Self {
            shared: self.shared.clone(),
            consumer: name.into(),
        }
    }

    /// Entries claimed but not yet acknowledged, across all consumers.
    pub fn pending_count(&self) -> usize {
        self.lock().map(|s| s.pending.len()).unwrap_or(0)
    }

    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.lock().map(|s| s.dead_letters.clone()).unwrap_or_default()
    }

    /// Append raw fields, bypassing message encoding (for malformed-entry tests).
    pub fn push_raw(&self, fields: HashMap<String, String>) -> Result<String, WorkQueueError> {
        let id = {
            let mut state = self.lock()?;
            state.next_seq += 1;
            let id = format!("{}-0", state.next_seq);
            state.undelivered.push_back((id.clone(), fields));
            id
        };
        self.shared.arrivals.notify_one();
        Ok(id)
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>, WorkQueueError> {
        self.shared
            .state
            .lock()
            .map_err(|_| WorkQueueError::Command("queue lock poisoned".to_string()))
    }

    fn try_claim(&self) -> Result<Option<QueueEntry>, WorkQueueError> {
        let mut state = self.lock()?;
        let Some((entry_id, fields)) = state.undelivered.pop_front() else {
            return Ok(None);
        };

        state.pending.insert(
            entry_id.clone(),
            PendingEntry {
                fields: fields.clone(),
                consumer: self.consumer.clone(),
                claimed_at: Instant::now(),
                deliveries: 1,
            },
        );

        Ok(Some(QueueEntry {
            entry_id,
            delivery_count: 1,
            fields,
        }))
    }
}

#[async_trait::async_trait]
impl WorkQueue for InMemoryWorkQueue {
    fn consumer_name(&self) -> &str {
        &self.consumer
    }

    async fn enqueue(&self, message: &QueueMessage) -> Result<String, WorkQueueError> {
        let fields = message
            .to_fields()
            .map_err(|e| WorkQueueError::Serialization(e.to_string()))?
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        self.push_raw(fields)
    }

    async fn dequeue(&self, block: Duration) -> Result<Option<QueueEntry>, WorkQueueError> {
        let deadline = Instant::now() + block;

        loop {
            // Register interest before checking, so an enqueue in between is not missed.
            let notified = self.shared.arrivals.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(entry) = self.try_claim()? {
                return Ok(Some(entry));
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            let _ = tokio::time::timeout(deadline - now, notified).await;
        }
    }

    async fn acknowledge(&self, entry: &QueueEntry) -> Result<(), WorkQueueError> {
        self.lock()?.pending.remove(&entry.entry_id);
        Ok(())
    }

    async fn reclaim_stale(
        &self,
        min_idle: Duration,
        count: usize,
    ) -> Result<Vec<QueueEntry>, WorkQueueError> {
        let mut state = self.lock()?;
        let now = Instant::now();
        let mut claimed = Vec::new();

        for (entry_id, pending) in state.pending.iter_mut() {
            if claimed.len() >= count {
                break;
            }
            if now.duration_since(pending.claimed_at) < min_idle {
                continue;
            }
            pending.consumer = self.consumer.clone();
            pending.claimed_at = now;
            pending.deliveries += 1;
            claimed.push(QueueEntry {
                entry_id: entry_id.clone(),
                delivery_count: pending.deliveries,
                fields: pending.fields.clone(),
            });
        }

        Ok(claimed)
    }

    async fn dead_letter(&self, entry: &QueueEntry, reason: &str) -> Result<(), WorkQueueError> {
        self.lock()?.dead_letters.push(DeadLetter {
            entry_id: entry.entry_id.clone(),
            reason: reason.to_string(),
            fields: entry.fields.clone(),
        });
        Ok(())
    }

    async fn len(&self) -> Result<u64, WorkQueueError> {
        let state = self.lock()?;
        Ok((state.undelivered.len() + state.pending.len()) as u64)
    }
}
