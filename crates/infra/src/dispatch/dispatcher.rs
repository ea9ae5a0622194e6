//! Dispatcher: the worker loop that drives queued jobs through a vendor.
//!
//! One cooperative loop per worker process. Each iteration claims at most one
//! entry, so throughput scales with the number of workers in the consumer
//! group, not with in-process parallelism.
//!
//! Per entry:
//! 1. decode it (malformed entries go to the dead-letter queue)
//! 2. move the job to `processing` (only from `pending` or `processing`)
//! 3. call the vendor for the entry's channel
//! 4. write the outcome with a conditional update
//! 5. acknowledge, unless a store write failed and the entry must be redelivered
//!
//! Every failure is contained at the per-entry boundary; the loop itself only
//! pauses after queue errors.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use vendorflow_core::{
    CompletionModel, JobStatus, JobUpdate, RequestId, VendorChannel, sanitize,
};

use super::{WorkerHandle, shutdown_requested};
use crate::job_store::{JobStore, JobStoreError, TransitionOutcome};
use crate::vendor::{VendorCall, VendorGateway};
use crate::work_queue::{QueueEntry, WorkQueue};

#[derive(Debug, Clone, PartialEq)]
pub struct DispatcherConfig {
    /// Longest a single dequeue waits for a new entry
    pub block: Duration,
    /// Idle time after which another consumer's pending entry is taken over
    pub claim_timeout: Duration,
    /// Deliveries allowed before an entry is dead-lettered
    pub max_deliveries: u32,
    pub reclaim_interval: Duration,
    pub reclaim_batch: usize,
    /// Time a callback vendor has to deliver its result
    pub async_deadline: Duration,
    /// Base URL of the API hosting the webhook endpoint
    pub callback_base_url: String,
    /// Pause after a queue error before trying again
    pub error_backoff: Duration,
    /// Pause after a dequeue that found nothing
    pub idle_pause: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            block: Duration::from_millis(1000),
            claim_timeout: Duration::from_millis(60_000),
            max_deliveries: 5,
            reclaim_interval: Duration::from_millis(15_000),
            reclaim_batch: 32,
            async_deadline: Duration::from_secs(300),
            callback_base_url: "http://localhost:8000".to_string(),
            error_backoff: Duration::from_millis(500),
            idle_pause: Duration::from_millis(100),
        }
    }
}

impl DispatcherConfig {
    /// Webhook address handed to callback vendors.
    pub fn callback_url(&self, channel: VendorChannel) -> String {
        format!(
            "{}/vendor-webhook/{}",
            self.callback_base_url.trim_end_matches('/'),
            channel
        )
    }
}

/// Dispatcher runtime statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct DispatcherStats {
    pub processed: u64,
    pub completed: u64,
    pub failed: u64,
    pub dispatched_async: u64,
    pub skipped: u64,
    pub dead_lettered: u64,
    pub retained: u64,
    pub reclaimed: u64,
}

/// What happened to one queue entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryOutcome {
    /// Immediate vendor result stored
    Completed,
    /// Failure recorded on the job
    Failed,
    /// Callback vendor accepted the work; job waits in `processing`
    DispatchedAsync,
    /// Job missing, already terminal, or finalized by someone else
    Skipped,
    DeadLettered,
    /// A store write failed; the entry stays unacknowledged for redelivery
    Retained,
}

impl EntryOutcome {
    fn acknowledges(&self) -> bool {
        !matches!(self, EntryOutcome::Retained)
    }
}

/// Handle to a spawned dispatcher.
#[derive(Debug)]
pub struct DispatcherHandle {
    worker: WorkerHandle,
    stats: Arc<Mutex<DispatcherStats>>,
}

impl DispatcherHandle {
    pub async fn shutdown(self) {
        self.worker.shutdown().await;
    }

    pub fn stats(&self) -> DispatcherStats {
        self.stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

pub struct Dispatcher<S, Q, G> {
    store: S,
    queue: Q,
    gateway: G,
    config: DispatcherConfig,
    stats: Arc<Mutex<DispatcherStats>>,
}

impl<S, Q, G> Dispatcher<S, Q, G>
where
    S: JobStore + 'static,
    Q: WorkQueue + 'static,
    G: VendorGateway + 'static,
{
    pub fn new(store: S, queue: Q, gateway: G, config: DispatcherConfig) -> Self {
        Self {
            store,
            queue,
            gateway,
            config,
            stats: Arc::new(Mutex::new(DispatcherStats::default())),
        }
    }

    pub fn stats(&self) -> DispatcherStats {
        self.stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Run the loop on a tokio task.
    pub fn spawn(self) -> DispatcherHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let stats = self.stats.clone();
        let join = tokio::spawn(self.run(shutdown_rx));

        DispatcherHandle {
            worker: WorkerHandle::new("dispatcher", shutdown_tx, join),
            stats,
        }
    }

    /// Loop until `shutdown` flips to true (or its sender is dropped).
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let consumer = self.queue.consumer_name().to_string();
        info!(consumer = %consumer, "dispatcher started");

        // First pass at startup picks up entries left behind by a crashed process.
        let mut next_reclaim = Instant::now();

        loop {
            if *shutdown.borrow() {
                break;
            }

            if Instant::now() >= next_reclaim {
                self.reclaim_pass().await;
                next_reclaim = Instant::now() + self.config.reclaim_interval;
            }

            let dequeued = tokio::select! {
                _ = shutdown_requested(&mut shutdown) => break,
                dequeued = self.queue.dequeue(self.config.block) => dequeued,
            };

            match dequeued {
                Ok(Some(entry)) => {
                    self.process_entry(entry).await;
                }
                Ok(None) => {
                    debug!(consumer = %consumer, "no entry available");
                    tokio::select! {
                        _ = shutdown_requested(&mut shutdown) => break,
                        _ = tokio::time::sleep(self.config.idle_pause) => {}
                    }
                }
                Err(e) => {
                    error!(consumer = %consumer, error = %e, "dequeue failed");
                    tokio::time::sleep(self.config.error_backoff).await;
                }
            }
        }

        info!(consumer = %consumer, "dispatcher stopped");
    }

    /// Take over entries whose consumer stopped acknowledging, and process them.
    pub async fn reclaim_pass(&self) -> usize {
        let entries = match self
            .queue
            .reclaim_stale(self.config.claim_timeout, self.config.reclaim_batch)
            .await
        {
            Ok(entries) => entries,
            Err(e) => {
                error!(error = %e, "reclaim failed");
                return 0;
            }
        };

        let count = entries.len();
        if count > 0 {
            info!(count, "reclaimed stale entries");
        }
        for entry in entries {
            self.bump(|s| s.reclaimed += 1);
            self.process_entry(entry).await;
        }
        count
    }

    /// Handle one claimed entry end to end, acknowledging it when it reached
    /// a resting state.
    pub async fn process_entry(&self, entry: QueueEntry) -> EntryOutcome {
        let outcome = self.handle(&entry).await;

        if outcome.acknowledges() {
            if let Err(e) = self.queue.acknowledge(&entry).await {
                // Redelivery will find the job in a state it can cope with.
                error!(entry_id = %entry.entry_id, error = %e, "acknowledge failed");
            }
        }

        self.bump(|s| {
            s.processed += 1;
            match outcome {
                EntryOutcome::Completed => s.completed += 1,
                EntryOutcome::Failed => s.failed += 1,
                EntryOutcome::DispatchedAsync => s.dispatched_async += 1,
                EntryOutcome::Skipped => s.skipped += 1,
                EntryOutcome::DeadLettered => s.dead_lettered += 1,
                EntryOutcome::Retained => s.retained += 1,
            }
        });

        outcome
    }

    async fn handle(&self, entry: &QueueEntry) -> EntryOutcome {
        if entry.delivery_count > self.config.max_deliveries {
            let reason = format!(
                "exceeded {} deliveries without completing",
                self.config.max_deliveries
            );
            return self.dead_letter(entry, &reason).await;
        }

        let message = match entry.message() {
            Ok(message) => message,
            Err(e) => return self.dead_letter(entry, &format!("malformed entry: {e}")).await,
        };
        let request_id = message.request_id;

        // Redelivered entries find the job already processing; that is allowed.
        let claim = JobUpdate::status(JobStatus::Processing)
            .only_from(&[JobStatus::Pending, JobStatus::Processing]);
        match self.store.apply_update(request_id, &claim).await {
            Ok(TransitionOutcome::Applied(_)) => {}
            Ok(TransitionOutcome::Rejected { current }) => {
                info!(request_id = %request_id, status = %current, "job already finished, skipping");
                return EntryOutcome::Skipped;
            }
            Err(JobStoreError::NotFound(_)) => {
                warn!(request_id = %request_id, entry_id = %entry.entry_id, "queued job has no record");
                return EntryOutcome::Skipped;
            }
            Err(e) => {
                error!(request_id = %request_id, error = %e, "could not claim job");
                return EntryOutcome::Retained;
            }
        }

        let call = VendorCall::new(request_id, message.payload, message.channel);
        match message.channel.completion_model() {
            CompletionModel::Immediate => self.run_immediate(&call).await,
            CompletionModel::Callback => self.run_callback(&call).await,
        }
    }

    async fn run_immediate(&self, call: &VendorCall) -> EntryOutcome {
        match self.gateway.dispatch_sync(call).await {
            Ok(data) => {
                let update = JobUpdate::complete(sanitize(&data)).guarded();
                let outcome = self.finish(call.request_id, &update, EntryOutcome::Completed).await;
                if outcome == EntryOutcome::Completed {
                    info!(request_id = %call.request_id, channel = %call.channel, "job completed");
                }
                outcome
            }
            Err(e) => self.fail(call.request_id, &e.to_string()).await,
        }
    }

    async fn run_callback(&self, call: &VendorCall) -> EntryOutcome {
        // Validated before the vendor is called.
        let Some(earliest) = callback_deadline(Utc::now(), self.config.async_deadline) else {
            return self.fail(call.request_id, DEADLINE_OUT_OF_RANGE).await;
        };

        let callback_url = self.config.callback_url(call.channel);
        if let Err(e) = self.gateway.dispatch_async(call, &callback_url).await {
            return self.fail(call.request_id, &e.to_string()).await;
        }

        let deadline = callback_deadline(Utc::now(), self.config.async_deadline).unwrap_or(earliest);
        let update = JobUpdate::status(JobStatus::Processing)
            .with_deadline(deadline)
            .only_from(&[JobStatus::Processing]);

        match self.store.apply_update(call.request_id, &update).await {
            Ok(TransitionOutcome::Applied(_)) => {
                info!(request_id = %call.request_id, channel = %call.channel, "job handed to callback vendor");
            }
            Ok(TransitionOutcome::Rejected { current }) => {
                // The webhook beat us to it.
                debug!(request_id = %call.request_id, status = %current, "job finalized before deadline was set");
            }
            Err(e) => {
                // The vendor has the work; without a deadline the job just waits for its webhook.
                warn!(request_id = %call.request_id, error = %e, "could not record callback deadline");
            }
        }

        EntryOutcome::DispatchedAsync
    }

    async fn fail(&self, request_id: RequestId, reason: &str) -> EntryOutcome {
        warn!(request_id = %request_id, error = %reason, "job failed");
        let update = JobUpdate::failed(reason).guarded();
        self.finish(request_id, &update, EntryOutcome::Failed).await
    }

    /// Apply a terminal update, mapping store outcomes onto entry outcomes.
    async fn finish(
        &self,
        request_id: RequestId,
        update: &JobUpdate,
        applied: EntryOutcome,
    ) -> EntryOutcome {
        match self.store.apply_update(request_id, update).await {
            Ok(TransitionOutcome::Applied(_)) => applied,
            Ok(TransitionOutcome::Rejected { current }) => {
                warn!(
                    request_id = %request_id,
                    status = %current,
                    wanted = %update.status,
                    "job changed underneath the dispatcher; keeping its state"
                );
                EntryOutcome::Skipped
            }
            Err(JobStoreError::NotFound(_)) => EntryOutcome::Skipped,
            Err(e) => {
                error!(request_id = %request_id, error = %e, "could not record job outcome");
                EntryOutcome::Retained
            }
        }
    }

    /// Mark the job failed when its id is readable, then park the raw entry
    /// on the dead-letter queue.
    async fn dead_letter(&self, entry: &QueueEntry, reason: &str) -> EntryOutcome {
        let request_id = entry
            .raw_request_id()
            .and_then(|raw| raw.parse::<RequestId>().ok());

        if let Some(request_id) = request_id {
            let update = JobUpdate::failed(reason).guarded();
            match self.store.apply_update(request_id, &update).await {
                Ok(_) | Err(JobStoreError::NotFound(_)) => {}
                Err(e) => {
                    error!(request_id = %request_id, error = %e, "could not mark dead-lettered job failed");
                    return EntryOutcome::Retained;
                }
            }
        }

        if let Err(e) = self.queue.dead_letter(entry, reason).await {
            error!(entry_id = %entry.entry_id, error = %e, "dead-letter write failed");
            return EntryOutcome::Retained;
        }

        warn!(entry_id = %entry.entry_id, reason, "entry dead-lettered");
        EntryOutcome::DeadLettered
    }

    fn bump(&self, f: impl FnOnce(&mut DispatcherStats)) {
        f(&mut self.stats.lock().unwrap_or_else(PoisonError::into_inner));
    }
}

const DEADLINE_OUT_OF_RANGE: &str = "callback deadline out of range";

/// `now + window`, or `None` when the sum is not a representable timestamp.
fn callback_deadline(now: DateTime<Utc>, window: Duration) -> Option<DateTime<Utc>> {
    chrono::Duration::from_std(window)
        .ok()
        .and_then(|window| now.checked_add_signed(window))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job_store::InMemoryJobStore;
    use crate::vendor::VendorError;
    use crate::work_queue::{InMemoryWorkQueue, WorkQueueError};
    use serde_json::{Value as JsonValue, json};
    use std::collections::HashMap;
    use vendorflow_core::Job;
    use vendorflow_core::wire::QueueMessage;

    /// Scripted gateway: a fixed answer per completion model.
    #[derive(Default)]
    struct FakeGateway {
        sync_result: Option<Result<JsonValue, VendorError>>,
        async_result: Option<Result<(), VendorError>>,
        callbacks: Mutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl VendorGateway for FakeGateway {
        async fn dispatch_sync(&self, _call: &VendorCall) -> Result<JsonValue, VendorError> {
            self.sync_result
                .clone()
                .unwrap_or_else(|| Err(VendorError::Transport("not scripted".into())))
        }

        async fn dispatch_async(
            &self,
            _call: &VendorCall,
            callback_url: &str,
        ) -> Result<(), VendorError> {
            self.callbacks.lock().unwrap().push(callback_url.to_string());
            self.async_result
                .clone()
                .unwrap_or_else(|| Err(VendorError::Transport("not scripted".into())))
        }
    }

    type TestDispatcher =
        Dispatcher<Arc<InMemoryJobStore>, InMemoryWorkQueue, Arc<FakeGateway>>;

    struct Harness {
        store: Arc<InMemoryJobStore>,
        queue: InMemoryWorkQueue,
        dispatcher: TestDispatcher,
    }

    fn harness(gateway: FakeGateway) -> Harness {
        let store = InMemoryJobStore::arc();
        let queue = InMemoryWorkQueue::new("worker-test");
        let dispatcher = Dispatcher::new(
            store.clone(),
            queue.clone(),
            Arc::new(gateway),
            DispatcherConfig {
                block: Duration::from_millis(10),
                ..DispatcherConfig::default()
            },
        );
        Harness {
            store,
            queue,
            dispatcher,
        }
    }

    async fn submit(h: &Harness, channel: VendorChannel) -> (RequestId, QueueEntry) {
        let id = RequestId::new();
        h.store
            .create_job(Job::new(id, json!({"x": 1}), Some(channel)))
            .await
            .unwrap();
        h.queue
            .enqueue(&QueueMessage::new(id, json!({"x": 1}), channel))
            .await
            .unwrap();
        let entry = h.queue.dequeue(Duration::from_millis(10)).await.unwrap().unwrap();
        (id, entry)
    }

    #[tokio::test]
    async fn sync_success_is_sanitized_and_completed() {
        let h = harness(FakeGateway {
            sync_result: Some(Ok(json!({"email": " a@b.com ", "note": "  hi  "}))),
            ..Default::default()
        });
        let (id, entry) = submit(&h, VendorChannel::Sync).await;

        let outcome = h.dispatcher.process_entry(entry).await;

        assert_eq!(outcome, EntryOutcome::Completed);
        let job = h.store.get_job(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Complete);
        assert_eq!(job.result, Some(json!({"email": "[REDACTED]", "note": "hi"})));
        assert_eq!(h.queue.pending_count(), 0);
    }

    #[tokio::test]
    async fn sync_vendor_failure_marks_job_failed() {
        let h = harness(FakeGateway {
            sync_result: Some(Err(VendorError::Status {
                code: 500,
                body: "boom".into(),
            })),
            ..Default::default()
        });
        let (id, entry) = submit(&h, VendorChannel::Sync).await;

        assert_eq!(h.dispatcher.process_entry(entry).await, EntryOutcome::Failed);

        let job = h.store.get_job(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.error.unwrap().contains("500"));
        assert!(job.result.is_none());
        assert_eq!(h.queue.pending_count(), 0);
    }

    #[tokio::test]
    async fn async_acceptance_leaves_job_processing_with_deadline() {
        let gateway = Arc::new(FakeGateway {
            async_result: Some(Ok(())),
            ..Default::default()
        });
        let store = InMemoryJobStore::arc();
        let queue = InMemoryWorkQueue::new("worker-test");
        let dispatcher = Dispatcher::new(
            store.clone(),
            queue.clone(),
            gateway.clone(),
            DispatcherConfig {
                callback_base_url: "http://api.local/".into(),
                ..DispatcherConfig::default()
            },
        );
        let h = Harness {
            store,
            queue,
            dispatcher,
        };
        let (id, entry) = submit(&h, VendorChannel::Async).await;

        assert_eq!(
            h.dispatcher.process_entry(entry).await,
            EntryOutcome::DispatchedAsync
        );

        let job = h.store.get_job(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Processing);
        assert!(job.deadline_at.is_some_and(|d| d > Utc::now()));
        assert_eq!(
            gateway.callbacks.lock().unwrap().as_slice(),
            ["http://api.local/vendor-webhook/async"]
        );
        assert_eq!(h.queue.pending_count(), 0);
    }

    #[tokio::test]
    async fn terminal_jobs_are_skipped_without_calling_the_vendor() {
        let h = harness(FakeGateway::default());
        let (id, entry) = submit(&h, VendorChannel::Sync).await;
        h.store
            .update_status(id, JobStatus::Complete, Some(json!({"done": true})), None)
            .await
            .unwrap();

        assert_eq!(h.dispatcher.process_entry(entry).await, EntryOutcome::Skipped);

        let job = h.store.get_job(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Complete);
        assert_eq!(job.result, Some(json!({"done": true})));
        assert_eq!(h.queue.pending_count(), 0);
    }

    #[tokio::test]
    async fn entry_without_job_record_is_acknowledged() {
        let h = harness(FakeGateway::default());
        h.queue
            .enqueue(&QueueMessage::new(RequestId::new(), json!({}), VendorChannel::Sync))
            .await
            .unwrap();
        let entry = h.queue.dequeue(Duration::from_millis(10)).await.unwrap().unwrap();

        assert_eq!(h.dispatcher.process_entry(entry).await, EntryOutcome::Skipped);
        assert_eq!(h.queue.pending_count(), 0);
    }

    #[tokio::test]
    async fn malformed_entry_is_dead_lettered_and_job_failed() {
        let h = harness(FakeGateway::default());
        let id = RequestId::new();
        h.store
            .create_job(Job::new(id, json!({}), None))
            .await
            .unwrap();

        let mut fields = HashMap::new();
        fields.insert("request_id".to_string(), id.to_string());
        fields.insert("payload".to_string(), "{not json".to_string());
        fields.insert("vendor_type".to_string(), "sync".to_string());
        h.queue.push_raw(fields).unwrap();
        let entry = h.queue.dequeue(Duration::from_millis(10)).await.unwrap().unwrap();

        assert_eq!(
            h.dispatcher.process_entry(entry).await,
            EntryOutcome::DeadLettered
        );

        let job = h.store.get_job(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(h.queue.dead_letters().len(), 1);
        assert_eq!(h.queue.pending_count(), 0);
    }

    #[tokio::test]
    async fn too_many_deliveries_go_to_dead_letter_queue() {
        let h = harness(FakeGateway::default());
        let (id, mut entry) = submit(&h, VendorChannel::Sync).await;
        entry.delivery_count = 6;

        assert_eq!(
            h.dispatcher.process_entry(entry).await,
            EntryOutcome::DeadLettered
        );
        let job = h.store.get_job(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.error.unwrap().contains("deliveries"));
    }

    #[tokio::test]
    async fn webhook_win_is_not_overwritten_by_late_sync_failure() {
        // Simulates a job finalized between claim and outcome write.
        let h = harness(FakeGateway::default());
        let (id, _entry) = submit(&h, VendorChannel::Sync).await;
        h.store
            .update_status(id, JobStatus::Processing, None, None)
            .await
            .unwrap();
        h.store
            .update_status(id, JobStatus::Complete, Some(json!({"r": 1})), None)
            .await
            .unwrap();

        let outcome = h.dispatcher.fail(id, "vendor timed out").await;

        assert_eq!(outcome, EntryOutcome::Skipped);
        let job = h.store.get_job(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Complete);
        assert!(job.error.is_none());
    }

    #[tokio::test]
    async fn out_of_range_deadline_fails_job_before_vendor_call() {
        let gateway = Arc::new(FakeGateway {
            async_result: Some(Ok(())),
            ..Default::default()
        });
        let store = InMemoryJobStore::arc();
        let queue = InMemoryWorkQueue::new("worker-test");
        let dispatcher = Dispatcher::new(
            store.clone(),
            queue.clone(),
            gateway.clone(),
            DispatcherConfig {
                async_deadline: Duration::from_secs(9_000_000_000_000),
                ..DispatcherConfig::default()
            },
        );
        let h = Harness {
            store,
            queue,
            dispatcher,
        };
        let (id, entry) = submit(&h, VendorChannel::Async).await;

        assert_eq!(h.dispatcher.process_entry(entry).await, EntryOutcome::Failed);

        let job = h.store.get_job(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.as_deref(), Some(DEADLINE_OUT_OF_RANGE));
        assert!(gateway.callbacks.lock().unwrap().is_empty());
        assert_eq!(h.queue.pending_count(), 0);
    }

    /// Counts dequeue calls on top of an in-memory queue.
    struct CountingQueue {
        inner: InMemoryWorkQueue,
        dequeues: Arc<std::sync::atomic::AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl WorkQueue for CountingQueue {
        fn consumer_name(&self) -> &str {
            self.inner.consumer_name()
        }

        async fn enqueue(&self, message: &QueueMessage) -> Result<String, WorkQueueError> {
            self.inner.enqueue(message).await
        }

        async fn dequeue(&self, block: Duration) -> Result<Option<QueueEntry>, WorkQueueError> {
            self.dequeues.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            self.inner.dequeue(block).await
        }

        async fn acknowledge(&self, entry: &QueueEntry) -> Result<(), WorkQueueError> {
            self.inner.acknowledge(entry).await
        }

        async fn reclaim_stale(
            &self,
            min_idle: Duration,
            count: usize,
        ) -> Result<Vec<QueueEntry>, WorkQueueError> {
            self.inner.reclaim_stale(min_idle, count).await
        }

        async fn dead_letter(&self, entry: &QueueEntry, reason: &str) -> Result<(), WorkQueueError> {
            self.inner.dead_letter(entry, reason).await
        }

        async fn len(&self) -> Result<u64, WorkQueueError> {
            self.inner.len().await
        }
    }

    #[tokio::test]
    async fn empty_queue_with_zero_block_does_not_spin() {
        let dequeues = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let queue = CountingQueue {
            inner: InMemoryWorkQueue::new("worker-idle"),
            dequeues: dequeues.clone(),
        };
        let dispatcher = Dispatcher::new(
            InMemoryJobStore::arc(),
            queue,
            Arc::new(FakeGateway::default()),
            DispatcherConfig {
                block: Duration::ZERO,
                idle_pause: Duration::from_millis(20),
                ..DispatcherConfig::default()
            },
        );

        let handle = dispatcher.spawn();
        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.shutdown().await;

        let calls = dequeues.load(std::sync::atomic::Ordering::SeqCst);
        assert!(calls >= 1);
        assert!(calls <= 10, "dequeued {calls} times in 100ms");
    }

    #[tokio::test]
    async fn spawned_loop_drains_queue_and_stops() {
        let h = harness(FakeGateway {
            sync_result: Some(Ok(json!({"ok": true}))),
            ..Default::default()
        });
        let Harness {
            store,
            queue,
            dispatcher,
        } = h;

        let mut ids = Vec::new();
        for _ in 0..3 {
            let id = RequestId::new();
            store
                .create_job(Job::new(id, json!({}), Some(VendorChannel::Sync)))
                .await
                .unwrap();
            queue
                .enqueue(&QueueMessage::new(id, json!({}), VendorChannel::Sync))
                .await
                .unwrap();
            ids.push(id);
        }

        let handle = dispatcher.spawn();
        for _ in 0..100 {
            if handle.stats().completed == 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let stats = handle.stats();
        handle.shutdown().await;

        assert_eq!(stats.completed, 3);
        for id in ids {
            let job = store.get_job(id).await.unwrap().unwrap();
            assert_eq!(job.status, JobStatus::Complete);
        }
    }
}
