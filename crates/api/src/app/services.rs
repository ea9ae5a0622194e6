//! Service wiring: job store, work queue and (in-memory mode) the background tasks.

use std::sync::{Arc, Mutex, PoisonError};

use anyhow::Context;
use tracing::info;

use vendorflow_core::VendorChannel;
use vendorflow_infra::work_queue::RedisStreamsWorkQueue;
use vendorflow_infra::{
    ApiConfig, CompletionHandler, DeadlineSweeper, Dispatcher, DispatcherHandle,
    HttpVendorGateway, InMemoryJobStore, InMemoryWorkQueue, JobStore, PostgresJobStore,
    WorkQueue, WorkerHandle,
};

/// Which storage the services run on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    /// In-process store and queue, with an in-process dispatcher
    InMemory,
    /// Postgres + Redis; dispatching happens in separate worker processes
    Persistent,
}

struct Background {
    dispatcher: DispatcherHandle,
    sweeper: WorkerHandle,
}

pub struct AppServices {
    pub backend: Backend,
    pub store: Arc<dyn JobStore>,
    pub queue: Arc<dyn WorkQueue>,
    pub completion: CompletionHandler<Arc<dyn JobStore>>,
    pub default_channel: VendorChannel,
    background: Mutex<Option<Background>>,
}

impl AppServices {
    /// Services over caller-supplied store and queue, with no background tasks.
    pub fn new(
        backend: Backend,
        store: Arc<dyn JobStore>,
        queue: Arc<dyn WorkQueue>,
        default_channel: VendorChannel,
    ) -> Self {
        Self {
            backend,
            completion: CompletionHandler::new(store.clone()),
            store,
            queue,
            default_channel,
            background: Mutex::new(None),
        }
    }

    /// Stop the in-process dispatcher and deadline sweep, if running.
    pub async fn shutdown(&self) {
        let background = self
            .background
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(background) = background {
            background.dispatcher.shutdown().await;
            background.sweeper.shutdown().await;
        }
    }

    /// Counters of the in-process dispatcher (in-memory mode only).
    pub fn dispatcher_stats(&self) -> Option<vendorflow_infra::dispatch::DispatcherStats> {
        self.background
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|b| b.dispatcher.stats())
    }
}

/// Build services according to `config.use_persistent_stores`.
pub async fn build_services(config: &ApiConfig) -> anyhow::Result<AppServices> {
    if config.use_persistent_stores {
        build_persistent(config).await
    } else {
        build_in_memory(config)
    }
}

fn build_in_memory(config: &ApiConfig) -> anyhow::Result<AppServices> {
    let worker = &config.worker;
    let store: Arc<dyn JobStore> = InMemoryJobStore::arc();
    let queue = InMemoryWorkQueue::new(worker.queue.consumer.clone());
    let gateway = HttpVendorGateway::from_config(&worker.vendors)
        .context("failed to build vendor gateway")?;

    let dispatcher = Dispatcher::new(
        store.clone(),
        queue.clone(),
        gateway,
        worker.dispatcher.clone(),
    )
    .spawn();
    let sweeper = DeadlineSweeper::new(store.clone(), worker.deadline_sweep_interval).spawn();

    info!(consumer = %worker.queue.consumer, "using in-memory store and queue with in-process dispatcher");

    let services = AppServices::new(
        Backend::InMemory,
        store,
        Arc::new(queue),
        config.default_channel,
    );
    *services
        .background
        .lock()
        .unwrap_or_else(PoisonError::into_inner) = Some(Background {
        dispatcher,
        sweeper,
    });
    Ok(services)
}

async fn build_persistent(config: &ApiConfig) -> anyhow::Result<AppServices> {
    let worker = &config.worker;
    let database_url = worker.require_database_url()?;

    let store = PostgresJobStore::connect(database_url)
        .await
        .context("failed to connect to postgres")?;
    let queue = RedisStreamsWorkQueue::connect(&worker.redis_url, worker.queue.clone())
        .await
        .context("failed to connect to redis")?;

    info!(stream = %worker.queue.stream_key, "using postgres job store and redis work queue");

    Ok(AppServices::new(
        Backend::Persistent,
        Arc::new(store),
        Arc::new(queue),
        config.default_channel,
    ))
}
