//! Worker process: one consumer in the dispatch group.
//!
//! Runs the dispatcher loop over Postgres + Redis Streams, plus the callback
//! deadline sweep, until Ctrl-C.

use std::sync::Arc;

use anyhow::Context;

use vendorflow_infra::work_queue::RedisStreamsWorkQueue;
use vendorflow_infra::{DeadlineSweeper, Dispatcher, HttpVendorGateway, PostgresJobStore, WorkerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    vendorflow_observability::init("vendorflow-worker");

    let config = WorkerConfig::from_env().context("invalid configuration")?;

    // Losing the store or the queue at startup is the only fatal failure.
    let store = Arc::new(
        PostgresJobStore::connect(config.require_database_url()?)
            .await
            .context("failed to connect to postgres")?,
    );
    let queue = RedisStreamsWorkQueue::connect(&config.redis_url, config.queue.clone())
        .await
        .context("failed to connect to redis")?;
    let gateway = HttpVendorGateway::from_config(&config.vendors)
        .context("failed to build vendor gateway")?;

    tracing::info!(
        consumer = %config.queue.consumer,
        stream = %config.queue.stream_key,
        group = %config.queue.group,
        "worker starting"
    );

    let dispatcher = Dispatcher::new(store.clone(), queue, gateway, config.dispatcher.clone()).spawn();
    let sweeper = DeadlineSweeper::new(store, config.deadline_sweep_interval).spawn();

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    tracing::info!("shutdown requested");

    let stats = dispatcher.stats();
    dispatcher.shutdown().await;
    sweeper.shutdown().await;

    tracing::info!(
        processed = stats.processed,
        completed = stats.completed,
        failed = stats.failed,
        dispatched_async = stats.dispatched_async,
        dead_lettered = stats.dead_lettered,
        "worker stopped"
    );
    Ok(())
}
