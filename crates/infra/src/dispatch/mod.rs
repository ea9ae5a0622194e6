//! Background tasks: the dispatcher loop and the callback deadline sweep.

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::warn;

pub mod deadline_sweep;
pub mod dispatcher;

pub use deadline_sweep::DeadlineSweeper;
pub use dispatcher::{
    Dispatcher, DispatcherConfig, DispatcherHandle, DispatcherStats, EntryOutcome,
};

/// Handle to stop and join a background task.
#[derive(Debug)]
pub struct WorkerHandle {
    name: &'static str,
    shutdown: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl WorkerHandle {
    pub(crate) fn new(name: &'static str, shutdown: watch::Sender<bool>, join: JoinHandle<()>) -> Self {
        Self {
            name,
            shutdown,
            join,
        }
    }

    /// Request graceful shutdown and wait for the task to stop.
    ///
    /// A job already in flight is finished first.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.join.await {
            warn!(worker = self.name, error = %e, "background task ended abnormally");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}

/// Resolves once shutdown has been requested (or the handle was dropped).
pub(crate) async fn shutdown_requested(rx: &mut watch::Receiver<bool>) {
    while !*rx.borrow_and_update() {
        if rx.changed().await.is_err() {
            return;
        }
    }
}
