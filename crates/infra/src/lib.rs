//! Infrastructure layer: job store, work queue, vendor gateway, dispatcher, config.

pub mod completion;
pub mod config;
pub mod dispatch;
pub mod job_store;
pub mod vendor;
pub mod work_queue;


pub use completion::{CompletionError, CompletionHandler, CompletionOutcome};
pub use config::{ApiConfig, ConfigError, VendorConfig, WorkerConfig};
pub use dispatch::{DeadlineSweeper, Dispatcher, DispatcherConfig, DispatcherHandle, WorkerHandle};
pub use job_store::{InMemoryJobStore, JobStore, JobStoreError, PostgresJobStore};
pub use vendor::{HttpVendorGateway, VendorCall, VendorError, VendorGateway};
pub use work_queue::{InMemoryWorkQueue, QueueEntry, QueueSettings, WorkQueue, WorkQueueError};
