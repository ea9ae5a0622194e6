//! `vendorflow-core`: job dispatch domain building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! identifiers, the job state machine, vendor channels, wire shapes and the
//! result sanitizer.

pub mod channel;
pub mod error;
pub mod id;
pub mod job;
pub mod sanitize;
pub mod wire;

pub use channel::{CompletionModel, VendorChannel};
pub use error::{DomainError, DomainResult};
pub use id::RequestId;
pub use job::{Job, JobStatus, JobUpdate};
pub use sanitize::{REDACTED, sanitize};
