//! Vendor channels: which backend a job is routed to.

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// How a vendor reports completion.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CompletionModel {
    /// The result comes back in the response to the dispatch call.
    Immediate,
    /// The dispatch call only means "accepted"; the result arrives via webhook.
    Callback,
}

/// Vendor channel selector carried on every queue entry.
///
/// Choosing the channel is the intake layer's decision; the dispatch
/// pipeline only routes on it.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VendorChannel {
    Sync,
    Async,
}

impl VendorChannel {
    pub const ALL: [VendorChannel; 2] = [VendorChannel::Sync, VendorChannel::Async];

    pub fn as_str(&self) -> &'static str {
        match self {
            VendorChannel::Sync => "sync",
            VendorChannel::Async => "async",
        }
    }

    pub fn completion_model(&self) -> CompletionModel {
        match self {
            VendorChannel::Sync => CompletionModel::Immediate,
            VendorChannel::Async => CompletionModel::Callback,
        }
    }
}

impl core::fmt::Display for VendorChannel {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VendorChannel {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sync" => Ok(VendorChannel::Sync),
            "async" => Ok(VendorChannel::Async),
            other => Err(DomainError::validation(format!(
                "unknown vendor channel '{other}' (expected sync or async)"
            ))),
        }
    }
}
