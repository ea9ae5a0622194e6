//! HTTP API: job intake, status lookup and the vendor webhook endpoint.

pub mod app;
