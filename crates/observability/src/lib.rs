//! Tracing and logging setup shared by the API and worker binaries.

/// Initialize process-wide tracing for a named service.
///
/// Safe to call multiple times; subsequent calls become no-ops.
pub fn init(service: &'static str) {
    tracing::init(tracing::LogFormat::from_env());
    ::tracing::info!(service, "tracing initialized");
}

/// Tracing configuration (filters, output format).
pub mod tracing;
