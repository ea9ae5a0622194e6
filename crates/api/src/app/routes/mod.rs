use axum::{
    Router,
    routing::{get, post},
};

pub mod jobs;
pub mod system;
pub mod webhook;

/// Router for the intake, status and webhook endpoints.
pub fn router() -> Router {
    Router::new()
        .route("/stats", get(system::stats))
        .route("/jobs", post(jobs::create_job))
        .route("/jobs/:id", get(jobs::get_job))
        .route("/vendor-webhook/:vendor", post(webhook::vendor_webhook))
}
