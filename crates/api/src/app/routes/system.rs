use std::sync::Arc;

use axum::{Json, extract::Extension, http::StatusCode, response::IntoResponse};
use serde_json::json;

use crate::app::errors;
use crate::app::services::AppServices;

pub async fn health() -> StatusCode {
    StatusCode::OK
}

/// Job counts per status, queue length and (in-memory mode) dispatcher counters.
pub async fn stats(Extension(services): Extension<Arc<AppServices>>) -> axum::response::Response {
    let jobs = match services.store.stats().await {
        Ok(stats) => stats,
        Err(e) => return errors::store_error_to_response(e),
    };
    let queue_length = match services.queue.len().await {
        Ok(len) => len,
        Err(e) => return errors::queue_error_to_response(e),
    };

    Json(json!({
        "backend": services.backend,
        "jobs": jobs,
        "queue_length": queue_length,
        "dispatcher": services.dispatcher_stats(),
    }))
    .into_response()
}
