use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use vendorflow_infra::{CompletionError, JobStoreError, WorkQueueError};

pub fn store_error_to_response(err: JobStoreError) -> axum::response::Response {
    match err {
        JobStoreError::NotFound(id) => {
            json_error(StatusCode::NOT_FOUND, "not_found", format!("job {id} not found"))
        }
        JobStoreError::AlreadyExists(id) => {
            json_error(StatusCode::CONFLICT, "conflict", format!("job {id} already exists"))
        }
        JobStoreError::Storage(msg) | JobStoreError::Corrupt(msg) => {
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", msg)
        }
    }
}

pub fn queue_error_to_response(err: WorkQueueError) -> axum::response::Response {
    json_error(StatusCode::INTERNAL_SERVER_ERROR, "queue_error", err.to_string())
}

pub fn completion_error_to_response(err: CompletionError) -> axum::response::Response {
    match err {
        CompletionError::InvalidJobId(_) => {
            json_error(StatusCode::BAD_REQUEST, "invalid_job_id", err.to_string())
        }
        CompletionError::NotFound(_) => json_error(StatusCode::NOT_FOUND, "not_found", err.to_string()),
        CompletionError::NotProcessing { .. } => {
            json_error(StatusCode::CONFLICT, "not_processing", err.to_string())
        }
        CompletionError::Store(e) => store_error_to_response(e),
    }
}

/// Body that failed to parse: syntax errors are 400, shape errors 422.
pub fn rejection_to_response(rejection: JsonRejection) -> axum::response::Response {
    json_error(rejection.status(), "invalid_body", rejection.body_text())
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
