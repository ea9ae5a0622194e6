use std::sync::Arc;

use axum::{
    Json,
    extract::{Extension, Path, rejection::JsonRejection},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::{error, info};

use vendorflow_core::wire::{CreateJobRequest, CreateJobResponse, JobStatusResponse, QueueMessage};
use vendorflow_core::{Job, JobUpdate, RequestId};

use crate::app::errors;
use crate::app::services::AppServices;

/// Create the job record, then enqueue it for dispatch.
pub async fn create_job(
    Extension(services): Extension<Arc<AppServices>>,
    body: Result<Json<CreateJobRequest>, JsonRejection>,
) -> axum::response::Response {
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => return errors::rejection_to_response(rejection),
    };

    if !body.payload.is_object() {
        return errors::json_error(
            StatusCode::UNPROCESSABLE_ENTITY,
            "invalid_payload",
            "payload must be a JSON object",
        );
    }

    let channel = body.vendor_type.unwrap_or(services.default_channel);
    let request_id = RequestId::new();

    let job = Job::new(request_id, body.payload.clone(), Some(channel));
    if let Err(e) = services.store.create_job(job).await {
        return errors::store_error_to_response(e);
    }

    let message = QueueMessage::new(request_id, body.payload, channel);
    if let Err(e) = services.queue.enqueue(&message).await {
        error!(request_id = %request_id, error = %e, "enqueue failed");
        // Nothing will ever pick the job up; do not leave it pending.
        let update = JobUpdate::failed(format!("enqueue failed: {e}")).guarded();
        if let Err(store_err) = services.store.apply_update(request_id, &update).await {
            error!(request_id = %request_id, error = %store_err, "could not mark unqueued job failed");
        }
        return errors::queue_error_to_response(e);
    }

    info!(request_id = %request_id, channel = %channel, "job accepted");
    (StatusCode::ACCEPTED, Json(CreateJobResponse { request_id })).into_response()
}

pub async fn get_job(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let request_id = match id.parse::<RequestId>() {
        Ok(id) => id,
        Err(e) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", e.to_string()),
    };

    match services.store.get_job(request_id).await {
        Ok(Some(job)) => Json(JobStatusResponse::from(&job)).into_response(),
        Ok(None) => errors::json_error(
            StatusCode::NOT_FOUND,
            "not_found",
            format!("job {request_id} not found"),
        ),
        Err(e) => errors::store_error_to_response(e),
    }
}
