use std::sync::Arc;

use axum::{
    Json,
    extract::{Extension, Path, rejection::JsonRejection},
    response::IntoResponse,
};
use serde_json::json;
use tracing::{info, warn};

use vendorflow_core::wire::WebhookCallback;
use vendorflow_infra::CompletionOutcome;

use crate::app::errors;
use crate::app::services::AppServices;

/// Completion callback from a callback vendor.
pub async fn vendor_webhook(
    Extension(services): Extension<Arc<AppServices>>,
    Path(vendor): Path<String>,
    body: Result<Json<WebhookCallback>, JsonRejection>,
) -> axum::response::Response {
    let Json(callback) = match body {
        Ok(body) => body,
        Err(rejection) => {
            warn!(vendor = %vendor, error = %rejection.body_text(), "malformed webhook body");
            return errors::json_error(
                axum::http::StatusCode::BAD_REQUEST,
                "invalid_body",
                rejection.body_text(),
            );
        }
    };

    let job_id = callback.job_id.clone();
    match services.completion.handle_callback(callback).await {
        Ok(CompletionOutcome::Completed(_)) => {
            info!(vendor = %vendor, job_id = %job_id, "webhook completed job");
            Json(json!({"status": "success"})).into_response()
        }
        Ok(CompletionOutcome::AlreadyComplete) => {
            info!(vendor = %vendor, job_id = %job_id, "duplicate webhook ignored");
            Json(json!({"status": "duplicate"})).into_response()
        }
        Err(e) => {
            warn!(vendor = %vendor, job_id = %job_id, error = %e, "webhook rejected");
            errors::completion_error_to_response(e)
        }
    }
}
