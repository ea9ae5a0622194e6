//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `services.rs`: store/queue wiring and the in-process dispatcher
//! - `routes/`: HTTP routes + handlers
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{Extension, Router, routing::get};
use tower::ServiceBuilder;

use vendorflow_infra::ApiConfig;

pub mod errors;
pub mod routes;
pub mod services;

pub use services::{AppServices, Backend};

/// Build services from `config` and the router over them.
pub async fn build_app(config: &ApiConfig) -> anyhow::Result<(Router, Arc<AppServices>)> {
    let services = Arc::new(services::build_services(config).await?);
    Ok((router(services.clone()), services))
}

/// The full HTTP router over already-built services.
pub fn router(services: Arc<AppServices>) -> Router {
    Router::new()
        .route("/health", get(routes::system::health))
        .merge(routes::router())
        .layer(ServiceBuilder::new().layer(Extension(services)))
}
