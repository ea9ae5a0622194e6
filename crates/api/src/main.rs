use anyhow::Context;

use vendorflow_infra::ApiConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    vendorflow_observability::init("vendorflow-api");

    let config = ApiConfig::from_env().context("invalid configuration")?;
    let (app, services) = vendorflow_api::app::build_app(&config).await?;

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    tracing::info!(addr = %listener.local_addr()?, backend = ?services.backend, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown requested");
        })
        .await?;

    services.shutdown().await;
    Ok(())
}
