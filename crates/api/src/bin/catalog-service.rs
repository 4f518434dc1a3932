use std::sync::Arc;

use anyhow::Context;

use fulfillment_api::app::{build_catalog_app, services::build_catalog_services};
use fulfillment_infra::config::CatalogConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fulfillment_observability::init();

    let config = CatalogConfig::from_env()?;
    let services = build_catalog_services(&config)
        .await
        .context("catalog service wiring")?;
    let app = build_catalog_app(Arc::new(services));

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.bind))?;
    tracing::info!(addr = %listener.local_addr()?, "catalog-service listening");

    axum::serve(listener, app).await?;
    Ok(())
}
