use std::sync::Arc;

use anyhow::Context;

use fulfillment_api::app::{build_order_app, services::build_order_services};
use fulfillment_infra::config::OrderServiceConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fulfillment_observability::init();

    let config = OrderServiceConfig::from_env()?;
    let services = build_order_services(&config)
        .await
        .context("order service wiring")?;
    let app = build_order_app(Arc::new(services));

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.bind))?;
    tracing::info!(
        addr = %listener.local_addr()?,
        catalog = %config.catalog_rpc_url,
        "order-service listening"
    );

    axum::serve(listener, app).await?;
    Ok(())
}
