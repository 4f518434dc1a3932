use std::sync::Arc;

use anyhow::Context;

use fulfillment_api::app::{build_delivery_app, services::build_delivery_services};
use fulfillment_infra::config::DeliveryServiceConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fulfillment_observability::init();

    let config = DeliveryServiceConfig::from_env()?;
    let services = build_delivery_services(&config)
        .await
        .context("delivery service wiring")?;
    let app = build_delivery_app(Arc::new(services));

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.bind))?;
    tracing::info!(
        addr = %listener.local_addr()?,
        orders = %config.order_service_url,
        "delivery-service listening"
    );

    axum::serve(listener, app).await?;
    Ok(())
}
