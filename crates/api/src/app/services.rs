//! Per-service wiring: stores, peers, bus and notifier picked from config.

use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use thiserror::Error;
use tracing::{info, warn};

use fulfillment_events::{ChangeNotice, InMemoryEventBus};
use fulfillment_infra::config::{
    CatalogConfig, DeliveryServiceConfig, OrderServiceConfig, NOTIFICATION_TIMEOUT,
};
use fulfillment_infra::notify::{
    HttpIdentityDirectory, HttpNotificationSink, IdentityDirectory, NoDirectory, NotifyError, OrderNotifier,
};
use fulfillment_infra::rpc::{HttpCatalogClient, HttpOrderLedgerClient, RpcError};
use fulfillment_infra::store::postgres::{ensure_schema, CATALOG_SCHEMA, DELIVERY_SCHEMA, ORDER_SCHEMA};
use fulfillment_infra::store::{
    CatalogStore, DeliveryStore, InMemoryCatalogStore, InMemoryDeliveryStore, InMemoryOrderStore, OrderStore,
    PostgresCatalogStore, PostgresDeliveryStore, PostgresOrderStore, StoreError,
};
use fulfillment_infra::{CatalogValidator, DeliveryDispatcher, NoticeBus, OrderLedger};

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("database: {0}")]
    Database(#[from] sqlx::Error),

    #[error("store: {0}")]
    Store(#[from] StoreError),

    #[error("peer client: {0}")]
    Rpc(#[from] RpcError),

    #[error("notifications: {0}")]
    Notify(#[from] NotifyError),

    #[error("catalog seed {path}: {source}")]
    Seed {
        path: String,
        source: std::io::Error,
    },

    #[cfg(feature = "redis")]
    #[error("redis: {0}")]
    Redis(#[from] fulfillment_infra::event_bus::RedisBusError),
}

pub struct CatalogServices {
    pub validator: CatalogValidator,
    pub bus: Arc<dyn NoticeBus>,
}

impl CatalogServices {
    pub fn new(store: Arc<dyn CatalogStore>, bus: Arc<dyn NoticeBus>) -> Self {
        Self {
            validator: CatalogValidator::new(store),
            bus,
        }
    }
}

pub struct OrderServices {
    pub ledger: Arc<OrderLedger>,
    pub bus: Arc<dyn NoticeBus>,
}

pub struct DeliveryServices {
    pub dispatcher: DeliveryDispatcher,
    pub bus: Arc<dyn NoticeBus>,
}

pub async fn build_catalog_services(config: &CatalogConfig) -> Result<CatalogServices, BootstrapError> {
    let bus = build_bus(config.redis_url.as_deref())?;

    let store: Arc<dyn CatalogStore> = match &config.database_url {
        Some(url) => {
            let pool = connect(url, CATALOG_SCHEMA).await?;
            Arc::new(PostgresCatalogStore::new(pool))
        }
        None => match &config.seed_path {
            Some(path) => {
                let raw = tokio::fs::read_to_string(path)
                    .await
                    .map_err(|source| BootstrapError::Seed {
                        path: path.display().to_string(),
                        source,
                    })?;
                info!(path = %path.display(), "catalog seeded from file");
                Arc::new(InMemoryCatalogStore::from_json(&raw)?)
            }
            None => {
                warn!("no DATABASE_URL or CATALOG_SEED_PATH; catalog starts empty");
                Arc::new(InMemoryCatalogStore::new())
            }
        },
    };

    Ok(CatalogServices::new(store, bus))
}

pub async fn build_order_services(config: &OrderServiceConfig) -> Result<OrderServices, BootstrapError> {
    let bus = build_bus(config.redis_url.as_deref())?;

    let store: Arc<dyn OrderStore> = match &config.database_url {
        Some(url) => Arc::new(PostgresOrderStore::new(connect(url, ORDER_SCHEMA).await?)),
        None => Arc::new(InMemoryOrderStore::new()),
    };
    let catalog = Arc::new(HttpCatalogClient::new(
        config.catalog_rpc_url.clone(),
        config.catalog_deadline,
    )?);

    let ledger = OrderLedger::new(store, catalog, bus.clone())
        .with_catalog_deadline(config.catalog_deadline)
        .with_notifier(build_notifier(config)?);

    Ok(OrderServices {
        ledger: Arc::new(ledger),
        bus,
    })
}

pub async fn build_delivery_services(
    config: &DeliveryServiceConfig,
) -> Result<DeliveryServices, BootstrapError> {
    let bus = build_bus(config.redis_url.as_deref())?;

    let store: Arc<dyn DeliveryStore> = match &config.database_url {
        Some(url) => Arc::new(PostgresDeliveryStore::new(connect(url, DELIVERY_SCHEMA).await?)),
        None => Arc::new(InMemoryDeliveryStore::new()),
    };
    let ledger = Arc::new(HttpOrderLedgerClient::new(
        config.order_service_url.clone(),
        config.order_deadline,
    )?);

    let dispatcher = DeliveryDispatcher::new(store, ledger, bus.clone()).with_ledger_deadline(config.order_deadline);

    Ok(DeliveryServices { dispatcher, bus })
}

async fn connect(url: &str, schema: &str) -> Result<PgPool, BootstrapError> {
    let pool = PgPoolOptions::new().max_connections(10).connect(url).await?;
    ensure_schema(&pool, schema).await?;
    info!("connected to postgres");
    Ok(pool)
}

fn build_notifier(config: &OrderServiceConfig) -> Result<OrderNotifier, BootstrapError> {
    let Some(url) = &config.notification_url else {
        info!("NOTIFICATION_SERVICE_URL not set; notifications disabled");
        return Ok(OrderNotifier::disabled());
    };

    let directory: Arc<dyn IdentityDirectory> = match &config.identity_url {
        Some(identity) => Arc::new(HttpIdentityDirectory::new(identity.clone(), NOTIFICATION_TIMEOUT)?),
        None => Arc::new(NoDirectory),
    };
    let sink = Arc::new(HttpNotificationSink::new(url.clone(), NOTIFICATION_TIMEOUT)?);

    Ok(OrderNotifier::new(directory, sink))
}

#[cfg(feature = "redis")]
fn build_bus(redis_url: Option<&str>) -> Result<Arc<dyn NoticeBus>, BootstrapError> {
    use fulfillment_infra::event_bus::RedisPubSubEventBus;

    match redis_url {
        Some(url) => {
            info!("change notices bridged over redis");
            Ok(Arc::new(RedisPubSubEventBus::new(url)?))
        }
        None => Ok(in_process_bus()),
    }
}

#[cfg(not(feature = "redis"))]
fn build_bus(redis_url: Option<&str>) -> Result<Arc<dyn NoticeBus>, BootstrapError> {
    if redis_url.is_some() {
        warn!("REDIS_URL set but redis feature not enabled; using in-process fan-out");
    }
    Ok(in_process_bus())
}

pub fn in_process_bus() -> Arc<dyn NoticeBus> {
    Arc::new(InMemoryEventBus::<ChangeNotice>::new())
}
