//! Environment-driven configuration for the three services.
//!
//! Every value has a development default. `DATABASE_URL` unset means
//! in-memory stores; `REDIS_URL` unset means in-process fan-out only.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {var}: {reason}")]
    Invalid { var: &'static str, reason: String },
}

/// Catalog validator process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogConfig {
    pub bind: SocketAddr,
    pub database_url: Option<String>,
    /// JSON seed for the in-memory catalog (restaurants + menu items).
    pub seed_path: Option<PathBuf>,
    pub redis_url: Option<String>,
}

/// Order ledger process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderServiceConfig {
    pub bind: SocketAddr,
    pub database_url: Option<String>,
    pub catalog_rpc_url: String,
    pub catalog_deadline: Duration,
    pub notification_url: Option<String>,
    pub identity_url: Option<String>,
    pub redis_url: Option<String>,
}

/// Delivery dispatcher process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryServiceConfig {
    pub bind: SocketAddr,
    pub database_url: Option<String>,
    pub order_service_url: String,
    pub order_deadline: Duration,
    pub redis_url: Option<String>,
}

/// Timeout for best-effort calls to the notification and identity services.
pub const NOTIFICATION_TIMEOUT: Duration = Duration::from_secs(5);

impl CatalogConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        Ok(Self {
            bind: parse_or(&get, "CATALOG_BIND", "0.0.0.0:50052")?,
            database_url: non_empty(&get, "DATABASE_URL"),
            seed_path: non_empty(&get, "CATALOG_SEED_PATH").map(PathBuf::from),
            redis_url: non_empty(&get, "REDIS_URL"),
        })
    }
}

impl OrderServiceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        Ok(Self {
            bind: parse_or(&get, "ORDERS_BIND", "0.0.0.0:3003")?,
            database_url: non_empty(&get, "DATABASE_URL"),
            catalog_rpc_url: base_url(&get, "CATALOG_RPC_URL", "http://catalog-service:50052"),
            catalog_deadline: millis_or(&get, "CATALOG_RPC_DEADLINE_MS", 5_000)?,
            notification_url: non_empty(&get, "NOTIFICATION_SERVICE_URL")
                .map(|u| u.trim_end_matches('/').to_string()),
            identity_url: non_empty(&get, "IDENTITY_SERVICE_URL")
                .map(|u| u.trim_end_matches('/').to_string()),
            redis_url: non_empty(&get, "REDIS_URL"),
        })
    }
}

impl DeliveryServiceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        Ok(Self {
            bind: parse_or(&get, "DELIVERY_BIND", "0.0.0.0:3004")?,
            database_url: non_empty(&get, "DATABASE_URL"),
            order_service_url: base_url(&get, "ORDER_SERVICE_URL", "http://order-service:3003"),
            order_deadline: millis_or(&get, "ORDER_SYNC_DEADLINE_MS", 5_000)?,
            redis_url: non_empty(&get, "REDIS_URL"),
        })
    }
}

fn non_empty(get: &impl Fn(&str) -> Option<String>, var: &str) -> Option<String> {
    get(var).map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn base_url(get: &impl Fn(&str) -> Option<String>, var: &str, default: &str) -> String {
    non_empty(get, var)
        .unwrap_or_else(|| default.to_string())
        .trim_end_matches('/')
        .to_string()
}

fn parse_or<T>(
    get: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: &str,
) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw = non_empty(get, var).unwrap_or_else(|| default.to_string());
    raw.parse::<T>().map_err(|e| ConfigError::Invalid {
        var,
        reason: format!("{raw:?}: {e}"),
    })
}

fn millis_or(
    get: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: u64,
) -> Result<Duration, ConfigError> {
    let ms: u64 = parse_or(get, var, &default.to_string())?;
    if ms == 0 {
        return Err(ConfigError::Invalid {
            var,
            reason: "deadline must be greater than zero".to_string(),
        });
    }
    Ok(Duration::from_millis(ms))
}
