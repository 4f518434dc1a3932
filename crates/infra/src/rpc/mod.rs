//! Typed calls between services.
//!
//! Both seams are traits so a service can talk to its peer over HTTP in
//! production and in-process in tests. Every remote call carries a deadline;
//! expiry is reported as [`RpcError::DeadlineExceeded`], never as a hang.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use fulfillment_catalog::{ValidationRequest, ValidationResult};
use fulfillment_core::{Caller, OrderId};
use fulfillment_orders::{Order, OrderStatus};

use crate::ledger::StatusChange;

pub mod catalog;
pub mod ledger;

pub use catalog::HttpCatalogClient;
pub use ledger::HttpOrderLedgerClient;

/// Path of the validation procedure on the catalog service.
pub const VALIDATE_ORDER_ITEMS_PATH: &str = "/rpc/catalog.v1.CatalogService/ValidateOrderItems";

/// Gateway identity headers, forwarded on service-to-service calls.
pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_ROLE_HEADER: &str = "x-user-role";
pub const USER_NAME_HEADER: &str = "x-user-name";

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("peer unreachable: {0}")]
    Unavailable(String),

    #[error("deadline of {0:?} exceeded")]
    DeadlineExceeded(Duration),

    /// The peer answered with something that does not decode.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The peer understood and refused the call.
    #[error("rejected with status {status}: {message}")]
    Rejected { status: u16, message: String },
}

impl RpcError {
    pub(crate) fn from_reqwest(err: reqwest::Error, deadline: Duration) -> Self {
        if err.is_timeout() {
            RpcError::DeadlineExceeded(deadline)
        } else if err.is_decode() {
            RpcError::Protocol(err.to_string())
        } else {
            RpcError::Unavailable(err.to_string())
        }
    }
}

/// Catalog-side procedure the order ledger calls before persisting anything.
#[async_trait]
pub trait CatalogRpc: Send + Sync {
    async fn validate_order_items(
        &self,
        request: &ValidationRequest,
    ) -> Result<ValidationResult, RpcError>;
}

/// What the delivery dispatcher needs from the order ledger.
///
/// `on_behalf_of` is forwarded as the gateway identity so the ledger applies
/// its own authority rules to the call.
#[async_trait]
pub trait OrderLedgerClient: Send + Sync {
    /// `Ok(None)` when the ledger does not know the order.
    async fn get_order(&self, on_behalf_of: &Caller, id: OrderId) -> Result<Option<Order>, RpcError>;

    async fn list_orders_by_status(
        &self,
        on_behalf_of: &Caller,
        status: OrderStatus,
    ) -> Result<Vec<Order>, RpcError>;

    async fn update_status(
        &self,
        on_behalf_of: &Caller,
        id: OrderId,
        change: StatusChange,
    ) -> Result<Order, RpcError>;
}
