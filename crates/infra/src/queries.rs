//! Read-side queries that span two services.

use tracing::instrument;

use fulfillment_core::{Caller, OrderId};
use fulfillment_orders::{Order, OrderStatus};

use crate::error::ServiceError;
use crate::rpc::OrderLedgerClient;
use crate::store::DeliveryStore;

/// Orders a courier could pick up: FINALIZADA on the ledger and without a
/// non-cancelled delivery here.
///
/// Computed at read time from two sources with no shared snapshot, so an
/// order may be accepted by someone else between listing and accepting; the
/// accept call settles that with a conflict.
#[instrument(skip(ledger, deliveries, caller), fields(user_id = %caller.user_id))]
pub async fn available_orders(
    ledger: &dyn OrderLedgerClient,
    deliveries: &dyn DeliveryStore,
    caller: &Caller,
) -> Result<Vec<Order>, ServiceError> {
    let ready = ledger
        .list_orders_by_status(caller, OrderStatus::Finalizada)
        .await
        .map_err(|e| ServiceError::upstream("order-ledger", &e))?;
    if ready.is_empty() {
        return Ok(ready);
    }

    let ids: Vec<OrderId> = ready.iter().map(|o| o.id).collect();
    let taken = deliveries.orders_with_live_delivery(&ids).await?;

    Ok(ready.into_iter().filter(|o| !taken.contains(&o.id)).collect())
}
