//! Status Synchronizer: mirrors delivery progress onto the order.
//!
//! One outbound call per delivery change, no retries. Whatever happens to
//! that call, the delivery change that triggered it stands.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{info, warn};

use fulfillment_core::{Caller, Role};
use fulfillment_delivery::{DeliveryChanged, DeliveryTransition};
use fulfillment_orders::OrderStatus;

use crate::ledger::StatusChange;
use crate::rpc::{OrderLedgerClient, RpcError};

/// Default bound on the call into the order ledger.
pub const DEFAULT_SYNC_DEADLINE: Duration = Duration::from_secs(5);

/// What became of one synchronization attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum SyncOutcome {
    /// The order now carries `status`.
    Applied { status: OrderStatus },
    /// This kind of delivery change has no order-side counterpart.
    Skipped,
    /// The call was made and did not succeed; logged and dropped.
    Failed { status: OrderStatus, reason: String },
}

impl SyncOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, SyncOutcome::Applied { .. })
    }
}

/// Order status a delivery change maps to, if any.
///
/// Reassignment leaves the order alone: it is already on its way or waiting
/// for a courier, and the order lifecycle has no state for "courier swapped".
pub fn target_status(transition: DeliveryTransition) -> Option<OrderStatus> {
    match transition {
        DeliveryTransition::Accepted | DeliveryTransition::Started => Some(OrderStatus::EnCamino),
        DeliveryTransition::Completed => Some(OrderStatus::Entregado),
        DeliveryTransition::Cancelled => Some(OrderStatus::Cancelado),
        DeliveryTransition::Assigned | DeliveryTransition::Reassigned => None,
    }
}

#[derive(Clone)]
pub struct StatusSynchronizer {
    ledger: Arc<dyn OrderLedgerClient>,
    deadline: Duration,
}

impl StatusSynchronizer {
    pub fn new(ledger: Arc<dyn OrderLedgerClient>) -> Self {
        Self {
            ledger,
            deadline: DEFAULT_SYNC_DEADLINE,
        }
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    /// Push `change` to the order ledger as the dispatcher, acting for
    /// `actor`. Never fails; the outcome is for logging and tests.
    pub async fn project(&self, change: &DeliveryChanged, actor: &Caller) -> SyncOutcome {
        let Some(status) = target_status(change.transition) else {
            return SyncOutcome::Skipped;
        };

        let mut on_behalf_of = Caller::new(actor.user_id, Role::Dispatcher);
        if let Some(name) = change.actor_name.clone().or_else(|| actor.display_name.clone()) {
            on_behalf_of = on_behalf_of.with_display_name(name);
        }
        let request = StatusChange::to(status).with_reason(change.reason.clone());

        let call = self.ledger.update_status(&on_behalf_of, change.order_id, request);
        let result = match tokio::time::timeout(self.deadline, call).await {
            Ok(Err(RpcError::Rejected { status: code, message })) => {
                // The order may already be there, e.g. a start after a reassignment.
                match self.current_status(&on_behalf_of, change).await {
                    Some(current) if current == status => {
                        info!(
                            order_id = %change.order_id,
                            delivery_id = %change.delivery_id,
                            %status,
                            "order already at target status"
                        );
                        return SyncOutcome::Applied { status };
                    }
                    _ => Err(RpcError::Rejected { status: code, message }),
                }
            }
            Ok(result) => result,
            Err(_) => Err(RpcError::DeadlineExceeded(self.deadline)),
        };

        match result {
            Ok(order) => {
                info!(
                    order_id = %change.order_id,
                    delivery_id = %change.delivery_id,
                    status = %order.status,
                    "order status synchronized"
                );
                SyncOutcome::Applied {
                    status: order.status,
                }
            }
            Err(e) => {
                warn!(
                    order_id = %change.order_id,
                    delivery_id = %change.delivery_id,
                    %status,
                    error = %e,
                    "order status sync failed"
                );
                SyncOutcome::Failed {
                    status,
                    reason: e.to_string(),
                }
            }
        }
    }

    async fn current_status(&self, on_behalf_of: &Caller, change: &DeliveryChanged) -> Option<OrderStatus> {
        let call = self.ledger.get_order(on_behalf_of, change.order_id);
        match tokio::time::timeout(self.deadline, call).await {
            Ok(Ok(Some(order))) => Some(order.status),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::Utc;
    use fulfillment_core::{DeliveryId, OrderId, UserId};
    use fulfillment_delivery::DeliveryStatus;
    use fulfillment_orders::Order;

    /// Records calls; answers with a canned error.
    #[derive(Default)]
    struct RecordingLedger {
        calls: Mutex<Vec<(Caller, OrderId, StatusChange)>>,
    }

    #[async_trait]
    impl OrderLedgerClient for RecordingLedger {
        async fn get_order(&self, _: &Caller, _: OrderId) -> Result<Option<Order>, RpcError> {
            Ok(None)
        }

        async fn list_orders_by_status(&self, _: &Caller, _: OrderStatus) -> Result<Vec<Order>, RpcError> {
            Ok(Vec::new())
        }

        async fn update_status(
            &self,
            on_behalf_of: &Caller,
            id: OrderId,
            change: StatusChange,
        ) -> Result<Order, RpcError> {
            self.calls
                .lock()
                .unwrap()
                .push((on_behalf_of.clone(), id, change));
            Err(RpcError::Unavailable("connection refused".into()))
        }
    }

    fn changed(transition: DeliveryTransition, reason: Option<&str>) -> DeliveryChanged {
        DeliveryChanged {
            delivery_id: DeliveryId::new(1),
            order_id: OrderId::new(7),
            courier_id: UserId::new(40),
            transition,
            from: Some(DeliveryStatus::EnCamino),
            to: DeliveryStatus::Cancelado,
            actor_name: Some("Luis".to_string()),
            reason: reason.map(str::to_string),
            occurred_at: Utc::now(),
        }
    }

    #[test]
    fn delivery_transitions_map_onto_order_statuses() {
        assert_eq!(target_status(DeliveryTransition::Accepted), Some(OrderStatus::EnCamino));
        assert_eq!(target_status(DeliveryTransition::Started), Some(OrderStatus::EnCamino));
        assert_eq!(target_status(DeliveryTransition::Completed), Some(OrderStatus::Entregado));
        assert_eq!(target_status(DeliveryTransition::Cancelled), Some(OrderStatus::Cancelado));
        assert_eq!(target_status(DeliveryTransition::Reassigned), None);
        assert_eq!(target_status(DeliveryTransition::Assigned), None);
    }

    #[tokio::test]
    async fn failure_is_reported_not_raised() {
        let ledger = Arc::new(RecordingLedger::default());
        let sync = StatusSynchronizer::new(ledger.clone());
        let actor = Caller::new(UserId::new(40), Role::Courier);

        let outcome = sync
            .project(&changed(DeliveryTransition::Cancelled, Some("flat tyre")), &actor)
            .await;
        assert!(matches!(
            outcome,
            SyncOutcome::Failed { status: OrderStatus::Cancelado, .. }
        ));

        let calls = ledger.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        let (caller, id, change) = &calls[0];
        assert_eq!(caller.role, Role::Dispatcher);
        assert_eq!(caller.user_id, UserId::new(40));
        assert_eq!(caller.display_name.as_deref(), Some("Luis"));
        assert_eq!(*id, OrderId::new(7));
        assert_eq!(change.reason.as_deref(), Some("flat tyre"));
    }

    #[tokio::test]
    async fn reassignment_makes_no_call() {
        let ledger = Arc::new(RecordingLedger::default());
        let sync = StatusSynchronizer::new(ledger.clone());
        let actor = Caller::new(UserId::new(1), Role::Admin);

        let outcome = sync.project(&changed(DeliveryTransition::Reassigned, None), &actor).await;
        assert_eq!(outcome, SyncOutcome::Skipped);
        assert!(ledger.calls.lock().unwrap().is_empty());
    }
}
