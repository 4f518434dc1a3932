//! Delivery Dispatcher service.
//!
//! Owns deliveries and drives the order side through the
//! [`StatusSynchronizer`]. Each mutation is: load, apply the domain
//! transition, compare-and-set write back, then sync and publish. No lock or
//! transaction is held across the outbound call.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tracing::{info, instrument};

use fulfillment_core::{Caller, DeliveryId, DomainResult, ExpectedVersion, OrderId, Role, UserId};
use fulfillment_delivery::{Delivery, DeliveryChanged, DeliveryTransition, NewDelivery};
use fulfillment_events::{ChangeNotice, Topic};
use fulfillment_orders::{Order, OrderStatus};

use crate::error::ServiceError;
use crate::event_bus::NoticeBus;
use crate::queries;
use crate::rpc::{OrderLedgerClient, RpcError};
use crate::store::{DeliveryFilter, DeliveryStore, StoreError};
use crate::sync::{StatusSynchronizer, SyncOutcome, DEFAULT_SYNC_DEADLINE};

/// A delivery after a mutation, plus what happened on the order side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryOutcome {
    pub delivery: Delivery,
    pub order_sync: SyncOutcome,
}

pub struct DeliveryDispatcher {
    store: Arc<dyn DeliveryStore>,
    ledger: Arc<dyn OrderLedgerClient>,
    ledger_deadline: Duration,
    sync: StatusSynchronizer,
    bus: Arc<dyn NoticeBus>,
}

impl DeliveryDispatcher {
    pub fn new(
        store: Arc<dyn DeliveryStore>,
        ledger: Arc<dyn OrderLedgerClient>,
        bus: Arc<dyn NoticeBus>,
    ) -> Self {
        Self {
            sync: StatusSynchronizer::new(ledger.clone()),
            store,
            ledger,
            ledger_deadline: DEFAULT_SYNC_DEADLINE,
            bus,
        }
    }

    /// Bound both the order lookup on accept and the status sync calls.
    pub fn with_ledger_deadline(mut self, deadline: Duration) -> Self {
        self.ledger_deadline = deadline;
        self.sync = self.sync.with_deadline(deadline);
        self
    }

    /// Direct assignment by an admin or the restaurant.
    #[instrument(skip(self, caller), fields(role = %caller.role))]
    pub async fn create_delivery(
        &self,
        caller: &Caller,
        order_id: OrderId,
        courier_id: UserId,
    ) -> Result<DeliveryOutcome, ServiceError> {
        if !matches!(caller.role, Role::Admin | Role::Restaurant) {
            return Err(ServiceError::Forbidden(format!(
                "role {} may not assign deliveries",
                caller.role
            )));
        }
        self.ensure_order_free(order_id).await?;

        let delivery = self
            .insert(NewDelivery::assigned(order_id, courier_id, Utc::now()))
            .await?;
        let change = delivery.created_event(DeliveryTransition::Assigned, caller);
        Ok(self.finish(delivery, &change, caller).await)
    }

    /// A courier takes a FINALIZADA order and sets off immediately.
    #[instrument(skip(self, caller), fields(courier_id = %caller.user_id))]
    pub async fn accept(&self, caller: &Caller, order_id: OrderId) -> Result<DeliveryOutcome, ServiceError> {
        if caller.role != Role::Courier {
            return Err(ServiceError::Forbidden(
                "only couriers may accept orders".to_string(),
            ));
        }
        self.ensure_order_free(order_id).await?;

        let order = self.fetch_order(caller, order_id).await?;
        if order.status != OrderStatus::Finalizada {
            return Err(ServiceError::InvalidTransition {
                entity: "order",
                from: order.status.to_string(),
                to: OrderStatus::EnCamino.to_string(),
            });
        }

        let delivery = self
            .insert(NewDelivery::accepted(order_id, caller.user_id, Utc::now()))
            .await?;
        let change = delivery.created_event(DeliveryTransition::Accepted, caller);
        Ok(self.finish(delivery, &change, caller).await)
    }

    pub async fn start(&self, caller: &Caller, id: DeliveryId) -> Result<DeliveryOutcome, ServiceError> {
        self.apply(caller, id, |d| d.start(caller, Utc::now())).await
    }

    pub async fn complete(&self, caller: &Caller, id: DeliveryId) -> Result<DeliveryOutcome, ServiceError> {
        self.apply(caller, id, |d| d.complete(caller, Utc::now())).await
    }

    pub async fn cancel(
        &self,
        caller: &Caller,
        id: DeliveryId,
        reason: Option<String>,
    ) -> Result<DeliveryOutcome, ServiceError> {
        self.apply(caller, id, |d| d.cancel(caller, reason, Utc::now())).await
    }

    pub async fn reassign(
        &self,
        caller: &Caller,
        id: DeliveryId,
        new_courier: UserId,
    ) -> Result<DeliveryOutcome, ServiceError> {
        self.apply(caller, id, |d| d.reassign(caller, new_courier, Utc::now()))
            .await
    }

    pub async fn get(&self, id: DeliveryId) -> Result<Delivery, ServiceError> {
        self.load(id).await
    }

    /// Every delivery ever made for the order, cancelled ones included.
    pub async fn by_order(&self, order_id: OrderId) -> Result<Vec<Delivery>, ServiceError> {
        self.list(DeliveryFilter {
            order_id: Some(order_id),
            ..DeliveryFilter::default()
        })
        .await
    }

    pub async fn by_courier(&self, caller: &Caller, courier_id: UserId) -> Result<Vec<Delivery>, ServiceError> {
        ensure_own_courier(caller, courier_id)?;
        self.list(DeliveryFilter {
            courier_id: Some(courier_id),
            ..DeliveryFilter::default()
        })
        .await
    }

    /// ASIGNADO or EN_CAMINO deliveries of one courier.
    pub async fn active_by_courier(
        &self,
        caller: &Caller,
        courier_id: UserId,
    ) -> Result<Vec<Delivery>, ServiceError> {
        ensure_own_courier(caller, courier_id)?;
        self.list(DeliveryFilter {
            courier_id: Some(courier_id),
            active_only: true,
            ..DeliveryFilter::default()
        })
        .await
    }

    pub async fn list_all(&self) -> Result<Vec<Delivery>, ServiceError> {
        self.list(DeliveryFilter::default()).await
    }

    pub async fn available_orders(&self, caller: &Caller) -> Result<Vec<Order>, ServiceError> {
        queries::available_orders(self.ledger.as_ref(), self.store.as_ref(), &as_dispatcher(caller)).await
    }

    async fn list(&self, filter: DeliveryFilter) -> Result<Vec<Delivery>, ServiceError> {
        Ok(self.store.list_deliveries(&filter).await?)
    }

    async fn load(&self, id: DeliveryId) -> Result<Delivery, ServiceError> {
        self.store
            .get_delivery(id)
            .await?
            .ok_or_else(|| ServiceError::not_found("delivery", id))
    }

    /// Friendly early error; the store constraint is what actually decides.
    async fn ensure_order_free(&self, order_id: OrderId) -> Result<(), ServiceError> {
        match self.store.live_delivery_for_order(order_id).await? {
            Some(existing) => Err(ServiceError::Conflict(format!(
                "order {} already has delivery {} ({})",
                order_id, existing.id, existing.status
            ))),
            None => Ok(()),
        }
    }

    async fn insert(&self, new: NewDelivery) -> Result<Delivery, ServiceError> {
        let order_id = new.order_external_id;
        match self.store.insert_delivery(new).await {
            Ok(d) => Ok(d),
            Err(StoreError::Conflict(_)) => Err(ServiceError::Conflict(format!(
                "order {order_id} already has a delivery"
            ))),
            Err(e) => Err(e.into()),
        }
    }

    async fn fetch_order(&self, caller: &Caller, order_id: OrderId) -> Result<Order, ServiceError> {
        let dispatcher = as_dispatcher(caller);
        let call = self.ledger.get_order(&dispatcher, order_id);
        let found = match tokio::time::timeout(self.ledger_deadline, call).await {
            Ok(result) => result,
            Err(_) => Err(RpcError::DeadlineExceeded(self.ledger_deadline)),
        }
        .map_err(|e| ServiceError::upstream("order-ledger", &e))?;

        found.ok_or_else(|| ServiceError::not_found("order", order_id))
    }

    async fn apply<F>(&self, caller: &Caller, id: DeliveryId, transition: F) -> Result<DeliveryOutcome, ServiceError>
    where
        F: FnOnce(&mut Delivery) -> DomainResult<DeliveryChanged>,
    {
        let mut delivery = self.load(id).await?;
        let expected = ExpectedVersion::Exact(delivery.version);
        let change = transition(&mut delivery)?;
        self.store.save_delivery(&delivery, expected).await?;
        Ok(self.finish(delivery, &change, caller).await)
    }

    /// Sync the order, then tell observers. Neither step can fail the call.
    async fn finish(&self, delivery: Delivery, change: &DeliveryChanged, caller: &Caller) -> DeliveryOutcome {
        let order_sync = self.sync.project(change, caller).await;

        let mut notice = ChangeNotice::new(Topic::DeliveryUpdated, delivery.id, delivery.status)
            .with("type", change.transition.as_str())
            .with("orderId", delivery.order_external_id.get())
            .with("courierId", delivery.courier_id.get());
        if let Some(reason) = &change.reason {
            notice = notice.with("reason", reason.clone());
        }
        self.bus.publish_notice(notice);

        info!(
            delivery_id = %delivery.id,
            order_id = %delivery.order_external_id,
            transition = %change.transition,
            status = %delivery.status,
            synced = order_sync.is_applied(),
            "delivery updated"
        );

        DeliveryOutcome { delivery, order_sync }
    }
}

/// Identity the dispatcher presents to the order ledger.
fn as_dispatcher(caller: &Caller) -> Caller {
    let service = Caller::new(caller.user_id, Role::Dispatcher);
    match &caller.display_name {
        Some(name) => service.with_display_name(name.clone()),
        None => service,
    }
}

fn ensure_own_courier(caller: &Caller, courier_id: UserId) -> Result<(), ServiceError> {
    if caller.role == Role::Courier && caller.user_id != courier_id {
        return Err(ServiceError::Forbidden(
            "couriers may only list their own deliveries".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use fulfillment_catalog::{MenuItem, Restaurant};
    use fulfillment_core::{MenuItemId, RestaurantId};
    use fulfillment_delivery::DeliveryStatus;
    use fulfillment_events::{ChangeNotice, EventBus, InMemoryEventBus};
    use rust_decimal_macros::dec;

    use crate::catalog_service::CatalogValidator;
    use crate::ledger::{CreateOrder, OrderLedger, OrderLine, StatusChange};
    use crate::store::{InMemoryCatalogStore, InMemoryDeliveryStore, InMemoryOrderStore};

    struct World {
        ledger: Arc<OrderLedger>,
        dispatcher: DeliveryDispatcher,
        bus: Arc<InMemoryEventBus<ChangeNotice>>,
    }

    fn world() -> World {
        let catalog = InMemoryCatalogStore::new();
        catalog.upsert_restaurant(Restaurant {
            id: RestaurantId::new(1),
            name: "Casa".to_string(),
            address: "Calle 1".to_string(),
            is_active: true,
        });
        catalog.upsert_menu_item(MenuItem {
            id: MenuItemId::new(10),
            restaurant_id: RestaurantId::new(1),
            name: "Taco".to_string(),
            price: dec!(10.00),
            is_available: true,
        });
        let bus = Arc::new(InMemoryEventBus::new());
        let ledger = Arc::new(OrderLedger::new(
            Arc::new(InMemoryOrderStore::new()),
            Arc::new(CatalogValidator::new(Arc::new(catalog))),
            bus.clone(),
        ));
        let dispatcher = DeliveryDispatcher::new(
            Arc::new(InMemoryDeliveryStore::new()),
            ledger.clone(),
            bus.clone(),
        );
        World { ledger, dispatcher, bus }
    }

    fn admin() -> Caller {
        Caller::new(UserId::new(1), Role::Admin)
    }

    fn courier(id: i64) -> Caller {
        Caller::new(UserId::new(id), Role::Courier).with_display_name(format!("courier-{id}"))
    }

    async fn order_in(world: &World, status: OrderStatus) -> OrderId {
        let client = Caller::new(UserId::new(100), Role::Client);
        let order = world
            .ledger
            .create_order(
                &client,
                CreateOrder {
                    restaurant_id: Some(RestaurantId::new(1)),
                    items: vec![OrderLine {
                        menu_item_id: Some(MenuItemId::new(10)),
                        price: Some(dec!(10.00)),
                        quantity: Some(1),
                    }],
                    ..CreateOrder::default()
                },
            )
            .await
            .unwrap()
            .order;
        let restaurant = Caller::new(UserId::new(200), Role::Restaurant);
        let path: &[OrderStatus] = match status {
            OrderStatus::Creada => &[],
            OrderStatus::EnProceso => &[OrderStatus::EnProceso],
            OrderStatus::Finalizada => &[OrderStatus::EnProceso, OrderStatus::Finalizada],
            other => panic!("test helper cannot reach {other}"),
        };
        for step in path {
            world
                .ledger
                .update_status(&restaurant, order.id, StatusChange::to(*step))
                .await
                .unwrap();
        }
        order.id
    }

    async fn order_status(world: &World, id: OrderId) -> OrderStatus {
        world.ledger.get(&admin(), id).await.unwrap().status
    }

    #[tokio::test]
    async fn accept_moves_both_sides_to_en_camino_and_second_accept_conflicts() {
        let w = world();
        let order_id = order_in(&w, OrderStatus::Finalizada).await;
        let sub = w.bus.subscribe();

        let outcome = w.dispatcher.accept(&courier(40), order_id).await.unwrap();
        assert_eq!(outcome.delivery.status, DeliveryStatus::EnCamino);
        assert!(outcome.delivery.started_at.is_some());
        assert_eq!(outcome.order_sync, SyncOutcome::Applied { status: OrderStatus::EnCamino });
        assert_eq!(order_status(&w, order_id).await, OrderStatus::EnCamino);

        let topics: Vec<Topic> = std::iter::from_fn(|| sub.try_recv().ok()).map(|n| n.topic()).collect();
        assert!(topics.contains(&Topic::DeliveryUpdated));
        assert!(topics.contains(&Topic::OrderStatusChanged));

        let err = w.dispatcher.accept(&courier(41), order_id).await.unwrap_err();
        assert!(matches!(err, ServiceError::Conflict(_)), "{err:?}");
    }

    #[tokio::test]
    async fn accept_requires_a_finalized_known_order() {
        let w = world();
        let order_id = order_in(&w, OrderStatus::EnProceso).await;

        let err = w.dispatcher.accept(&courier(40), order_id).await.unwrap_err();
        match err {
            ServiceError::InvalidTransition { entity, from, to } => {
                assert_eq!(entity, "order");
                assert_eq!(from, "EN_PROCESO");
                assert_eq!(to, "EN_CAMINO");
            }
            other => panic!("expected InvalidTransition, got {other:?}"),
        }

        let err = w.dispatcher.accept(&courier(40), OrderId::new(999)).await.unwrap_err();
        assert!(matches!(err, ServiceError::NotFound { entity: "order", .. }), "{err:?}");
        assert!(w.dispatcher.list_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn complete_then_cancel_is_rejected() {
        let w = world();
        let order_id = order_in(&w, OrderStatus::Finalizada).await;
        let id = w.dispatcher.accept(&courier(40), order_id).await.unwrap().delivery.id;

        let done = w.dispatcher.complete(&courier(40), id).await.unwrap();
        assert_eq!(done.delivery.status, DeliveryStatus::Entregado);
        assert!(done.delivery.duration_minutes().is_some());
        assert_eq!(order_status(&w, order_id).await, OrderStatus::Entregado);

        let err = w.dispatcher.cancel(&courier(40), id, None).await.unwrap_err();
        assert!(matches!(err, ServiceError::InvalidTransition { .. }), "{err:?}");
        assert_eq!(order_status(&w, order_id).await, OrderStatus::Entregado);
    }

    #[tokio::test]
    async fn couriers_cannot_touch_each_others_deliveries() {
        let w = world();
        let order_id = order_in(&w, OrderStatus::Finalizada).await;
        let id = w.dispatcher.accept(&courier(40), order_id).await.unwrap().delivery.id;

        let err = w.dispatcher.complete(&courier(41), id).await.unwrap_err();
        assert!(matches!(err, ServiceError::Forbidden(_)));
        let err = w.dispatcher.by_courier(&courier(41), UserId::new(40)).await.unwrap_err();
        assert!(matches!(err, ServiceError::Forbidden(_)));

        // Admins act on anyone's delivery.
        w.dispatcher.complete(&admin(), id).await.unwrap();
    }

    #[tokio::test]
    async fn failed_sync_keeps_the_delivery_change() {
        let w = world();
        // Order still in CREADA: the ledger will refuse EN_CAMINO.
        let order_id = order_in(&w, OrderStatus::Creada).await;
        let assigned = w
            .dispatcher
            .create_delivery(&admin(), order_id, UserId::new(40))
            .await
            .unwrap();
        assert_eq!(assigned.order_sync, SyncOutcome::Skipped);

        let started = w.dispatcher.start(&courier(40), assigned.delivery.id).await.unwrap();
        assert_eq!(started.delivery.status, DeliveryStatus::EnCamino);
        assert!(matches!(started.order_sync, SyncOutcome::Failed { .. }));

        let stored = w.dispatcher.get(assigned.delivery.id).await.unwrap();
        assert_eq!(stored.status, DeliveryStatus::EnCamino);
        assert_eq!(order_status(&w, order_id).await, OrderStatus::Creada);
    }

    #[tokio::test]
    async fn available_orders_excludes_orders_with_live_deliveries() {
        let w = world();
        let taken = order_in(&w, OrderStatus::Finalizada).await;
        let free = order_in(&w, OrderStatus::Finalizada).await;
        let _not_ready = order_in(&w, OrderStatus::EnProceso).await;

        let assigned = w
            .dispatcher
            .create_delivery(&admin(), taken, UserId::new(40))
            .await
            .unwrap();

        let ids: Vec<OrderId> = w
            .dispatcher
            .available_orders(&courier(41))
            .await
            .unwrap()
            .into_iter()
            .map(|o| o.id)
            .collect();
        assert_eq!(ids, vec![free]);

        // Cancelling the delivery cancels the order as well.
        w.dispatcher
            .cancel(&admin(), assigned.delivery.id, Some("courier sick".to_string()))
            .await
            .unwrap();
        assert_eq!(order_status(&w, taken).await, OrderStatus::Cancelado);
        let active = w.dispatcher.active_by_courier(&admin(), UserId::new(40)).await.unwrap();
        assert!(active.is_empty());
    }

    #[tokio::test]
    async fn reassign_resets_to_assigned_without_touching_the_order() {
        let w = world();
        let order_id = order_in(&w, OrderStatus::Finalizada).await;
        let id = w.dispatcher.accept(&courier(40), order_id).await.unwrap().delivery.id;

        let err = w.dispatcher.reassign(&courier(40), id, UserId::new(41)).await.unwrap_err();
        assert!(matches!(err, ServiceError::Forbidden(_)));

        let moved = w.dispatcher.reassign(&admin(), id, UserId::new(41)).await.unwrap();
        assert_eq!(moved.delivery.status, DeliveryStatus::Asignado);
        assert_eq!(moved.delivery.courier_id, UserId::new(41));
        assert!(moved.delivery.started_at.is_none());
        assert_eq!(moved.order_sync, SyncOutcome::Skipped);
        assert_eq!(order_status(&w, order_id).await, OrderStatus::EnCamino);
        assert_eq!(w.dispatcher.by_order(order_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn start_after_reassignment_finds_the_order_already_en_camino() {
        let w = world();
        let order_id = order_in(&w, OrderStatus::Finalizada).await;
        let id = w.dispatcher.accept(&courier(40), order_id).await.unwrap().delivery.id;
        w.dispatcher.reassign(&admin(), id, UserId::new(41)).await.unwrap();

        let started = w.dispatcher.start(&courier(41), id).await.unwrap();
        assert_eq!(started.delivery.status, DeliveryStatus::EnCamino);
        assert_eq!(started.order_sync, SyncOutcome::Applied { status: OrderStatus::EnCamino });
        assert_eq!(order_status(&w, order_id).await, OrderStatus::EnCamino);

        let done = w.dispatcher.complete(&courier(41), id).await.unwrap();
        assert_eq!(done.order_sync, SyncOutcome::Applied { status: OrderStatus::Entregado });
    }

    /// Ledger that never answers.
    struct SilentLedger(Mutex<usize>);

    #[async_trait]
    impl OrderLedgerClient for SilentLedger {
        async fn get_order(&self, _: &Caller, _: OrderId) -> Result<Option<Order>, RpcError> {
            *self.0.lock().unwrap() += 1;
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(None)
        }

        async fn list_orders_by_status(&self, _: &Caller, _: OrderStatus) -> Result<Vec<Order>, RpcError> {
            Err(RpcError::Unavailable("down".into()))
        }

        async fn update_status(&self, _: &Caller, _: OrderId, _: StatusChange) -> Result<Order, RpcError> {
            Err(RpcError::Unavailable("down".into()))
        }
    }

    #[tokio::test]
    async fn unreachable_ledger_is_an_upstream_error() {
        let ledger = Arc::new(SilentLedger(Mutex::new(0)));
        let dispatcher = DeliveryDispatcher::new(
            Arc::new(InMemoryDeliveryStore::new()),
            ledger.clone(),
            Arc::new(InMemoryEventBus::<ChangeNotice>::new()),
        )
        .with_ledger_deadline(Duration::from_millis(50));

        let err = dispatcher.accept(&courier(40), OrderId::new(1)).await.unwrap_err();
        assert!(matches!(err, ServiceError::UpstreamUnavailable { service: "order-ledger", .. }));
        assert_eq!(*ledger.0.lock().unwrap(), 1);

        let err = dispatcher.available_orders(&courier(40)).await.unwrap_err();
        assert!(err.is_retryable());
        assert!(dispatcher.list_all().await.unwrap().is_empty());
    }
}
