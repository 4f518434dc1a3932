//! Order Ledger service: order intake and the order status lifecycle.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use fulfillment_catalog::{RequestedItem, ValidationRequest, ValidationResult};
use fulfillment_core::{Caller, ExpectedVersion, MenuItemId, OrderId, RestaurantId, Role};
use fulfillment_events::{ChangeNotice, Topic};
use fulfillment_orders::{generate_order_number, NewOrder, Order, OrderStatus, PlaceOrder};

use crate::error::{FailedItem, ServiceError};
use crate::event_bus::NoticeBus;
use crate::notify::OrderNotifier;
use crate::rpc::{CatalogRpc, RpcError};
use crate::store::{OrderFilter, OrderStore, StoreError};

/// Default bound on the catalog validation call.
pub const DEFAULT_CATALOG_DEADLINE: Duration = Duration::from_secs(5);

/// Order numbers are random enough that a clash is rare; a few fresh draws
/// settle it.
const ORDER_NUMBER_ATTEMPTS: usize = 3;

/// One requested line as it arrives from the client. Everything is optional
/// here so missing fields can be reported together.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderLine {
    pub menu_item_id: Option<MenuItemId>,
    pub price: Option<Decimal>,
    pub quantity: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrder {
    pub restaurant_id: Option<RestaurantId>,
    #[serde(default)]
    pub items: Vec<OrderLine>,
    pub delivery_address: Option<String>,
    pub notes: Option<String>,
}

/// What the catalog confirmed for a created order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationSummary {
    pub catalog_validated: bool,
    pub items_validated: usize,
    pub server_total: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedOrder {
    pub order: Order,
    pub validation: ValidationSummary,
}

/// Requested status move, as sent to `PATCH /api/orders/:id/status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusChange {
    pub status: OrderStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl StatusChange {
    pub fn to(status: OrderStatus) -> Self {
        Self { status, reason: None }
    }

    pub fn with_reason(mut self, reason: Option<String>) -> Self {
        self.reason = reason;
        self
    }
}

pub struct OrderLedger {
    store: Arc<dyn OrderStore>,
    catalog: Arc<dyn CatalogRpc>,
    catalog_deadline: Duration,
    bus: Arc<dyn NoticeBus>,
    notifier: OrderNotifier,
}

impl OrderLedger {
    pub fn new(
        store: Arc<dyn OrderStore>,
        catalog: Arc<dyn CatalogRpc>,
        bus: Arc<dyn NoticeBus>,
    ) -> Self {
        Self {
            store,
            catalog,
            catalog_deadline: DEFAULT_CATALOG_DEADLINE,
            bus,
            notifier: OrderNotifier::disabled(),
        }
    }

    pub fn with_catalog_deadline(mut self, deadline: Duration) -> Self {
        self.catalog_deadline = deadline;
        self
    }

    pub fn with_notifier(mut self, notifier: OrderNotifier) -> Self {
        self.notifier = notifier;
        self
    }

    /// Validate against the catalog, then persist the order and its items in
    /// one step. Nothing is written unless the catalog accepts every item.
    #[instrument(skip(self, caller, cmd), fields(user_id = %caller.user_id, items = cmd.items.len()))]
    pub async fn create_order(&self, caller: &Caller, cmd: CreateOrder) -> Result<CreatedOrder, ServiceError> {
        if !matches!(caller.role, Role::Client | Role::Admin) {
            return Err(ServiceError::Forbidden(format!(
                "role {} may not place orders",
                caller.role
            )));
        }

        let request = validation_request(&cmd)?;
        let validation = self.validate_remotely(&request).await?;

        if !validation.valid {
            warn!(message = %validation.message, "order rejected by catalog");
            return Err(ServiceError::ValidationFailed {
                message: validation.message.clone(),
                failed_items: validation.failed_items().map(FailedItem::from).collect(),
            });
        }

        let order = self.persist(caller, &cmd, &validation).await?;

        self.bus.publish_notice(
            ChangeNotice::new(Topic::OrderCreated, order.id, order.status)
                .with("orderNumber", order.order_number.clone())
                .with("userId", order.user_id.get())
                .with("restaurantId", order.restaurant_id.get())
                .with("total", order.total.to_string()),
        );
        self.notifier.order_created(&order);

        info!(
            order_id = %order.id,
            order_number = %order.order_number,
            total = %order.total,
            "order created"
        );

        Ok(CreatedOrder {
            validation: ValidationSummary {
                catalog_validated: true,
                items_validated: validation.item_results.len(),
                server_total: validation.total_calculated,
            },
            order,
        })
    }

    async fn validate_remotely(&self, request: &ValidationRequest) -> Result<ValidationResult, ServiceError> {
        let call = self.catalog.validate_order_items(request);
        match tokio::time::timeout(self.catalog_deadline, call).await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(e)) => {
                warn!(error = %e, "catalog validation call failed");
                Err(ServiceError::upstream("catalog", &e))
            }
            Err(_) => {
                let e = RpcError::DeadlineExceeded(self.catalog_deadline);
                warn!(error = %e, "catalog validation call timed out");
                Err(ServiceError::upstream("catalog", &e))
            }
        }
    }

    async fn persist(
        &self,
        caller: &Caller,
        cmd: &CreateOrder,
        validation: &ValidationResult,
    ) -> Result<Order, ServiceError> {
        let restaurant_id = request_restaurant(cmd)?;
        let mut attempt = 0;
        loop {
            attempt += 1;
            // ThreadRng is not Send; keep it out of the await below.
            let order_number = generate_order_number(Utc::now(), &mut rand::thread_rng());
            let new_order = NewOrder::from_validation(
                PlaceOrder {
                    user_id: caller.user_id,
                    restaurant_id,
                    order_number,
                    delivery_address: cmd.delivery_address.clone(),
                    notes: cmd.notes.clone(),
                    placed_at: Utc::now(),
                },
                validation,
            )?;

            match self.store.insert_order(new_order).await {
                Ok(order) => return Ok(order),
                Err(StoreError::Conflict(msg)) if attempt < ORDER_NUMBER_ATTEMPTS => {
                    warn!(attempt, %msg, "order number collision, drawing again");
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Apply one status transition on behalf of `caller`.
    ///
    /// The write is a compare-and-set on the version that was read; a
    /// concurrent writer makes this call fail with a conflict.
    #[instrument(skip(self, caller, change), fields(order_id = %id, role = %caller.role, to = %change.status))]
    pub async fn update_status(
        &self,
        caller: &Caller,
        id: OrderId,
        change: StatusChange,
    ) -> Result<Order, ServiceError> {
        let mut order = self.load(id).await?;
        let expected = ExpectedVersion::Exact(order.version);

        let changed = order.change_status(caller, change.status, change.reason, Utc::now())?;
        self.store.save_status(&order, expected).await?;

        let mut notice = ChangeNotice::new(Topic::OrderStatusChanged, order.id, order.status)
            .with("orderNumber", order.order_number.clone())
            .with("previousStatus", changed.from.as_str())
            .with("changedBy", changed.changed_by.as_str());
        if let Some(reason) = &changed.reason {
            notice = notice.with("reason", reason.clone());
        }
        self.bus.publish_notice(notice);
        self.notifier.status_changed(&order, &changed);

        info!(
            order_number = %order.order_number,
            from = %changed.from,
            to = %changed.to,
            "order status changed"
        );
        Ok(order)
    }

    pub async fn cancel(
        &self,
        caller: &Caller,
        id: OrderId,
        reason: Option<String>,
    ) -> Result<Order, ServiceError> {
        self.update_status(caller, id, StatusChange::to(OrderStatus::Cancelado).with_reason(reason))
            .await
    }

    pub async fn reject(
        &self,
        caller: &Caller,
        id: OrderId,
        reason: Option<String>,
    ) -> Result<Order, ServiceError> {
        self.update_status(caller, id, StatusChange::to(OrderStatus::Rechazada).with_reason(reason))
            .await
    }

    pub async fn get(&self, caller: &Caller, id: OrderId) -> Result<Order, ServiceError> {
        let order = self.load(id).await?;
        ensure_visible(caller, &order)?;
        Ok(order)
    }

    pub async fn get_by_number(&self, caller: &Caller, order_number: &str) -> Result<Order, ServiceError> {
        let order = self
            .store
            .get_order_by_number(order_number)
            .await?
            .ok_or_else(|| ServiceError::not_found("order", order_number))?;
        ensure_visible(caller, &order)?;
        Ok(order)
    }

    /// Newest first. Clients only ever see their own orders.
    pub async fn list(&self, caller: &Caller, mut filter: OrderFilter) -> Result<Vec<Order>, ServiceError> {
        if caller.role == Role::Client {
            match filter.user_id {
                Some(user) if user != caller.user_id => {
                    return Err(ServiceError::Forbidden(
                        "clients may only list their own orders".to_string(),
                    ));
                }
                _ => filter.user_id = Some(caller.user_id),
            }
        }
        Ok(self.store.list_orders(&filter).await?)
    }

    async fn load(&self, id: OrderId) -> Result<Order, ServiceError> {
        self.store
            .get_order(id)
            .await?
            .ok_or_else(|| ServiceError::not_found("order", id))
    }
}

fn ensure_visible(caller: &Caller, order: &Order) -> Result<(), ServiceError> {
    if caller.role == Role::Client && order.user_id != caller.user_id {
        return Err(ServiceError::Forbidden(format!(
            "order {} belongs to another user",
            order.id
        )));
    }
    Ok(())
}

fn request_restaurant(cmd: &CreateOrder) -> Result<RestaurantId, ServiceError> {
    cmd.restaurant_id
        .ok_or_else(|| ServiceError::input("restaurantId is required", vec!["restaurantId".to_string()]))
}

/// Check the shape of a create request before anything leaves the process.
/// A missing quantity means one unit.
fn validation_request(cmd: &CreateOrder) -> Result<ValidationRequest, ServiceError> {
    let mut missing = Vec::new();
    if cmd.restaurant_id.is_none() {
        missing.push("restaurantId".to_string());
    }
    if cmd.items.is_empty() {
        missing.push("items".to_string());
    }

    let mut items = Vec::with_capacity(cmd.items.len());
    for (i, line) in cmd.items.iter().enumerate() {
        if line.menu_item_id.is_none() {
            missing.push(format!("items[{i}].menuItemId"));
        }
        match line.price {
            None => missing.push(format!("items[{i}].price")),
            Some(p) if p.is_sign_negative() => missing.push(format!("items[{i}].price")),
            Some(_) => {}
        }
        // Quantities are stored as INTEGER.
        if line.quantity.is_some_and(|q| q == 0 || i32::try_from(q).is_err()) {
            missing.push(format!("items[{i}].quantity"));
        }
        if let (Some(menu_item_id), Some(requested_price)) = (line.menu_item_id, line.price) {
            items.push(RequestedItem {
                menu_item_id,
                requested_price,
                quantity: line.quantity.unwrap_or(1),
            });
        }
    }

    match cmd.restaurant_id {
        Some(restaurant_id) if missing.is_empty() => Ok(ValidationRequest { restaurant_id, items }),
        _ => Err(ServiceError::input(
            format!("missing or invalid fields: {}", missing.join(", ")),
            missing,
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use fulfillment_catalog::{MenuItem, Restaurant};
    use fulfillment_core::UserId;
    use fulfillment_events::{EventBus, InMemoryEventBus};
    use rust_decimal_macros::dec;

    use crate::catalog_service::CatalogValidator;
    use crate::notify::{InMemoryNotificationSink, NoDirectory, NotificationKind};
    use crate::store::{InMemoryCatalogStore, InMemoryOrderStore};

    struct Harness {
        ledger: OrderLedger,
        store: Arc<InMemoryOrderStore>,
        bus: Arc<InMemoryEventBus<ChangeNotice>>,
        sink: Arc<InMemoryNotificationSink>,
    }

    fn catalog() -> Arc<CatalogValidator> {
        let store = InMemoryCatalogStore::new();
        store.upsert_restaurant(Restaurant {
            id: RestaurantId::new(1),
            name: "Casa".to_string(),
            address: "Calle 1".to_string(),
            is_active: true,
        });
        store.upsert_restaurant(Restaurant {
            id: RestaurantId::new(2),
            name: "Otra".to_string(),
            address: "Calle 2".to_string(),
            is_active: true,
        });
        for (id, restaurant, price) in [(10, 1, dec!(10.00)), (11, 1, dec!(4.50)), (20, 2, dec!(7.00))] {
            store.upsert_menu_item(MenuItem {
                id: MenuItemId::new(id),
                restaurant_id: RestaurantId::new(restaurant),
                name: format!("item-{id}"),
                price,
                is_available: true,
            });
        }
        Arc::new(CatalogValidator::new(Arc::new(store)))
    }

    fn harness_with(catalog: Arc<dyn CatalogRpc>) -> Harness {
        let store = Arc::new(InMemoryOrderStore::new());
        let bus = Arc::new(InMemoryEventBus::new());
        let sink = Arc::new(InMemoryNotificationSink::new());
        let ledger = OrderLedger::new(store.clone(), catalog, bus.clone())
            .with_notifier(OrderNotifier::new(Arc::new(NoDirectory), sink.clone()));
        Harness { ledger, store, bus, sink }
    }

    fn harness() -> Harness {
        harness_with(catalog())
    }

    fn client() -> Caller {
        Caller::new(UserId::new(100), Role::Client)
    }

    fn restaurant() -> Caller {
        Caller::new(UserId::new(200), Role::Restaurant)
    }

    fn line(id: i64, price: Decimal, quantity: Option<u32>) -> OrderLine {
        OrderLine {
            menu_item_id: Some(MenuItemId::new(id)),
            price: Some(price),
            quantity,
        }
    }

    fn create(lines: Vec<OrderLine>) -> CreateOrder {
        CreateOrder {
            restaurant_id: Some(RestaurantId::new(1)),
            items: lines,
            delivery_address: Some("Zona 10".to_string()),
            notes: None,
        }
    }

    async fn wait_for_notifications(sink: &InMemoryNotificationSink, n: usize) {
        for _ in 0..100 {
            if sink.sent().len() >= n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("expected {n} notifications, got {}", sink.sent().len());
    }

    /// Counts calls and never answers in time.
    struct StalledCatalog(AtomicUsize);

    #[async_trait]
    impl CatalogRpc for StalledCatalog {
        async fn validate_order_items(&self, _: &ValidationRequest) -> Result<ValidationResult, RpcError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_secs(60)).await;
            Err(RpcError::Unavailable("never".into()))
        }
    }

    #[tokio::test]
    async fn created_order_is_priced_by_the_catalog() {
        let h = harness();
        let sub = h.bus.subscribe();

        let created = h
            .ledger
            .create_order(&client(), create(vec![line(10, dec!(10.00), Some(2)), line(11, dec!(4.50), None)]))
            .await
            .unwrap();

        assert_eq!(created.order.total, dec!(24.50));
        assert_eq!(created.order.status, OrderStatus::Creada);
        assert_eq!(created.order.restaurant_name, "Casa");
        assert_eq!(created.order.items.len(), 2);
        assert_eq!(created.order.items[1].quantity, 1);
        assert!(created.order.order_number.starts_with("ORD-"));
        assert_eq!(created.validation.items_validated, 2);
        assert_eq!(created.validation.server_total, dec!(24.50));

        let notice = sub.try_recv().unwrap();
        assert_eq!(notice.topic(), Topic::OrderCreated);
        assert_eq!(notice.id(), created.order.id.get());

        wait_for_notifications(&h.sink, 1).await;
        assert_eq!(h.sink.sent()[0].0, NotificationKind::OrderCreated);
    }

    #[tokio::test]
    async fn item_from_another_restaurant_fails_validation_and_persists_nothing() {
        let h = harness();
        let err = h
            .ledger
            .create_order(&client(), create(vec![line(10, dec!(10.00), Some(1)), line(20, dec!(7.00), Some(1))]))
            .await
            .unwrap_err();

        match err {
            ServiceError::ValidationFailed { failed_items, .. } => {
                assert_eq!(failed_items.len(), 1);
                assert_eq!(failed_items[0].menu_item_id, MenuItemId::new(20));
                assert!(failed_items[0].exists);
                assert!(!failed_items[0].belongs_to_restaurant);
            }
            other => panic!("expected ValidationFailed, got {other:?}"),
        }
        assert!(h.store.list_orders(&OrderFilter::default()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn changed_price_is_reported_with_both_values() {
        let h = harness();
        let err = h
            .ledger
            .create_order(&client(), create(vec![line(10, dec!(12.00), Some(1))]))
            .await
            .unwrap_err();
        match err {
            ServiceError::ValidationFailed { failed_items, message } => {
                assert!(message.contains("12.00") && message.contains("10.00"), "{message}");
                assert_eq!(failed_items[0].current_price, Some(dec!(10.00)));
                assert!(!failed_items[0].price_matches);
            }
            other => panic!("expected ValidationFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn malformed_requests_are_rejected_before_calling_the_catalog() {
        let stalled = Arc::new(StalledCatalog(AtomicUsize::new(0)));
        let h = harness_with(stalled.clone());

        let cmd = CreateOrder {
            restaurant_id: None,
            items: vec![
                OrderLine { menu_item_id: None, price: Some(dec!(1)), quantity: None },
                line(10, dec!(10.00), Some(0)),
            ],
            ..CreateOrder::default()
        };
        match h.ledger.create_order(&client(), cmd).await.unwrap_err() {
            ServiceError::Input { fields, .. } => {
                assert_eq!(
                    fields,
                    vec!["restaurantId", "items[0].menuItemId", "items[1].quantity"]
                );
            }
            other => panic!("expected Input, got {other:?}"),
        }

        let oversized = CreateOrder {
            restaurant_id: Some(RestaurantId::new(1)),
            items: vec![
                line(10, dec!(10.00), Some(i32::MAX as u32)),
                line(10, dec!(10.00), Some(i32::MAX as u32 + 1)),
            ],
            ..CreateOrder::default()
        };
        match h.ledger.create_order(&client(), oversized).await.unwrap_err() {
            ServiceError::Input { fields, .. } => assert_eq!(fields, vec!["items[1].quantity"]),
            other => panic!("expected Input, got {other:?}"),
        }

        let empty = CreateOrder {
            restaurant_id: Some(RestaurantId::new(1)),
            ..CreateOrder::default()
        };
        assert!(matches!(
            h.ledger.create_order(&client(), empty).await,
            Err(ServiceError::Input { .. })
        ));
        assert_eq!(stalled.0.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn catalog_deadline_yields_retryable_upstream_error() {
        let stalled = Arc::new(StalledCatalog(AtomicUsize::new(0)));
        let mut h = harness_with(stalled.clone());
        h.ledger = h.ledger.with_catalog_deadline(Duration::from_millis(50));

        let err = h
            .ledger
            .create_order(&client(), create(vec![line(10, dec!(10.00), Some(1))]))
            .await
            .unwrap_err();
        assert!(err.is_retryable(), "{err:?}");
        assert!(matches!(err, ServiceError::UpstreamUnavailable { service: "catalog", .. }));
        assert!(h.store.list_orders(&OrderFilter::default()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn status_walk_publishes_and_notifies() {
        let h = harness();
        let order = h
            .ledger
            .create_order(&client(), create(vec![line(10, dec!(10.00), Some(1))]))
            .await
            .unwrap()
            .order;
        let sub = h.bus.subscribe();

        let updated = h
            .ledger
            .update_status(&restaurant(), order.id, StatusChange::to(OrderStatus::EnProceso))
            .await
            .unwrap();
        assert_eq!(updated.status, OrderStatus::EnProceso);
        assert!(updated.updated_at >= order.updated_at);

        let notice = sub.try_recv().unwrap();
        assert_eq!(notice.topic(), Topic::OrderStatusChanged);
        assert_eq!(notice.new_status(), "EN_PROCESO");

        let rejected = h
            .ledger
            .reject(&restaurant(), order.id, Some("sin gas".to_string()))
            .await
            .unwrap();
        assert_eq!(rejected.status, OrderStatus::Rechazada);

        wait_for_notifications(&h.sink, 2).await;
        let sent = h.sink.sent();
        let (_, body) = sent
            .iter()
            .find(|(kind, _)| *kind == NotificationKind::OrderRejected)
            .unwrap();
        assert_eq!(body.reason.as_deref(), Some("sin gas"));
    }

    #[tokio::test]
    async fn disallowed_transition_and_missing_authority_are_distinct_errors() {
        let h = harness();
        let order = h
            .ledger
            .create_order(&client(), create(vec![line(10, dec!(10.00), Some(1))]))
            .await
            .unwrap()
            .order;

        let err = h
            .ledger
            .update_status(&restaurant(), order.id, StatusChange::to(OrderStatus::Entregado))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidTransition { .. }), "{err:?}");

        let err = h
            .ledger
            .update_status(&client(), order.id, StatusChange::to(OrderStatus::EnProceso))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Forbidden(_)), "{err:?}");

        let stranger = Caller::new(UserId::new(999), Role::Client);
        let err = h.ledger.cancel(&stranger, order.id, None).await.unwrap_err();
        assert!(matches!(err, ServiceError::Forbidden(_)), "{err:?}");

        let cancelled = h.ledger.cancel(&client(), order.id, None).await.unwrap();
        assert_eq!(cancelled.status, OrderStatus::Cancelado);

        let missing = h.ledger.get(&client(), OrderId::new(404)).await.unwrap_err();
        assert!(matches!(missing, ServiceError::NotFound { .. }));
    }

    #[tokio::test]
    async fn clients_only_list_their_own_orders() {
        let h = harness();
        h.ledger
            .create_order(&client(), create(vec![line(10, dec!(10.00), Some(1))]))
            .await
            .unwrap();
        let other = Caller::new(UserId::new(101), Role::Client);
        h.ledger
            .create_order(&other, create(vec![line(11, dec!(4.50), Some(1))]))
            .await
            .unwrap();

        let mine = h.ledger.list(&client(), OrderFilter::default()).await.unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].user_id, UserId::new(100));

        let admin = Caller::new(UserId::new(1), Role::Admin);
        let all = h.ledger.list(&admin, OrderFilter::default()).await.unwrap();
        assert_eq!(all.len(), 2);

        let snooping = OrderFilter {
            user_id: Some(UserId::new(101)),
            ..OrderFilter::default()
        };
        assert!(matches!(
            h.ledger.list(&client(), snooping).await,
            Err(ServiceError::Forbidden(_))
        ));
    }
}
