use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use fulfillment_catalog::ValidationResult;
use fulfillment_core::{
    AggregateRoot, Caller, DomainError, DomainResult, Lifecycle, MenuItemId, OrderId, RestaurantId,
    Role, UserId,
};
use fulfillment_events::Event;

use crate::status::OrderStatus;

/// Line of an order. Name and price are snapshots taken from the catalog at
/// validation time and never change afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItem {
    pub menu_item_id: MenuItemId,
    pub name: String,
    pub unit_price: Decimal,
    pub quantity: u32,
    pub subtotal: Decimal,
}

/// Caller-supplied part of an order. Everything priced comes from validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceOrder {
    pub user_id: UserId,
    pub restaurant_id: RestaurantId,
    pub order_number: String,
    pub delivery_address: Option<String>,
    pub notes: Option<String>,
    pub placed_at: DateTime<Utc>,
}

/// An order that passed validation but has not been persisted yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewOrder {
    pub order_number: String,
    pub user_id: UserId,
    pub restaurant_id: RestaurantId,
    pub restaurant_name: String,
    pub restaurant_address: String,
    pub total: Decimal,
    pub delivery_address: Option<String>,
    pub notes: Option<String>,
    pub items: Vec<OrderItem>,
    pub created_at: DateTime<Utc>,
}

impl NewOrder {
    /// Build the persistable order from a catalog verdict.
    ///
    /// The total and every line price are taken from `validation`; a total
    /// that does not equal the sum of line subtotals is refused.
    pub fn from_validation(cmd: PlaceOrder, validation: &ValidationResult) -> DomainResult<Self> {
        if !validation.valid {
            return Err(DomainError::invariant(
                "cannot build an order from a failed validation",
            ));
        }
        if validation.item_results.is_empty() {
            return Err(DomainError::validation("order must contain at least one item"));
        }
        if cmd.order_number.trim().is_empty() {
            return Err(DomainError::validation("order number is required"));
        }

        let mut items = Vec::with_capacity(validation.item_results.len());
        for result in &validation.item_results {
            let unit_price = match (result.passed(), result.current_price) {
                (true, Some(price)) => price,
                _ => {
                    return Err(DomainError::invariant(format!(
                        "menu item {} was not validated",
                        result.menu_item_id
                    )));
                }
            };
            items.push(OrderItem {
                menu_item_id: result.menu_item_id,
                name: result.item_name.clone(),
                unit_price,
                quantity: result.quantity,
                subtotal: unit_price * Decimal::from(result.quantity),
            });
        }

        let sum: Decimal = items.iter().map(|i| i.subtotal).sum();
        if sum != validation.total_calculated {
            return Err(DomainError::invariant(format!(
                "line subtotals ({sum}) do not add up to validated total ({})",
                validation.total_calculated
            )));
        }

        Ok(Self {
            order_number: cmd.order_number,
            user_id: cmd.user_id,
            restaurant_id: cmd.restaurant_id,
            restaurant_name: validation.restaurant_name.clone(),
            restaurant_address: validation.restaurant_address.clone(),
            total: validation.total_calculated,
            delivery_address: cmd.delivery_address,
            notes: cmd.notes,
            items,
            created_at: cmd.placed_at,
        })
    }

    /// Attach the store-assigned id.
    pub fn into_order(self, id: OrderId) -> Order {
        Order {
            id,
            order_number: self.order_number,
            user_id: self.user_id,
            restaurant_id: self.restaurant_id,
            restaurant_name: self.restaurant_name,
            restaurant_address: self.restaurant_address,
            status: OrderStatus::Creada,
            total: self.total,
            delivery_address: self.delivery_address,
            notes: self.notes,
            items: self.items,
            created_at: self.created_at,
            updated_at: self.created_at,
            version: 1,
        }
    }
}

/// Aggregate root: Order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: OrderId,
    pub order_number: String,
    pub user_id: UserId,
    pub restaurant_id: RestaurantId,
    pub restaurant_name: String,
    pub restaurant_address: String,
    pub status: OrderStatus,
    pub total: Decimal,
    pub delivery_address: Option<String>,
    pub notes: Option<String>,
    pub items: Vec<OrderItem>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub version: u64,
}

impl AggregateRoot for Order {
    type Id = OrderId;

    fn id(&self) -> Self::Id {
        self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

impl Order {
    /// Move the order to `requested`.
    ///
    /// The transition table is checked first, then the caller's authority.
    /// On success the order is mutated and the accepted change is returned.
    pub fn change_status(
        &mut self,
        caller: &Caller,
        requested: OrderStatus,
        reason: Option<String>,
        at: DateTime<Utc>,
    ) -> DomainResult<OrderStatusChanged> {
        self.status.ensure_transition(requested)?;
        requested.ensure_authority(caller, self.user_id)?;

        let change = OrderStatusChanged {
            order_id: self.id,
            order_number: self.order_number.clone(),
            user_id: self.user_id,
            from: self.status,
            to: requested,
            changed_by: caller.role,
            actor_name: caller.display_name.clone(),
            reason,
            occurred_at: at,
        };

        self.status = requested;
        self.updated_at = at;
        self.version += 1;

        Ok(change)
    }

    pub fn placed_event(&self) -> OrderPlaced {
        OrderPlaced {
            order_id: self.id,
            order_number: self.order_number.clone(),
            user_id: self.user_id,
            restaurant_id: self.restaurant_id,
            total: self.total,
            occurred_at: self.created_at,
        }
    }

    pub fn item_count(&self) -> u32 {
        self.items.iter().map(|i| i.quantity).sum()
    }
}

/// Event: an order was persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderPlaced {
    pub order_id: OrderId,
    pub order_number: String,
    pub user_id: UserId,
    pub restaurant_id: RestaurantId,
    pub total: Decimal,
    pub occurred_at: DateTime<Utc>,
}

/// Event: a status transition was accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderStatusChanged {
    pub order_id: OrderId,
    pub order_number: String,
    pub user_id: UserId,
    pub from: OrderStatus,
    pub to: OrderStatus,
    pub changed_by: Role,
    /// Courier or restaurant name, for notification text only.
    pub actor_name: Option<String>,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

impl Event for OrderPlaced {
    fn event_type(&self) -> &'static str {
        "orders.order.placed"
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }
}

impl Event for OrderStatusChanged {
    fn event_type(&self) -> &'static str {
        "orders.order.status_changed"
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use fulfillment_catalog::ItemValidation;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    fn passing(id: i64, price: Decimal, quantity: u32) -> ItemValidation {
        ItemValidation {
            menu_item_id: MenuItemId::new(id),
            item_name: format!("Item {id}"),
            exists: true,
            belongs_to_restaurant: true,
            price_matches: true,
            is_available: true,
            current_price: Some(price),
            requested_price: price,
            quantity,
            error_message: None,
        }
    }

    fn valid_result(items: Vec<ItemValidation>) -> ValidationResult {
        let total = items.iter().map(|i| i.subtotal()).sum();
        ValidationResult {
            valid: true,
            message: "ok".into(),
            item_results: items,
            total_calculated: total,
            restaurant_name: "Casa Pepe".into(),
            restaurant_address: "1 Main St".into(),
        }
    }

    fn place(user: i64) -> PlaceOrder {
        PlaceOrder {
            user_id: UserId::new(user),
            restaurant_id: RestaurantId::new(1),
            order_number: "ORD-TEST-0001".into(),
            delivery_address: Some("5th Avenue".into()),
            notes: None,
            placed_at: test_time(),
        }
    }

    fn placed_order(user: i64) -> Order {
        let validation = valid_result(vec![passing(1, dec!(10.00), 2), passing(2, dec!(3.50), 1)]);
        NewOrder::from_validation(place(user), &validation)
            .unwrap()
            .into_order(OrderId::new(100))
    }

    fn caller(role: Role, user: i64) -> Caller {
        Caller::new(UserId::new(user), role)
    }

    fn authority_for(target: OrderStatus) -> Caller {
        match target {
            OrderStatus::EnCamino | OrderStatus::Entregado => caller(Role::Dispatcher, 0),
            _ => caller(Role::Admin, 0),
        }
    }

    fn order_in(status: OrderStatus) -> Order {
        let mut order = placed_order(1);
        order.status = status;
        order
    }

    #[test]
    fn order_total_and_snapshots_come_from_validation() {
        let order = placed_order(1);

        assert_eq!(order.status, OrderStatus::Creada);
        assert_eq!(order.total, dec!(23.50));
        assert_eq!(order.restaurant_name, "Casa Pepe");
        assert_eq!(order.restaurant_address, "1 Main St");
        assert_eq!(order.items[0].name, "Item 1");
        assert_eq!(order.items[0].subtotal, dec!(20.00));
        assert_eq!(order.items.iter().map(|i| i.subtotal).sum::<Decimal>(), order.total);
        assert_eq!(order.item_count(), 3);
        assert_eq!(order.version(), 1);
    }

    #[test]
    fn failed_validation_never_becomes_an_order() {
        let mut validation = valid_result(vec![passing(1, dec!(10.00), 1)]);
        validation.valid = false;

        let err = NewOrder::from_validation(place(1), &validation).unwrap_err();
        match err {
            DomainError::InvariantViolation(msg) if msg.contains("failed validation") => {}
            _ => panic!("Expected InvariantViolation for failed validation"),
        }
    }

    #[test]
    fn mismatched_total_is_refused() {
        let mut validation = valid_result(vec![passing(1, dec!(10.00), 1)]);
        validation.total_calculated = dec!(9.00);

        let err = NewOrder::from_validation(place(1), &validation).unwrap_err();
        match err {
            DomainError::InvariantViolation(msg) if msg.contains("do not add up") => {}
            _ => panic!("Expected InvariantViolation for total mismatch"),
        }
    }

    #[test]
    fn full_lifecycle_to_delivered() {
        let mut order = placed_order(1);
        let t0 = order.updated_at;

        order
            .change_status(&caller(Role::Restaurant, 2), OrderStatus::EnProceso, None, t0 + Duration::seconds(1))
            .unwrap();
        order
            .change_status(&caller(Role::Restaurant, 2), OrderStatus::Finalizada, None, t0 + Duration::seconds(2))
            .unwrap();
        let shipped = order
            .change_status(
                &caller(Role::Dispatcher, 0).with_display_name("Ana"),
                OrderStatus::EnCamino,
                None,
                t0 + Duration::seconds(3),
            )
            .unwrap();
        assert_eq!(shipped.from, OrderStatus::Finalizada);
        assert_eq!(shipped.actor_name.as_deref(), Some("Ana"));

        order
            .change_status(&caller(Role::Dispatcher, 0), OrderStatus::Entregado, None, t0 + Duration::seconds(4))
            .unwrap();
        assert_eq!(order.status, OrderStatus::Entregado);
        assert_eq!(order.updated_at, t0 + Duration::seconds(4));
        assert_eq!(order.version(), 5);
    }

    #[test]
    fn delivered_order_cannot_be_cancelled() {
        let mut order = order_in(OrderStatus::Entregado);
        let err = order
            .change_status(&caller(Role::Client, 1), OrderStatus::Cancelado, None, test_time())
            .unwrap_err();
        match err {
            DomainError::InvalidTransition { entity: "order", from, to }
                if from == "ENTREGADO" && to == "CANCELADO" => {}
            other => panic!("Expected InvalidTransition, got {other:?}"),
        }
        assert_eq!(order.status, OrderStatus::Entregado);
    }

    #[test]
    fn client_cannot_cancel_someone_elses_order() {
        let mut order = placed_order(1);
        let before = order.clone();
        let err = order
            .change_status(&caller(Role::Client, 2), OrderStatus::Cancelado, None, test_time())
            .unwrap_err();
        assert!(matches!(err, DomainError::Forbidden(_)));
        assert_eq!(order, before);
    }

    #[test]
    fn cancellation_carries_reason() {
        let mut order = placed_order(1);
        let change = order
            .change_status(
                &caller(Role::Restaurant, 2),
                OrderStatus::Cancelado,
                Some("kitchen closed".into()),
                test_time(),
            )
            .unwrap();
        assert_eq!(change.reason.as_deref(), Some("kitchen closed"));
        assert_eq!(change.event_type(), "orders.order.status_changed");
    }

    fn any_status() -> impl Strategy<Value = OrderStatus> {
        prop::sample::select(OrderStatus::ALL.to_vec())
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: with an authorized caller, a transition succeeds iff the
        /// pair is in the table; accepted ones bump `updated_at`, rejected ones
        /// leave the order untouched.
        #[test]
        fn transitions_follow_the_table(from in any_status(), to in any_status(), secs in 1i64..10_000) {
            let mut order = order_in(from);
            let before = order.clone();
            let at = before.updated_at + Duration::seconds(secs);

            let result = order.change_status(&authority_for(to), to, None, at);
            let allowed = from.successors().contains(&to);

            if allowed {
                prop_assert!(result.is_ok());
                prop_assert_eq!(order.status, to);
                prop_assert_eq!(order.updated_at, at);
                prop_assert_eq!(order.version(), before.version() + 1);
            } else {
                let is_transition_error = matches!(result, Err(DomainError::InvalidTransition { .. }));
                prop_assert!(is_transition_error);
                prop_assert_eq!(order, before);
            }
        }
    }
}
