//! In-memory stores for development and tests.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use async_trait::async_trait;
use serde::Deserialize;

use fulfillment_catalog::{MenuItem, Restaurant};
use fulfillment_core::{DeliveryId, ExpectedVersion, MenuItemId, OrderId, RestaurantId};
use fulfillment_delivery::{Delivery, NewDelivery};
use fulfillment_orders::{NewOrder, Order};

use super::{CatalogStore, DeliveryFilter, DeliveryStore, OrderFilter, OrderStore, StoreError};

fn poisoned() -> StoreError {
    StoreError::Backend("lock poisoned".to_string())
}

/// Catalog contents loaded from a JSON seed file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogSeed {
    #[serde(default)]
    pub restaurants: Vec<Restaurant>,
    #[serde(default)]
    pub menu_items: Vec<MenuItem>,
}

#[derive(Debug, Default)]
pub struct InMemoryCatalogStore {
    restaurants: RwLock<HashMap<RestaurantId, Restaurant>>,
    menu_items: RwLock<HashMap<MenuItemId, MenuItem>>,
}

impl InMemoryCatalogStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_seed(seed: CatalogSeed) -> Self {
        let store = Self::new();
        for r in seed.restaurants {
            store.upsert_restaurant(r);
        }
        for m in seed.menu_items {
            store.upsert_menu_item(m);
        }
        store
    }

    pub fn from_json(raw: &str) -> Result<Self, StoreError> {
        let seed: CatalogSeed =
            serde_json::from_str(raw).map_err(|e| StoreError::Corrupt(format!("catalog seed: {e}")))?;
        Ok(Self::from_seed(seed))
    }

    pub fn upsert_restaurant(&self, restaurant: Restaurant) {
        if let Ok(mut map) = self.restaurants.write() {
            map.insert(restaurant.id, restaurant);
        }
    }

    pub fn upsert_menu_item(&self, item: MenuItem) {
        if let Ok(mut map) = self.menu_items.write() {
            map.insert(item.id, item);
        }
    }
}

#[async_trait]
impl CatalogStore for InMemoryCatalogStore {
    async fn restaurant(&self, id: RestaurantId) -> Result<Option<Restaurant>, StoreError> {
        let map = self.restaurants.read().map_err(|_| poisoned())?;
        Ok(map.get(&id).cloned())
    }

    async fn menu_items(&self, ids: &[MenuItemId]) -> Result<Vec<MenuItem>, StoreError> {
        let map = self.menu_items.read().map_err(|_| poisoned())?;
        Ok(ids.iter().filter_map(|id| map.get(id).cloned()).collect())
    }
}

#[derive(Debug, Default)]
struct OrderTable {
    next_id: i64,
    rows: HashMap<OrderId, Order>,
}

#[derive(Debug, Default)]
pub struct InMemoryOrderStore {
    table: RwLock<OrderTable>,
}

impl InMemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn newest_first<T>(rows: &mut [T], key: impl Fn(&T) -> (chrono::DateTime<chrono::Utc>, i64)) {
    rows.sort_by(|a, b| key(b).cmp(&key(a)));
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn insert_order(&self, order: NewOrder) -> Result<Order, StoreError> {
        let mut table = self.table.write().map_err(|_| poisoned())?;
        if table.rows.values().any(|o| o.order_number == order.order_number) {
            return Err(StoreError::Conflict(format!(
                "order number {} already exists",
                order.order_number
            )));
        }
        table.next_id += 1;
        let stored = order.into_order(OrderId::new(table.next_id));
        table.rows.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn get_order(&self, id: OrderId) -> Result<Option<Order>, StoreError> {
        let table = self.table.read().map_err(|_| poisoned())?;
        Ok(table.rows.get(&id).cloned())
    }

    async fn get_order_by_number(&self, order_number: &str) -> Result<Option<Order>, StoreError> {
        let table = self.table.read().map_err(|_| poisoned())?;
        Ok(table
            .rows
            .values()
            .find(|o| o.order_number == order_number)
            .cloned())
    }

    async fn list_orders(&self, filter: &OrderFilter) -> Result<Vec<Order>, StoreError> {
        let table = self.table.read().map_err(|_| poisoned())?;
        let mut out: Vec<Order> = table.rows.values().filter(|o| filter.matches(o)).cloned().collect();
        newest_first(&mut out, |o| (o.created_at, o.id.get()));
        Ok(out)
    }

    async fn save_status(&self, order: &Order, expected: ExpectedVersion) -> Result<(), StoreError> {
        let mut table = self.table.write().map_err(|_| poisoned())?;
        let row = table.rows.get_mut(&order.id).ok_or_else(|| StoreError::NotFound {
            entity: "order",
            id: order.id.to_string(),
        })?;
        if !expected.matches(row.version) {
            return Err(StoreError::Conflict(format!(
                "order {} was modified concurrently (expected {expected:?}, found {})",
                order.id, row.version
            )));
        }
        row.status = order.status;
        row.updated_at = order.updated_at;
        row.version = order.version;
        Ok(())
    }
}

#[derive(Debug, Default)]
struct DeliveryTable {
    next_id: i64,
    rows: HashMap<DeliveryId, Delivery>,
}

impl DeliveryTable {
    fn live_for(&self, order_id: OrderId) -> Option<&Delivery> {
        self.rows
            .values()
            .find(|d| d.order_external_id == order_id && d.status.is_live())
    }
}

/// Holds a single write lock across the live-delivery check and the insert,
/// which gives the same guarantee as the partial unique index in Postgres.
#[derive(Debug, Default)]
pub struct InMemoryDeliveryStore {
    table: RwLock<DeliveryTable>,
}

impl InMemoryDeliveryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DeliveryStore for InMemoryDeliveryStore {
    async fn insert_delivery(&self, delivery: NewDelivery) -> Result<Delivery, StoreError> {
        let mut table = self.table.write().map_err(|_| poisoned())?;
        if let Some(existing) = table.live_for(delivery.order_external_id) {
            return Err(StoreError::Conflict(format!(
                "order {} already has delivery {} ({})",
                delivery.order_external_id, existing.id, existing.status
            )));
        }
        table.next_id += 1;
        let stored = delivery.into_delivery(DeliveryId::new(table.next_id));
        table.rows.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn get_delivery(&self, id: DeliveryId) -> Result<Option<Delivery>, StoreError> {
        let table = self.table.read().map_err(|_| poisoned())?;
        Ok(table.rows.get(&id).cloned())
    }

    async fn live_delivery_for_order(&self, order_id: OrderId) -> Result<Option<Delivery>, StoreError> {
        let table = self.table.read().map_err(|_| poisoned())?;
        Ok(table.live_for(order_id).cloned())
    }

    async fn list_deliveries(&self, filter: &DeliveryFilter) -> Result<Vec<Delivery>, StoreError> {
        let table = self.table.read().map_err(|_| poisoned())?;
        let mut out: Vec<Delivery> = table.rows.values().filter(|d| filter.matches(d)).cloned().collect();
        newest_first(&mut out, |d| (d.created_at, d.id.get()));
        Ok(out)
    }

    async fn orders_with_live_delivery(
        &self,
        order_ids: &[OrderId],
    ) -> Result<HashSet<OrderId>, StoreError> {
        let table = self.table.read().map_err(|_| poisoned())?;
        let wanted: HashSet<OrderId> = order_ids.iter().copied().collect();
        Ok(table
            .rows
            .values()
            .filter(|d| d.status.is_live() && wanted.contains(&d.order_external_id))
            .map(|d| d.order_external_id)
            .collect())
    }

    async fn save_delivery(
        &self,
        delivery: &Delivery,
        expected: ExpectedVersion,
    ) -> Result<(), StoreError> {
        let mut table = self.table.write().map_err(|_| poisoned())?;
        let current = table.rows.get(&delivery.id).ok_or_else(|| StoreError::NotFound {
            entity: "delivery",
            id: delivery.id.to_string(),
        })?;
        if !expected.matches(current.version) {
            return Err(StoreError::Conflict(format!(
                "delivery {} was modified concurrently (expected {expected:?}, found {})",
                delivery.id, current.version
            )));
        }
        table.rows.insert(delivery.id, delivery.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use fulfillment_core::{Caller, Role, UserId};
    use rust_decimal_macros::dec;

    fn new_order(number: &str) -> NewOrder {
        NewOrder {
            order_number: number.to_string(),
            user_id: UserId::new(1),
            restaurant_id: RestaurantId::new(1),
            restaurant_name: "Casa".to_string(),
            restaurant_address: "Calle 1".to_string(),
            total: dec!(10),
            delivery_address: None,
            notes: None,
            items: Vec::new(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn order_ids_are_assigned_sequentially_and_numbers_are_unique() {
        let store = InMemoryOrderStore::new();
        let a = store.insert_order(new_order("ORD-A")).await.unwrap();
        let b = store.insert_order(new_order("ORD-B")).await.unwrap();
        assert_eq!(a.id, OrderId::new(1));
        assert_eq!(b.id, OrderId::new(2));

        let dup = store.insert_order(new_order("ORD-A")).await;
        assert!(matches!(dup, Err(StoreError::Conflict(_))));

        let found = store.get_order_by_number("ORD-B").await.unwrap().unwrap();
        assert_eq!(found.id, b.id);
    }

    #[tokio::test]
    async fn stale_status_write_is_rejected() {
        let store = InMemoryOrderStore::new();
        let order = store.insert_order(new_order("ORD-A")).await.unwrap();
        let restaurant = Caller::new(UserId::new(9), Role::Restaurant);

        let mut first = order.clone();
        first
            .change_status(&restaurant, fulfillment_orders::OrderStatus::EnProceso, None, Utc::now())
            .unwrap();
        store
            .save_status(&first, ExpectedVersion::Exact(order.version))
            .await
            .unwrap();

        let mut second = order.clone();
        second
            .change_status(&restaurant, fulfillment_orders::OrderStatus::Rechazada, None, Utc::now())
            .unwrap();
        let err = store
            .save_status(&second, ExpectedVersion::Exact(order.version))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));

        let stored = store.get_order(order.id).await.unwrap().unwrap();
        assert_eq!(stored.status, fulfillment_orders::OrderStatus::EnProceso);
    }

    #[tokio::test]
    async fn only_one_live_delivery_per_order() {
        let store = InMemoryDeliveryStore::new();
        let order = OrderId::new(7);
        let first = store
            .insert_delivery(NewDelivery::assigned(order, UserId::new(1), Utc::now()))
            .await
            .unwrap();

        let second = store
            .insert_delivery(NewDelivery::accepted(order, UserId::new(2), Utc::now()))
            .await;
        assert!(matches!(second, Err(StoreError::Conflict(_))));

        // A cancelled delivery frees the order again.
        let mut cancelled = first.clone();
        cancelled
            .cancel(&Caller::new(UserId::new(99), Role::Admin), None, Utc::now())
            .unwrap();
        store
            .save_delivery(&cancelled, ExpectedVersion::Exact(first.version))
            .await
            .unwrap();

        let live = store.orders_with_live_delivery(&[order]).await.unwrap();
        assert!(live.is_empty());
        store
            .insert_delivery(NewDelivery::accepted(order, UserId::new(2), Utc::now()))
            .await
            .unwrap();
        assert!(store.live_delivery_for_order(order).await.unwrap().is_some());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_inserts_for_one_order_admit_exactly_one() {
        let store = std::sync::Arc::new(InMemoryDeliveryStore::new());
        let order = OrderId::new(3);

        let handles: Vec<_> = (0..16)
            .map(|courier| {
                let store = store.clone();
                tokio::spawn(async move {
                    store
                        .insert_delivery(NewDelivery::accepted(order, UserId::new(courier), Utc::now()))
                        .await
                })
            })
            .collect();

        let mut won = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => won += 1,
                Err(StoreError::Conflict(_)) => {}
                Err(other) => panic!("unexpected error: {other:?}"),
            }
        }
        assert_eq!(won, 1);
    }

    #[tokio::test]
    async fn catalog_seed_parses_camel_case_json() {
        let store = InMemoryCatalogStore::from_json(
            r#"{
                "restaurants": [{"id": 1, "name": "Casa", "address": "Calle 1", "isActive": true}],
                "menuItems": [{"id": 10, "restaurantId": 1, "name": "Taco", "price": "3.50", "isAvailable": true}]
            }"#,
        )
        .unwrap();
        assert!(store.restaurant(RestaurantId::new(1)).await.unwrap().is_some());
        let items = store
            .menu_items(&[MenuItemId::new(10), MenuItemId::new(11)])
            .await
            .unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].price, dec!(3.50));
    }
}
