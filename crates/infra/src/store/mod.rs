//! Per-service storage behind async traits.
//!
//! Each service owns its store; nothing here joins across services. Both
//! backends enforce the same rules: order inserts are all-or-nothing, writes
//! back are compare-and-set on the aggregate version, and at most one
//! non-cancelled delivery exists per order.

use std::collections::HashSet;

use async_trait::async_trait;
use thiserror::Error;

use fulfillment_catalog::{MenuItem, Restaurant};
use fulfillment_core::{
    DeliveryId, ExpectedVersion, MenuItemId, OrderId, RestaurantId, UserId,
};
use fulfillment_delivery::{Delivery, NewDelivery};
use fulfillment_orders::{NewOrder, Order, OrderStatus};

pub mod in_memory;
pub mod postgres;

pub use in_memory::{CatalogSeed, InMemoryCatalogStore, InMemoryDeliveryStore, InMemoryOrderStore};
pub use postgres::{PostgresCatalogStore, PostgresDeliveryStore, PostgresOrderStore};

#[derive(Debug, Error)]
pub enum StoreError {
    /// Uniqueness violated or a compare-and-set lost the race.
    #[error("{0}")]
    Conflict(String),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("backend error: {0}")]
    Backend(String),

    /// A persisted row could not be mapped back into a domain value.
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

/// Filter for order listings. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrderFilter {
    pub status: Option<OrderStatus>,
    pub user_id: Option<UserId>,
    pub restaurant_id: Option<RestaurantId>,
}

impl OrderFilter {
    pub fn matches(&self, order: &Order) -> bool {
        self.status.is_none_or(|s| order.status == s)
            && self.user_id.is_none_or(|u| order.user_id == u)
            && self.restaurant_id.is_none_or(|r| order.restaurant_id == r)
    }
}

/// Filter for delivery listings. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryFilter {
    pub courier_id: Option<UserId>,
    pub order_id: Option<OrderId>,
    /// Only ASIGNADO or EN_CAMINO.
    pub active_only: bool,
}

impl DeliveryFilter {
    pub fn matches(&self, delivery: &Delivery) -> bool {
        self.courier_id.is_none_or(|c| delivery.courier_id == c)
            && self.order_id.is_none_or(|o| delivery.order_external_id == o)
            && (!self.active_only || delivery.status.is_active())
    }
}

/// Read side of the catalog of record.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn restaurant(&self, id: RestaurantId) -> Result<Option<Restaurant>, StoreError>;

    /// Menu items among `ids` that exist. Unknown ids are simply absent.
    async fn menu_items(&self, ids: &[MenuItemId]) -> Result<Vec<MenuItem>, StoreError>;
}

#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Persist the order and all its items atomically, assigning the id.
    async fn insert_order(&self, order: NewOrder) -> Result<Order, StoreError>;

    async fn get_order(&self, id: OrderId) -> Result<Option<Order>, StoreError>;

    async fn get_order_by_number(&self, order_number: &str) -> Result<Option<Order>, StoreError>;

    /// Newest first.
    async fn list_orders(&self, filter: &OrderFilter) -> Result<Vec<Order>, StoreError>;

    /// Write back status and `updated_at`, provided the stored version still
    /// equals `expected`. Losing the race yields [`StoreError::Conflict`].
    async fn save_status(&self, order: &Order, expected: ExpectedVersion) -> Result<(), StoreError>;
}

#[async_trait]
pub trait DeliveryStore: Send + Sync {
    /// Insert, failing with [`StoreError::Conflict`] when the order already
    /// has a non-cancelled delivery. The check and insert are one atomic step.
    async fn insert_delivery(&self, delivery: NewDelivery) -> Result<Delivery, StoreError>;

    async fn get_delivery(&self, id: DeliveryId) -> Result<Option<Delivery>, StoreError>;

    /// The non-cancelled delivery for `order_id`, if any.
    async fn live_delivery_for_order(&self, order_id: OrderId) -> Result<Option<Delivery>, StoreError>;

    /// Newest first.
    async fn list_deliveries(&self, filter: &DeliveryFilter) -> Result<Vec<Delivery>, StoreError>;

    /// Subset of `order_ids` that currently have a non-cancelled delivery.
    async fn orders_with_live_delivery(
        &self,
        order_ids: &[OrderId],
    ) -> Result<HashSet<OrderId>, StoreError>;

    /// Compare-and-set write back of a mutated delivery.
    async fn save_delivery(
        &self,
        delivery: &Delivery,
        expected: ExpectedVersion,
    ) -> Result<(), StoreError>;
}
