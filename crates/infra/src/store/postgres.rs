//! Postgres-backed stores.
//!
//! One database per service in production; the schema below is split the
//! same way and each store only touches its own tables.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Code | StoreError |
//! |------------|-----------------|------------|
//! | Database (unique violation) | `23505` | `Conflict` |
//! | Database (other) | any | `Backend` |
//! | Decode / ColumnDecode | N/A | `Corrupt` |
//! | Other | N/A | `Backend` |
//!
//! ## One live delivery per order
//!
//! `deliveries_one_live_per_order` is a partial unique index over
//! `order_external_id` for rows whose status is not `CANCELADO`. Two racing
//! inserts for the same order cannot both commit; the loser surfaces as
//! `23505` and therefore as `StoreError::Conflict`.

use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::{instrument, Span};

use fulfillment_catalog::{MenuItem, Restaurant};
use fulfillment_core::{
    DeliveryId, ExpectedVersion, MenuItemId, OrderId, RestaurantId, UserId,
};
use fulfillment_delivery::{Delivery, DeliveryStatus, NewDelivery};
use fulfillment_orders::{NewOrder, Order, OrderItem, OrderStatus};

use super::{CatalogStore, DeliveryFilter, DeliveryStore, OrderFilter, OrderStore, StoreError};

pub const CATALOG_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS restaurants (
    id          BIGSERIAL PRIMARY KEY,
    name        TEXT NOT NULL,
    address     TEXT NOT NULL,
    is_active   BOOLEAN NOT NULL DEFAULT TRUE
);
CREATE TABLE IF NOT EXISTS menu_items (
    id              BIGSERIAL PRIMARY KEY,
    restaurant_id   BIGINT NOT NULL REFERENCES restaurants(id),
    name            TEXT NOT NULL,
    price           NUMERIC(12, 2) NOT NULL CHECK (price >= 0),
    is_available    BOOLEAN NOT NULL DEFAULT TRUE
);
"#;

pub const ORDER_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS orders (
    id                  BIGSERIAL PRIMARY KEY,
    order_number        TEXT NOT NULL UNIQUE,
    user_id             BIGINT NOT NULL,
    restaurant_id       BIGINT NOT NULL,
    restaurant_name     TEXT NOT NULL,
    restaurant_address  TEXT NOT NULL,
    status              TEXT NOT NULL,
    total               NUMERIC(12, 2) NOT NULL,
    delivery_address    TEXT,
    notes               TEXT,
    created_at          TIMESTAMPTZ NOT NULL,
    updated_at          TIMESTAMPTZ NOT NULL,
    version             BIGINT NOT NULL
);
CREATE TABLE IF NOT EXISTS order_items (
    order_id        BIGINT NOT NULL REFERENCES orders(id) ON DELETE CASCADE,
    position        INTEGER NOT NULL,
    menu_item_id    BIGINT NOT NULL,
    name            TEXT NOT NULL,
    unit_price      NUMERIC(12, 2) NOT NULL,
    quantity        INTEGER NOT NULL CHECK (quantity > 0),
    subtotal        NUMERIC(12, 2) NOT NULL,
    PRIMARY KEY (order_id, position)
);
CREATE INDEX IF NOT EXISTS orders_status_idx ON orders (status);
"#;

pub const DELIVERY_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS deliveries (
    id                  BIGSERIAL PRIMARY KEY,
    order_external_id   BIGINT NOT NULL,
    courier_id          BIGINT NOT NULL,
    status              TEXT NOT NULL,
    started_at          TIMESTAMPTZ,
    delivered_at        TIMESTAMPTZ,
    created_at          TIMESTAMPTZ NOT NULL,
    updated_at          TIMESTAMPTZ NOT NULL,
    version             BIGINT NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS deliveries_one_live_per_order
    ON deliveries (order_external_id) WHERE status <> 'CANCELADO';
CREATE INDEX IF NOT EXISTS deliveries_courier_idx ON deliveries (courier_id);
"#;

/// Apply one of the schema scripts above. Idempotent.
pub async fn ensure_schema(pool: &PgPool, schema: &str) -> Result<(), StoreError> {
    sqlx::raw_sql(schema)
        .execute(pool)
        .await
        .map_err(|e| map_sqlx_error("ensure_schema", e))?;
    Ok(())
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => StoreError::Conflict(msg),
                _ => StoreError::Backend(msg),
            }
        }
        sqlx::Error::Decode(e) => StoreError::Corrupt(format!("{operation}: {e}")),
        sqlx::Error::ColumnDecode { index, source } => {
            StoreError::Corrupt(format!("{operation}: column {index}: {source}"))
        }
        sqlx::Error::PoolClosed => {
            StoreError::Backend(format!("connection pool closed in {operation}"))
        }
        other => StoreError::Backend(format!("{operation}: {other}")),
    }
}

fn version_to_db(version: u64) -> Result<i64, StoreError> {
    i64::try_from(version).map_err(|_| StoreError::Corrupt(format!("version {version} out of range")))
}

fn version_from_db(version: i64) -> Result<u64, StoreError> {
    u64::try_from(version).map_err(|_| StoreError::Corrupt(format!("negative version {version}")))
}

#[derive(Debug, Clone)]
pub struct PostgresCatalogStore {
    pool: Arc<PgPool>,
}

impl PostgresCatalogStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }
}

#[async_trait]
impl CatalogStore for PostgresCatalogStore {
    #[instrument(skip(self), fields(restaurant_id = %id), err)]
    async fn restaurant(&self, id: RestaurantId) -> Result<Option<Restaurant>, StoreError> {
        let row = sqlx::query("SELECT id, name, address, is_active FROM restaurants WHERE id = $1")
            .bind(id.get())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("restaurant", e))?;

        row.map(|row| -> Result<Restaurant, sqlx::Error> {
            Ok(Restaurant {
                id: RestaurantId::new(row.try_get("id")?),
                name: row.try_get("name")?,
                address: row.try_get("address")?,
                is_active: row.try_get("is_active")?,
            })
        })
        .transpose()
        .map_err(|e| map_sqlx_error("restaurant", e))
    }

    #[instrument(skip(self, ids), fields(requested = ids.len(), found = tracing::field::Empty), err)]
    async fn menu_items(&self, ids: &[MenuItemId]) -> Result<Vec<MenuItem>, StoreError> {
        let raw: Vec<i64> = ids.iter().map(|id| id.get()).collect();
        let rows = sqlx::query(
            r#"
            SELECT id, restaurant_id, name, price, is_available
            FROM menu_items
            WHERE id = ANY($1)
            "#,
        )
        .bind(&raw)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("menu_items", e))?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let item = (|| -> Result<MenuItem, sqlx::Error> {
                Ok(MenuItem {
                    id: MenuItemId::new(row.try_get("id")?),
                    restaurant_id: RestaurantId::new(row.try_get("restaurant_id")?),
                    name: row.try_get("name")?,
                    price: row.try_get("price")?,
                    is_available: row.try_get("is_available")?,
                })
            })()
            .map_err(|e| map_sqlx_error("menu_items", e))?;
            out.push(item);
        }
        Span::current().record("found", out.len());
        Ok(out)
    }
}

/// Row shape of `orders` before items are attached.
struct OrderRow {
    id: i64,
    order_number: String,
    user_id: i64,
    restaurant_id: i64,
    restaurant_name: String,
    restaurant_address: String,
    status: String,
    total: Decimal,
    delivery_address: Option<String>,
    notes: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    version: i64,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for OrderRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(OrderRow {
            id: row.try_get("id")?,
            order_number: row.try_get("order_number")?,
            user_id: row.try_get("user_id")?,
            restaurant_id: row.try_get("restaurant_id")?,
            restaurant_name: row.try_get("restaurant_name")?,
            restaurant_address: row.try_get("restaurant_address")?,
            status: row.try_get("status")?,
            total: row.try_get("total")?,
            delivery_address: row.try_get("delivery_address")?,
            notes: row.try_get("notes")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            version: row.try_get("version")?,
        })
    }
}

impl OrderRow {
    fn into_order(self, items: Vec<OrderItem>) -> Result<Order, StoreError> {
        Ok(Order {
            id: OrderId::new(self.id),
            order_number: self.order_number,
            user_id: UserId::new(self.user_id),
            restaurant_id: RestaurantId::new(self.restaurant_id),
            restaurant_name: self.restaurant_name,
            restaurant_address: self.restaurant_address,
            status: OrderStatus::from_str(&self.status)
                .map_err(|e| StoreError::Corrupt(e.to_string()))?,
            total: self.total,
            delivery_address: self.delivery_address,
            notes: self.notes,
            items,
            created_at: self.created_at,
            updated_at: self.updated_at,
            version: version_from_db(self.version)?,
        })
    }
}

const ORDER_COLUMNS: &str = "id, order_number, user_id, restaurant_id, restaurant_name, \
     restaurant_address, status, total, delivery_address, notes, created_at, updated_at, version";

#[derive(Debug, Clone)]
pub struct PostgresOrderStore {
    pool: Arc<PgPool>,
}

impl PostgresOrderStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    async fn load_items(&self, order_ids: &[i64]) -> Result<Vec<(i64, OrderItem)>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT order_id, menu_item_id, name, unit_price, quantity, subtotal
            FROM order_items
            WHERE order_id = ANY($1)
            ORDER BY order_id, position
            "#,
        )
        .bind(order_ids)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_items", e))?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let order_id: i64 = row.try_get("order_id").map_err(|e| map_sqlx_error("load_items", e))?;
            let quantity: i32 = row.try_get("quantity").map_err(|e| map_sqlx_error("load_items", e))?;
            let item = OrderItem {
                menu_item_id: MenuItemId::new(
                    row.try_get("menu_item_id").map_err(|e| map_sqlx_error("load_items", e))?,
                ),
                name: row.try_get("name").map_err(|e| map_sqlx_error("load_items", e))?,
                unit_price: row.try_get("unit_price").map_err(|e| map_sqlx_error("load_items", e))?,
                quantity: u32::try_from(quantity)
                    .map_err(|_| StoreError::Corrupt(format!("negative quantity {quantity}")))?,
                subtotal: row.try_get("subtotal").map_err(|e| map_sqlx_error("load_items", e))?,
            };
            out.push((order_id, item));
        }
        Ok(out)
    }

    async fn hydrate(&self, rows: Vec<OrderRow>) -> Result<Vec<Order>, StoreError> {
        let ids: Vec<i64> = rows.iter().map(|r| r.id).collect();
        let mut by_order: HashMap<i64, Vec<OrderItem>> = HashMap::new();
        for (order_id, item) in self.load_items(&ids).await? {
            by_order.entry(order_id).or_default().push(item);
        }
        rows.into_iter()
            .map(|row| {
                let items = by_order.remove(&row.id).unwrap_or_default();
                row.into_order(items)
            })
            .collect()
    }

    async fn fetch_one(&self, sql: &str, bind: OrderKey<'_>) -> Result<Option<Order>, StoreError> {
        let query = sqlx::query_as::<_, OrderRow>(sql);
        let query = match bind {
            OrderKey::Id(id) => query.bind(id),
            OrderKey::Number(n) => query.bind(n),
        };
        let row = query
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_order", e))?;
        match row {
            Some(row) => Ok(self.hydrate(vec![row]).await?.pop()),
            None => Ok(None),
        }
    }
}

enum OrderKey<'a> {
    Id(i64),
    Number(&'a str),
}

async fn insert_items(
    tx: &mut Transaction<'_, Postgres>,
    order_id: i64,
    items: &[OrderItem],
) -> Result<(), StoreError> {
    for (position, item) in items.iter().enumerate() {
        let quantity = i32::try_from(item.quantity)
            .map_err(|_| StoreError::Corrupt(format!("quantity {} out of range", item.quantity)))?;
        sqlx::query(
            r#"
            INSERT INTO order_items (order_id, position, menu_item_id, name, unit_price, quantity, subtotal)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(order_id)
        .bind(position as i32)
        .bind(item.menu_item_id.get())
        .bind(&item.name)
        .bind(item.unit_price)
        .bind(quantity)
        .bind(item.subtotal)
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("insert_items", e))?;
    }
    Ok(())
}

#[async_trait]
impl OrderStore for PostgresOrderStore {
    #[instrument(
        skip(self, order),
        fields(
            order_number = %order.order_number,
            item_count = order.items.len(),
            order_id = tracing::field::Empty
        ),
        err
    )]
    async fn insert_order(&self, order: NewOrder) -> Result<Order, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO orders (
                order_number, user_id, restaurant_id, restaurant_name, restaurant_address,
                status, total, delivery_address, notes, created_at, updated_at, version
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $10, 1)
            RETURNING id
            "#,
        )
        .bind(&order.order_number)
        .bind(order.user_id.get())
        .bind(order.restaurant_id.get())
        .bind(&order.restaurant_name)
        .bind(&order.restaurant_address)
        .bind(OrderStatus::Creada.as_str())
        .bind(order.total)
        .bind(&order.delivery_address)
        .bind(&order.notes)
        .bind(order.created_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("insert_order", e))?;

        // Dropping `tx` on error rolls back, so a failed item leaves no order.
        insert_items(&mut tx, id, &order.items).await?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit", e))?;

        Span::current().record("order_id", id);
        Ok(order.into_order(OrderId::new(id)))
    }

    #[instrument(skip(self), fields(order_id = %id), err)]
    async fn get_order(&self, id: OrderId) -> Result<Option<Order>, StoreError> {
        let sql = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1");
        self.fetch_one(&sql, OrderKey::Id(id.get())).await
    }

    #[instrument(skip(self), err)]
    async fn get_order_by_number(&self, order_number: &str) -> Result<Option<Order>, StoreError> {
        let sql = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE order_number = $1");
        self.fetch_one(&sql, OrderKey::Number(order_number)).await
    }

    #[instrument(skip(self), err)]
    async fn list_orders(&self, filter: &OrderFilter) -> Result<Vec<Order>, StoreError> {
        let sql = format!(
            r#"
            SELECT {ORDER_COLUMNS}
            FROM orders
            WHERE ($1::TEXT IS NULL OR status = $1)
              AND ($2::BIGINT IS NULL OR user_id = $2)
              AND ($3::BIGINT IS NULL OR restaurant_id = $3)
            ORDER BY created_at DESC, id DESC
            "#
        );
        let rows = sqlx::query_as::<_, OrderRow>(&sql)
            .bind(filter.status.map(|s| s.as_str()))
            .bind(filter.user_id.map(|u| u.get()))
            .bind(filter.restaurant_id.map(|r| r.get()))
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_orders", e))?;
        self.hydrate(rows).await
    }

    #[instrument(
        skip(self, order),
        fields(order_id = %order.id, status = %order.status),
        err
    )]
    async fn save_status(&self, order: &Order, expected: ExpectedVersion) -> Result<(), StoreError> {
        let expected_db = match expected {
            ExpectedVersion::Any => None,
            ExpectedVersion::Exact(v) => Some(version_to_db(v)?),
        };
        let result = sqlx::query(
            r#"
            UPDATE orders
            SET status = $2, updated_at = $3, version = $4
            WHERE id = $1 AND ($5::BIGINT IS NULL OR version = $5)
            "#,
        )
        .bind(order.id.get())
        .bind(order.status.as_str())
        .bind(order.updated_at)
        .bind(version_to_db(order.version)?)
        .bind(expected_db)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("save_status", e))?;

        if result.rows_affected() == 0 {
            return match self.get_order(order.id).await? {
                None => Err(StoreError::NotFound {
                    entity: "order",
                    id: order.id.to_string(),
                }),
                Some(current) => Err(StoreError::Conflict(format!(
                    "order {} was modified concurrently (expected {expected:?}, found {})",
                    order.id, current.version
                ))),
            };
        }
        Ok(())
    }
}

struct DeliveryRow {
    id: i64,
    order_external_id: i64,
    courier_id: i64,
    status: String,
    started_at: Option<DateTime<Utc>>,
    delivered_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    version: i64,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for DeliveryRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(DeliveryRow {
            id: row.try_get("id")?,
            order_external_id: row.try_get("order_external_id")?,
            courier_id: row.try_get("courier_id")?,
            status: row.try_get("status")?,
            started_at: row.try_get("started_at")?,
            delivered_at: row.try_get("delivered_at")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            version: row.try_get("version")?,
        })
    }
}

impl TryFrom<DeliveryRow> for Delivery {
    type Error = StoreError;

    fn try_from(row: DeliveryRow) -> Result<Self, Self::Error> {
        Ok(Delivery {
            id: DeliveryId::new(row.id),
            order_external_id: OrderId::new(row.order_external_id),
            courier_id: UserId::new(row.courier_id),
            status: DeliveryStatus::from_str(&row.status)
                .map_err(|e| StoreError::Corrupt(e.to_string()))?,
            started_at: row.started_at,
            delivered_at: row.delivered_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
            version: version_from_db(row.version)?,
        })
    }
}

const DELIVERY_COLUMNS: &str = "id, order_external_id, courier_id, status, started_at, \
     delivered_at, created_at, updated_at, version";

#[derive(Debug, Clone)]
pub struct PostgresDeliveryStore {
    pool: Arc<PgPool>,
}

impl PostgresDeliveryStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    fn collect(rows: Vec<DeliveryRow>) -> Result<Vec<Delivery>, StoreError> {
        rows.into_iter().map(Delivery::try_from).collect()
    }
}

#[async_trait]
impl DeliveryStore for PostgresDeliveryStore {
    #[instrument(
        skip(self, delivery),
        fields(order_id = %delivery.order_external_id, courier_id = %delivery.courier_id),
        err
    )]
    async fn insert_delivery(&self, delivery: NewDelivery) -> Result<Delivery, StoreError> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO deliveries (
                order_external_id, courier_id, status, started_at, delivered_at,
                created_at, updated_at, version
            )
            VALUES ($1, $2, $3, $4, NULL, $5, $5, 1)
            RETURNING id
            "#,
        )
        .bind(delivery.order_external_id.get())
        .bind(delivery.courier_id.get())
        .bind(delivery.status.as_str())
        .bind(delivery.started_at)
        .bind(delivery.created_at)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| match map_sqlx_error("insert_delivery", e) {
            StoreError::Conflict(_) => StoreError::Conflict(format!(
                "order {} already has a delivery",
                delivery.order_external_id
            )),
            other => other,
        })?;

        Ok(delivery.into_delivery(DeliveryId::new(id)))
    }

    #[instrument(skip(self), fields(delivery_id = %id), err)]
    async fn get_delivery(&self, id: DeliveryId) -> Result<Option<Delivery>, StoreError> {
        let sql = format!("SELECT {DELIVERY_COLUMNS} FROM deliveries WHERE id = $1");
        sqlx::query_as::<_, DeliveryRow>(&sql)
            .bind(id.get())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_delivery", e))?
            .map(Delivery::try_from)
            .transpose()
    }

    #[instrument(skip(self), fields(order_id = %order_id), err)]
    async fn live_delivery_for_order(&self, order_id: OrderId) -> Result<Option<Delivery>, StoreError> {
        let sql = format!(
            "SELECT {DELIVERY_COLUMNS} FROM deliveries \
             WHERE order_external_id = $1 AND status <> 'CANCELADO'"
        );
        sqlx::query_as::<_, DeliveryRow>(&sql)
            .bind(order_id.get())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("live_delivery_for_order", e))?
            .map(Delivery::try_from)
            .transpose()
    }

    #[instrument(skip(self), err)]
    async fn list_deliveries(&self, filter: &DeliveryFilter) -> Result<Vec<Delivery>, StoreError> {
        let sql = format!(
            r#"
            SELECT {DELIVERY_COLUMNS}
            FROM deliveries
            WHERE ($1::BIGINT IS NULL OR courier_id = $1)
              AND ($2::BIGINT IS NULL OR order_external_id = $2)
              AND (NOT $3 OR status IN ('ASIGNADO', 'EN_CAMINO'))
            ORDER BY created_at DESC, id DESC
            "#
        );
        let rows = sqlx::query_as::<_, DeliveryRow>(&sql)
            .bind(filter.courier_id.map(|c| c.get()))
            .bind(filter.order_id.map(|o| o.get()))
            .bind(filter.active_only)
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_deliveries", e))?;
        Self::collect(rows)
    }

    #[instrument(skip(self, order_ids), fields(candidates = order_ids.len()), err)]
    async fn orders_with_live_delivery(
        &self,
        order_ids: &[OrderId],
    ) -> Result<HashSet<OrderId>, StoreError> {
        let raw: Vec<i64> = order_ids.iter().map(|o| o.get()).collect();
        let ids: Vec<i64> = sqlx::query_scalar(
            r#"
            SELECT DISTINCT order_external_id
            FROM deliveries
            WHERE order_external_id = ANY($1) AND status <> 'CANCELADO'
            "#,
        )
        .bind(&raw)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("orders_with_live_delivery", e))?;
        Ok(ids.into_iter().map(OrderId::new).collect())
    }

    #[instrument(
        skip(self, delivery),
        fields(delivery_id = %delivery.id, status = %delivery.status),
        err
    )]
    async fn save_delivery(
        &self,
        delivery: &Delivery,
        expected: ExpectedVersion,
    ) -> Result<(), StoreError> {
        let expected_db = match expected {
            ExpectedVersion::Any => None,
            ExpectedVersion::Exact(v) => Some(version_to_db(v)?),
        };
        let result = sqlx::query(
            r#"
            UPDATE deliveries
            SET courier_id = $2, status = $3, started_at = $4, delivered_at = $5,
                updated_at = $6, version = $7
            WHERE id = $1 AND ($8::BIGINT IS NULL OR version = $8)
            "#,
        )
        .bind(delivery.id.get())
        .bind(delivery.courier_id.get())
        .bind(delivery.status.as_str())
        .bind(delivery.started_at)
        .bind(delivery.delivered_at)
        .bind(delivery.updated_at)
        .bind(version_to_db(delivery.version)?)
        .bind(expected_db)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("save_delivery", e))?;

        if result.rows_affected() == 0 {
            return match self.get_delivery(delivery.id).await? {
                None => Err(StoreError::NotFound {
                    entity: "delivery",
                    id: delivery.id.to_string(),
                }),
                Some(current) => Err(StoreError::Conflict(format!(
                    "delivery {} was modified concurrently (expected {expected:?}, found {})",
                    delivery.id, current.version
                ))),
            };
        }
        Ok(())
    }
}
