//! Best-effort customer notifications.
//!
//! The ledger never waits on these: each notification runs on its own task,
//! looks up the customer's contact details, posts to the notification service
//! and logs a warning if anything along the way fails.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use fulfillment_core::{Role, UserId};
use fulfillment_orders::{Order, OrderStatus, OrderStatusChanged};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NotificationKind {
    OrderCreated,
    OrderShipped,
    OrderDelivered,
    OrderCancelledClient,
    OrderCancelledProvider,
    OrderRejected,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::OrderCreated => "order-created",
            NotificationKind::OrderShipped => "order-shipped",
            NotificationKind::OrderDelivered => "order-delivered",
            NotificationKind::OrderCancelledClient => "order-cancelled-client",
            NotificationKind::OrderCancelledProvider => "order-cancelled-provider",
            NotificationKind::OrderRejected => "order-rejected",
        }
    }

    /// Which notification, if any, a status change triggers.
    pub fn for_change(change: &OrderStatusChanged) -> Option<Self> {
        match change.to {
            OrderStatus::EnCamino => Some(NotificationKind::OrderShipped),
            OrderStatus::Entregado => Some(NotificationKind::OrderDelivered),
            OrderStatus::Rechazada => Some(NotificationKind::OrderRejected),
            OrderStatus::Cancelado if change.changed_by == Role::Client => {
                Some(NotificationKind::OrderCancelledClient)
            }
            OrderStatus::Cancelado => Some(NotificationKind::OrderCancelledProvider),
            _ => None,
        }
    }

    fn default_reason(&self) -> Option<&'static str> {
        match self {
            NotificationKind::OrderCancelledProvider => Some("cancelled by the restaurant"),
            NotificationKind::OrderRejected => Some("rejected by the restaurant"),
            _ => None,
        }
    }
}

impl core::fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationItem {
    pub name: String,
    pub quantity: u32,
    pub price: Decimal,
}

/// Body posted to the notification service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderNotification {
    pub order_number: String,
    pub customer_email: Option<String>,
    pub customer_name: String,
    pub restaurant_name: String,
    pub total: Decimal,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub items: Vec<NotificationItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub courier_name: Option<String>,
}

/// Contact details as the identity service reports them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Contact {
    pub email: Option<String>,
    pub name: Option<String>,
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("notification service answered {0}")]
    Rejected(u16),
}

#[async_trait]
pub trait IdentityDirectory: Send + Sync {
    /// `None` when the user is unknown or the directory is unreachable.
    async fn contact(&self, user_id: UserId) -> Option<Contact>;
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn send(&self, kind: NotificationKind, body: &OrderNotification) -> Result<(), NotifyError>;
}

#[derive(Debug, Clone)]
pub struct HttpIdentityDirectory {
    client: reqwest::Client,
    base_url: String,
}

impl HttpIdentityDirectory {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| NotifyError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }
}

#[async_trait]
impl IdentityDirectory for HttpIdentityDirectory {
    async fn contact(&self, user_id: UserId) -> Option<Contact> {
        let url = format!("{}/api/users/{}", self.base_url, user_id);
        let resp = match self.client.get(&url).send().await {
            Ok(resp) if resp.status().is_success() => resp,
            Ok(resp) => {
                warn!(%user_id, status = resp.status().as_u16(), "identity lookup refused");
                return None;
            }
            Err(e) => {
                warn!(%user_id, error = %e, "identity lookup failed");
                return None;
            }
        };
        resp.json::<Contact>()
            .await
            .inspect_err(|e| warn!(%user_id, error = %e, "identity lookup returned garbage"))
            .ok()
    }
}

/// Directory that knows nobody; notifications go out with placeholder names.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoDirectory;

#[async_trait]
impl IdentityDirectory for NoDirectory {
    async fn contact(&self, _user_id: UserId) -> Option<Contact> {
        None
    }
}

#[derive(Debug, Clone)]
pub struct HttpNotificationSink {
    client: reqwest::Client,
    base_url: String,
}

impl HttpNotificationSink {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| NotifyError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }
}

#[async_trait]
impl NotificationSink for HttpNotificationSink {
    async fn send(&self, kind: NotificationKind, body: &OrderNotification) -> Result<(), NotifyError> {
        let url = format!("{}/api/notifications/{}", self.base_url, kind);
        let resp = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| NotifyError::Transport(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(NotifyError::Rejected(resp.status().as_u16()));
        }
        Ok(())
    }
}

/// Discards everything. Used when no notification service is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNotificationSink;

#[async_trait]
impl NotificationSink for NoopNotificationSink {
    async fn send(&self, _kind: NotificationKind, _body: &OrderNotification) -> Result<(), NotifyError> {
        Ok(())
    }
}

/// Records what would have been sent.
#[derive(Debug, Default)]
pub struct InMemoryNotificationSink {
    sent: Mutex<Vec<(NotificationKind, OrderNotification)>>,
}

impl InMemoryNotificationSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<(NotificationKind, OrderNotification)> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl NotificationSink for InMemoryNotificationSink {
    async fn send(&self, kind: NotificationKind, body: &OrderNotification) -> Result<(), NotifyError> {
        self.sent
            .lock()
            .map_err(|_| NotifyError::Transport("lock poisoned".to_string()))?
            .push((kind, body.clone()));
        Ok(())
    }
}

/// Builds notification bodies from orders and dispatches them off the
/// request path.
#[derive(Clone)]
pub struct OrderNotifier {
    directory: Arc<dyn IdentityDirectory>,
    sink: Arc<dyn NotificationSink>,
}

impl OrderNotifier {
    pub fn new(directory: Arc<dyn IdentityDirectory>, sink: Arc<dyn NotificationSink>) -> Self {
        Self { directory, sink }
    }

    /// Notifier that does nothing.
    pub fn disabled() -> Self {
        Self::new(Arc::new(NoDirectory), Arc::new(NoopNotificationSink))
    }

    pub fn order_created(&self, order: &Order) {
        self.spawn(NotificationKind::OrderCreated, order.clone(), None, None);
    }

    pub fn status_changed(&self, order: &Order, change: &OrderStatusChanged) {
        if let Some(kind) = NotificationKind::for_change(change) {
            self.spawn(kind, order.clone(), change.reason.clone(), change.actor_name.clone());
        }
    }

    fn spawn(
        &self,
        kind: NotificationKind,
        order: Order,
        reason: Option<String>,
        actor_name: Option<String>,
    ) {
        let notifier = self.clone();
        tokio::spawn(async move {
            notifier.deliver(kind, &order, reason, actor_name).await;
        });
    }

    /// Look up the customer, build the body and send it. Never fails.
    pub async fn deliver(
        &self,
        kind: NotificationKind,
        order: &Order,
        reason: Option<String>,
        actor_name: Option<String>,
    ) {
        let contact = self.directory.contact(order.user_id).await.unwrap_or_default();
        let body = build_body(kind, order, contact, reason, actor_name);
        match self.sink.send(kind, &body).await {
            Ok(()) => info!(%kind, order_number = %order.order_number, "notification sent"),
            Err(e) => warn!(%kind, order_number = %order.order_number, error = %e, "notification failed"),
        }
    }
}

fn build_body(
    kind: NotificationKind,
    order: &Order,
    contact: Contact,
    reason: Option<String>,
    actor_name: Option<String>,
) -> OrderNotification {
    let items = if kind == NotificationKind::OrderCreated {
        order
            .items
            .iter()
            .map(|i| NotificationItem {
                name: i.name.clone(),
                quantity: i.quantity,
                price: i.unit_price,
            })
            .collect()
    } else {
        Vec::new()
    };

    let reason = reason
        .filter(|r| !r.trim().is_empty())
        .or_else(|| kind.default_reason().map(str::to_string));

    let courier_name = match kind {
        NotificationKind::OrderShipped | NotificationKind::OrderDelivered => actor_name,
        _ => None,
    };

    OrderNotification {
        order_number: order.order_number.clone(),
        customer_email: contact.email,
        customer_name: contact.name.unwrap_or_else(|| "Customer".to_string()),
        restaurant_name: if order.restaurant_name.is_empty() {
            "Restaurant".to_string()
        } else {
            order.restaurant_name.clone()
        },
        total: order.total,
        items,
        reason,
        courier_name,
    }
}
