use serde::{Deserialize, Serialize};

use fulfillment_core::{OrderId, UserId};
use fulfillment_delivery::Delivery;
use fulfillment_infra::{DeliveryOutcome, ServiceError, StatusChange, SyncOutcome};
use fulfillment_orders::OrderStatus;

#[derive(Debug, Default, Deserialize)]
pub struct OrderListQuery {
    pub status: Option<String>,
}

impl OrderListQuery {
    pub fn status(&self) -> Result<Option<OrderStatus>, ServiceError> {
        self.status
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(parse_status)
            .transpose()
    }
}

#[derive(Debug, Deserialize)]
pub struct StatusUpdateRequest {
    pub status: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

impl StatusUpdateRequest {
    pub fn into_change(self) -> Result<StatusChange, ServiceError> {
        let raw = self
            .status
            .ok_or_else(|| ServiceError::input("status is required", vec!["status".to_string()]))?;
        Ok(StatusChange::to(parse_status(&raw)?).with_reason(self.reason))
    }
}

/// Optional body of the cancel and reject endpoints.
#[derive(Debug, Default, Deserialize)]
pub struct ReasonRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateDeliveryRequest {
    pub order_id: Option<OrderId>,
    pub courier_id: Option<UserId>,
}

impl CreateDeliveryRequest {
    pub fn validate(&self) -> Result<(OrderId, UserId), ServiceError> {
        match (self.order_id, self.courier_id) {
            (Some(order), Some(courier)) => Ok((order, courier)),
            (order, courier) => {
                let mut fields = Vec::new();
                if order.is_none() {
                    fields.push("orderId".to_string());
                }
                if courier.is_none() {
                    fields.push("courierId".to_string());
                }
                Err(ServiceError::input("orderId and courierId are required", fields))
            }
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptDeliveryRequest {
    pub order_id: Option<OrderId>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReassignRequest {
    pub courier_id: Option<UserId>,
}

/// Delivery as returned to clients: the stored record plus derived fields.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryView {
    #[serde(flatten)]
    pub delivery: Delivery,
    pub duration_minutes: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_sync: Option<SyncOutcome>,
}

impl From<Delivery> for DeliveryView {
    fn from(delivery: Delivery) -> Self {
        Self {
            duration_minutes: delivery.duration_minutes(),
            delivery,
            order_sync: None,
        }
    }
}

impl From<DeliveryOutcome> for DeliveryView {
    fn from(outcome: DeliveryOutcome) -> Self {
        Self {
            order_sync: Some(outcome.order_sync),
            ..Self::from(outcome.delivery)
        }
    }
}

pub fn delivery_views(deliveries: Vec<Delivery>) -> Vec<DeliveryView> {
    deliveries.into_iter().map(DeliveryView::from).collect()
}

fn parse_status(raw: &str) -> Result<OrderStatus, ServiceError> {
    raw.parse::<OrderStatus>()
        .map_err(|e| ServiceError::input(e.to_string(), vec!["status".to_string()]))
}
