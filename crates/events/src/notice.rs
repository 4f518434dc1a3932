use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use uuid::Uuid;

/// Named fan-out channel.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Topic {
    #[serde(rename = "order:created")]
    OrderCreated,
    #[serde(rename = "order:statusChanged")]
    OrderStatusChanged,
    #[serde(rename = "delivery:updated")]
    DeliveryUpdated,
}

impl Topic {
    pub const ALL: [Topic; 3] = [
        Topic::OrderCreated,
        Topic::OrderStatusChanged,
        Topic::DeliveryUpdated,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::OrderCreated => "order:created",
            Topic::OrderStatusChanged => "order:statusChanged",
            Topic::DeliveryUpdated => "delivery:updated",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == name)
    }
}

impl core::fmt::Display for Topic {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// "Something changed, re-fetch it."
///
/// `context` holds small hints for observers (order number, delivery type,
/// courier name). It is flattened next to `id` and `newStatus` on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeNotice {
    notice_id: Uuid,
    topic: Topic,
    id: i64,
    new_status: String,
    occurred_at: DateTime<Utc>,
    #[serde(flatten)]
    context: Map<String, JsonValue>,
}

impl ChangeNotice {
    pub fn new(topic: Topic, id: impl Into<i64>, new_status: impl ToString) -> Self {
        Self {
            notice_id: Uuid::now_v7(),
            topic,
            id: id.into(),
            new_status: new_status.to_string(),
            occurred_at: Utc::now(),
            context: Map::new(),
        }
    }

    /// Attach one context hint. Reserved keys are ignored.
    pub fn with(mut self, key: &str, value: impl Into<JsonValue>) -> Self {
        if !matches!(key, "noticeId" | "topic" | "id" | "newStatus" | "occurredAt") {
            self.context.insert(key.to_string(), value.into());
        }
        self
    }

    pub fn notice_id(&self) -> Uuid {
        self.notice_id
    }

    pub fn topic(&self) -> Topic {
        self.topic
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn new_status(&self) -> &str {
        &self.new_status
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    pub fn context(&self) -> &Map<String, JsonValue> {
        &self.context
    }

    /// Observer-facing payload: `{id, newStatus, ...context}`.
    pub fn payload(&self) -> JsonValue {
        let mut body = Map::new();
        body.insert("id".into(), JsonValue::from(self.id));
        body.insert("newStatus".into(), JsonValue::from(self.new_status.clone()));
        for (k, v) in &self.context {
            body.insert(k.clone(), v.clone());
        }
        JsonValue::Object(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_flattens_context_next_to_id_and_status() {
        let notice = ChangeNotice::new(Topic::DeliveryUpdated, 12, "EN_CAMINO")
            .with("type", "accepted")
            .with("orderId", 7)
            .with("id", 999);

        let payload = notice.payload();
        assert_eq!(payload["id"], 12);
        assert_eq!(payload["newStatus"], "EN_CAMINO");
        assert_eq!(payload["type"], "accepted");
        assert_eq!(payload["orderId"], 7);
    }

    #[test]
    fn wire_form_survives_a_bus_hop() {
        let notice = ChangeNotice::new(Topic::OrderStatusChanged, 3, "CANCELADO")
            .with("reason", "out of stock");
        let raw = serde_json::to_string(&notice).unwrap();
        assert!(raw.contains("\"topic\":\"order:statusChanged\""));

        let back: ChangeNotice = serde_json::from_str(&raw).unwrap();
        assert_eq!(back, notice);
        assert_eq!(Topic::parse("order:created"), Some(Topic::OrderCreated));
        assert_eq!(Topic::parse("order:deleted"), None);
    }
}
