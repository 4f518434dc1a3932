use axum::Json;
use serde_json::{json, Value as JsonValue};

pub async fn health(service: &'static str) -> Json<JsonValue> {
    Json(json!({
        "status": "ok",
        "service": service,
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}
