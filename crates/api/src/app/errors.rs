use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::{json, Value as JsonValue};
use tracing::error;

use fulfillment_infra::ServiceError;

pub fn service_error_to_response(err: ServiceError) -> axum::response::Response {
    let status = StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    if status.is_server_error() {
        error!(error = %err, "request failed");
    }

    let mut body = json!({
        "error": err.code(),
        "message": err.to_string(),
    });
    let extra = match &err {
        ServiceError::Input { fields, .. } if !fields.is_empty() => json!({ "fields": fields }),
        ServiceError::ValidationFailed { failed_items, .. } => json!({ "failedItems": failed_items }),
        ServiceError::UpstreamUnavailable { service, .. } => json!({
            "service": service,
            "retryable": err.is_retryable(),
        }),
        ServiceError::InvalidTransition { entity, from, to } => json!({
            "entity": entity,
            "from": from,
            "to": to,
        }),
        ServiceError::NotFound { entity, id } => json!({ "entity": entity, "id": id }),
        _ => JsonValue::Null,
    };
    if let (Some(body), JsonValue::Object(extra)) = (body.as_object_mut(), extra) {
        body.extend(extra);
    }

    (status, axum::Json(body)).into_response()
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

/// Malformed JSON bodies are input errors like any other.
pub fn json_rejection(rejection: JsonRejection) -> axum::response::Response {
    json_error(StatusCode::BAD_REQUEST, "invalid_input", rejection.body_text())
}

/// Parse a path segment into a typed id, answering 400 when it is not one.
pub fn parse_id<T>(raw: &str, what: &'static str) -> Result<T, axum::response::Response>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse::<T>()
        .map_err(|e| json_error(StatusCode::BAD_REQUEST, "invalid_id", format!("invalid {what}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use fulfillment_core::OrderId;

    async fn body_of(resp: axum::response::Response) -> JsonValue {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn transition_errors_name_both_states() {
        let resp = service_error_to_response(ServiceError::InvalidTransition {
            entity: "order",
            from: "ENTREGADO".to_string(),
            to: "CANCELADO".to_string(),
        });
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body = body_of(resp).await;
        assert_eq!(body["error"], "invalid_transition");
        assert_eq!(body["from"], "ENTREGADO");
        assert_eq!(body["to"], "CANCELADO");
    }

    #[tokio::test]
    async fn upstream_failures_are_marked_retryable() {
        let resp = service_error_to_response(ServiceError::UpstreamUnavailable {
            service: "catalog",
            reason: "deadline exceeded".to_string(),
        });
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body = body_of(resp).await;
        assert_eq!(body["retryable"], true);
        assert_eq!(body["service"], "catalog");
    }

    #[tokio::test]
    async fn input_errors_list_the_offending_fields() {
        let resp = service_error_to_response(ServiceError::input(
            "missing required fields",
            vec!["restaurantId".to_string(), "items".to_string()],
        ));
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body = body_of(resp).await;
        assert_eq!(body["fields"], json!(["restaurantId", "items"]));
    }

    #[test]
    fn bad_path_ids_are_rejected() {
        assert!(parse_id::<OrderId>("17", "order id").is_ok());
        let resp = parse_id::<OrderId>("seventeen", "order id").unwrap_err();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }
}
