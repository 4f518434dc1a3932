use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Extension},
    http::StatusCode,
    response::IntoResponse,
    routing::post,
    Json, Router,
};

use fulfillment_catalog::ValidationRequest;
use fulfillment_infra::rpc::VALIDATE_ORDER_ITEMS_PATH;

use crate::app::errors;
use crate::app::services::CatalogServices;

/// Service-to-service procedures. Called by the order ledger, not by end
/// users, so no gateway identity is required.
pub fn router() -> Router {
    Router::new().route(VALIDATE_ORDER_ITEMS_PATH, post(validate_order_items))
}

/// POST /rpc/catalog.v1.CatalogService/ValidateOrderItems
///
/// A well-formed request always gets a 200 with `valid` set either way;
/// only a storage failure turns into an error status.
pub async fn validate_order_items(
    Extension(services): Extension<Arc<CatalogServices>>,
    body: Result<Json<ValidationRequest>, JsonRejection>,
) -> axum::response::Response {
    let Json(request) = match body {
        Ok(b) => b,
        Err(rejection) => return errors::json_rejection(rejection),
    };

    match services.validator.validate_order_items(&request).await {
        Ok(result) => (StatusCode::OK, Json(result)).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}
