use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};

use fulfillment_core::{DeliveryId, OrderId, UserId};
use fulfillment_infra::ServiceError;

use crate::app::{dto, errors, services::DeliveryServices};
use crate::context::CallerContext;

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_delivery).get(list_deliveries))
        .route("/available-orders", get(available_orders))
        .route("/accept", post(accept_order))
        .route("/courier/:courier_id", get(courier_deliveries))
        .route("/courier/:courier_id/active", get(courier_active_deliveries))
        .route("/order/:order_id", get(order_deliveries))
        .route("/:id", get(get_delivery))
        .route("/:id/start", post(start_delivery))
        .route("/:id/complete", post(complete_delivery))
        .route("/:id/cancel", post(cancel_delivery))
        .route("/:id/reassign", put(reassign_delivery))
}

/// POST /api/deliveries
///
/// Direct assignment by an admin or the restaurant; the delivery starts in
/// ASIGNADO.
pub async fn create_delivery(
    Extension(services): Extension<Arc<DeliveryServices>>,
    Extension(ctx): Extension<CallerContext>,
    body: Result<Json<dto::CreateDeliveryRequest>, JsonRejection>,
) -> axum::response::Response {
    let Json(body) = match body {
        Ok(b) => b,
        Err(rejection) => return errors::json_rejection(rejection),
    };
    let (order_id, courier_id) = match body.validate() {
        Ok(v) => v,
        Err(e) => return errors::service_error_to_response(e),
    };

    match services
        .dispatcher
        .create_delivery(ctx.caller(), order_id, courier_id)
        .await
    {
        Ok(outcome) => (StatusCode::CREATED, Json(dto::DeliveryView::from(outcome))).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn list_deliveries(
    Extension(services): Extension<Arc<DeliveryServices>>,
) -> axum::response::Response {
    match services.dispatcher.list_all().await {
        Ok(list) => (StatusCode::OK, Json(dto::delivery_views(list))).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

/// GET /api/deliveries/available-orders
///
/// FINALIZADA orders nobody is delivering yet.
pub async fn available_orders(
    Extension(services): Extension<Arc<DeliveryServices>>,
    Extension(ctx): Extension<CallerContext>,
) -> axum::response::Response {
    match services.dispatcher.available_orders(ctx.caller()).await {
        Ok(orders) => (StatusCode::OK, Json(orders)).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

/// POST /api/deliveries/accept
///
/// Body: `{"orderId": 12}`. The calling courier takes the order; the delivery
/// is created EN_CAMINO and the order follows.
pub async fn accept_order(
    Extension(services): Extension<Arc<DeliveryServices>>,
    Extension(ctx): Extension<CallerContext>,
    body: Result<Json<dto::AcceptDeliveryRequest>, JsonRejection>,
) -> axum::response::Response {
    let Json(body) = match body {
        Ok(b) => b,
        Err(rejection) => return errors::json_rejection(rejection),
    };
    let Some(order_id) = body.order_id else {
        return errors::service_error_to_response(ServiceError::input(
            "orderId is required",
            vec!["orderId".to_string()],
        ));
    };

    match services.dispatcher.accept(ctx.caller(), order_id).await {
        Ok(outcome) => (StatusCode::CREATED, Json(dto::DeliveryView::from(outcome))).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn courier_deliveries(
    Extension(services): Extension<Arc<DeliveryServices>>,
    Extension(ctx): Extension<CallerContext>,
    Path(courier_id): Path<String>,
) -> axum::response::Response {
    let courier_id: UserId = match errors::parse_id(&courier_id, "courier id") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.dispatcher.by_courier(ctx.caller(), courier_id).await {
        Ok(list) => (StatusCode::OK, Json(dto::delivery_views(list))).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn courier_active_deliveries(
    Extension(services): Extension<Arc<DeliveryServices>>,
    Extension(ctx): Extension<CallerContext>,
    Path(courier_id): Path<String>,
) -> axum::response::Response {
    let courier_id: UserId = match errors::parse_id(&courier_id, "courier id") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.dispatcher.active_by_courier(ctx.caller(), courier_id).await {
        Ok(list) => (StatusCode::OK, Json(dto::delivery_views(list))).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn order_deliveries(
    Extension(services): Extension<Arc<DeliveryServices>>,
    Path(order_id): Path<String>,
) -> axum::response::Response {
    let order_id: OrderId = match errors::parse_id(&order_id, "order id") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.dispatcher.by_order(order_id).await {
        Ok(list) => (StatusCode::OK, Json(dto::delivery_views(list))).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn get_delivery(
    Extension(services): Extension<Arc<DeliveryServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id: DeliveryId = match errors::parse_id(&id, "delivery id") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.dispatcher.get(id).await {
        Ok(delivery) => (StatusCode::OK, Json(dto::DeliveryView::from(delivery))).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn start_delivery(
    Extension(services): Extension<Arc<DeliveryServices>>,
    Extension(ctx): Extension<CallerContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id: DeliveryId = match errors::parse_id(&id, "delivery id") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    outcome_response(services.dispatcher.start(ctx.caller(), id).await)
}

pub async fn complete_delivery(
    Extension(services): Extension<Arc<DeliveryServices>>,
    Extension(ctx): Extension<CallerContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id: DeliveryId = match errors::parse_id(&id, "delivery id") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    outcome_response(services.dispatcher.complete(ctx.caller(), id).await)
}

pub async fn cancel_delivery(
    Extension(services): Extension<Arc<DeliveryServices>>,
    Extension(ctx): Extension<CallerContext>,
    Path(id): Path<String>,
    body: Option<Json<dto::ReasonRequest>>,
) -> axum::response::Response {
    let id: DeliveryId = match errors::parse_id(&id, "delivery id") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let reason = body.and_then(|Json(b)| b.reason);
    outcome_response(services.dispatcher.cancel(ctx.caller(), id, reason).await)
}

/// PUT /api/deliveries/:id/reassign
///
/// Body: `{"courierId": 41}`. The delivery goes back to ASIGNADO under the
/// new courier; the order is left as it is.
pub async fn reassign_delivery(
    Extension(services): Extension<Arc<DeliveryServices>>,
    Extension(ctx): Extension<CallerContext>,
    Path(id): Path<String>,
    body: Result<Json<dto::ReassignRequest>, JsonRejection>,
) -> axum::response::Response {
    let id: DeliveryId = match errors::parse_id(&id, "delivery id") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let Json(body) = match body {
        Ok(b) => b,
        Err(rejection) => return errors::json_rejection(rejection),
    };
    let Some(courier_id) = body.courier_id else {
        return errors::service_error_to_response(ServiceError::input(
            "courierId is required",
            vec!["courierId".to_string()],
        ));
    };

    outcome_response(services.dispatcher.reassign(ctx.caller(), id, courier_id).await)
}

fn outcome_response(result: Result<fulfillment_infra::DeliveryOutcome, ServiceError>) -> axum::response::Response {
    match result {
        Ok(outcome) => (StatusCode::OK, Json(dto::DeliveryView::from(outcome))).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}
