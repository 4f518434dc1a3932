use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, patch, post},
    Json, Router,
};

use fulfillment_core::{OrderId, RestaurantId, UserId};
use fulfillment_infra::store::OrderFilter;
use fulfillment_infra::CreateOrder;

use crate::app::{dto, errors, services::OrderServices};
use crate::context::CallerContext;

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_order).get(list_orders))
        .route("/user/:user_id", get(list_user_orders))
        .route("/restaurant/:restaurant_id", get(list_restaurant_orders))
        .route("/number/:order_number", get(get_order_by_number))
        .route("/:id", get(get_order))
        .route("/:id/status", patch(update_status))
        .route("/:id/cancel", post(cancel_order))
        .route("/:id/reject", post(reject_order))
}

/// POST /api/orders
///
/// Validated against the catalog before anything is stored. Answers 201 with
/// the order and a summary of what the catalog confirmed.
pub async fn create_order(
    Extension(services): Extension<Arc<OrderServices>>,
    Extension(ctx): Extension<CallerContext>,
    body: Result<Json<CreateOrder>, JsonRejection>,
) -> axum::response::Response {
    let Json(cmd) = match body {
        Ok(b) => b,
        Err(rejection) => return errors::json_rejection(rejection),
    };

    match services.ledger.create_order(ctx.caller(), cmd).await {
        Ok(created) => (StatusCode::CREATED, Json(created)).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

/// GET /api/orders?status=FINALIZADA
pub async fn list_orders(
    Extension(services): Extension<Arc<OrderServices>>,
    Extension(ctx): Extension<CallerContext>,
    Query(query): Query<dto::OrderListQuery>,
) -> axum::response::Response {
    let status = match query.status() {
        Ok(s) => s,
        Err(e) => return errors::service_error_to_response(e),
    };
    let filter = OrderFilter {
        status,
        ..OrderFilter::default()
    };
    list(&services, &ctx, filter).await
}

pub async fn list_user_orders(
    Extension(services): Extension<Arc<OrderServices>>,
    Extension(ctx): Extension<CallerContext>,
    Path(user_id): Path<String>,
) -> axum::response::Response {
    let user_id: UserId = match errors::parse_id(&user_id, "user id") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let filter = OrderFilter {
        user_id: Some(user_id),
        ..OrderFilter::default()
    };
    list(&services, &ctx, filter).await
}

pub async fn list_restaurant_orders(
    Extension(services): Extension<Arc<OrderServices>>,
    Extension(ctx): Extension<CallerContext>,
    Path(restaurant_id): Path<String>,
) -> axum::response::Response {
    let restaurant_id: RestaurantId = match errors::parse_id(&restaurant_id, "restaurant id") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let filter = OrderFilter {
        restaurant_id: Some(restaurant_id),
        ..OrderFilter::default()
    };
    list(&services, &ctx, filter).await
}

pub async fn get_order(
    Extension(services): Extension<Arc<OrderServices>>,
    Extension(ctx): Extension<CallerContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id: OrderId = match errors::parse_id(&id, "order id") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.ledger.get(ctx.caller(), id).await {
        Ok(order) => (StatusCode::OK, Json(order)).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn get_order_by_number(
    Extension(services): Extension<Arc<OrderServices>>,
    Extension(ctx): Extension<CallerContext>,
    Path(order_number): Path<String>,
) -> axum::response::Response {
    match services.ledger.get_by_number(ctx.caller(), &order_number).await {
        Ok(order) => (StatusCode::OK, Json(order)).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

/// PATCH /api/orders/:id/status
///
/// Body: `{"status": "EN_PROCESO", "reason": "..."}`. The transition table
/// and the caller's role both have to allow the move.
pub async fn update_status(
    Extension(services): Extension<Arc<OrderServices>>,
    Extension(ctx): Extension<CallerContext>,
    Path(id): Path<String>,
    body: Result<Json<dto::StatusUpdateRequest>, JsonRejection>,
) -> axum::response::Response {
    let id: OrderId = match errors::parse_id(&id, "order id") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let Json(body) = match body {
        Ok(b) => b,
        Err(rejection) => return errors::json_rejection(rejection),
    };
    let change = match body.into_change() {
        Ok(c) => c,
        Err(e) => return errors::service_error_to_response(e),
    };

    match services.ledger.update_status(ctx.caller(), id, change).await {
        Ok(order) => (StatusCode::OK, Json(order)).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn cancel_order(
    Extension(services): Extension<Arc<OrderServices>>,
    Extension(ctx): Extension<CallerContext>,
    Path(id): Path<String>,
    body: Option<Json<dto::ReasonRequest>>,
) -> axum::response::Response {
    let id: OrderId = match errors::parse_id(&id, "order id") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let reason = body.and_then(|Json(b)| b.reason);

    match services.ledger.cancel(ctx.caller(), id, reason).await {
        Ok(order) => (StatusCode::OK, Json(order)).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn reject_order(
    Extension(services): Extension<Arc<OrderServices>>,
    Extension(ctx): Extension<CallerContext>,
    Path(id): Path<String>,
    body: Option<Json<dto::ReasonRequest>>,
) -> axum::response::Response {
    let id: OrderId = match errors::parse_id(&id, "order id") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let reason = body.and_then(|Json(b)| b.reason);

    match services.ledger.reject(ctx.caller(), id, reason).await {
        Ok(order) => (StatusCode::OK, Json(order)).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

async fn list(services: &OrderServices, ctx: &CallerContext, filter: OrderFilter) -> axum::response::Response {
    match services.ledger.list(ctx.caller(), filter).await {
        Ok(orders) => (StatusCode::OK, Json(orders)).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}
