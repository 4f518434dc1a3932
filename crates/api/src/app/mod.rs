//! Router assembly for the three services.
//!
//! - `services.rs`: stores, peer clients, bus and notifier per service
//! - `routes/`: handlers, one file per resource
//! - `dto.rs`: request bodies and response views
//! - `errors.rs`: the single mapping from failures to JSON error bodies
//!
//! Each service exposes `/health` and `/events` without identity; its `/api`
//! routes require the gateway identity headers.

use std::sync::Arc;

use axum::{routing::get, Extension, Router};

use fulfillment_infra::NoticeBus;

use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

pub use services::{CatalogServices, DeliveryServices, OrderServices};

pub fn build_catalog_app(services: Arc<CatalogServices>) -> Router {
    let bus = services.bus.clone();
    routes::catalog::router()
        .layer(Extension(services))
        .merge(public_routes("catalog-service", bus))
}

pub fn build_order_app(services: Arc<OrderServices>) -> Router {
    let bus = services.bus.clone();
    let api = Router::new()
        .nest("/api/orders", routes::orders::router())
        .layer(Extension(services))
        .layer(axum::middleware::from_fn(middleware::identity_middleware));

    Router::new()
        .merge(public_routes("order-service", bus))
        .merge(api)
}

pub fn build_delivery_app(services: Arc<DeliveryServices>) -> Router {
    let bus = services.bus.clone();
    let api = Router::new()
        .nest("/api/deliveries", routes::deliveries::router())
        .layer(Extension(services))
        .layer(axum::middleware::from_fn(middleware::identity_middleware));

    Router::new()
        .merge(public_routes("delivery-service", bus))
        .merge(api)
}

fn public_routes(service: &'static str, bus: Arc<dyn NoticeBus>) -> Router {
    Router::new()
        .route("/health", get(move || routes::system::health(service)))
        .route("/events", get(routes::events::stream))
        .layer(Extension(bus))
}
