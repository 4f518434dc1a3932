//! HTTP surface of the three services: routers, identity extraction and
//! request/response mapping.

pub mod app;
pub mod context;
pub mod middleware;
