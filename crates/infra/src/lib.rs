//! Infrastructure and application layer: stores, outbound clients, the
//! three services, status synchronization, notifications and configuration.

pub mod catalog_service;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod event_bus;
pub mod ledger;
pub mod notify;
pub mod queries;
pub mod rpc;
pub mod store;
pub mod sync;

pub use catalog_service::CatalogValidator;
pub use dispatcher::{DeliveryDispatcher, DeliveryOutcome};
pub use error::{FailedItem, ServiceError};
pub use event_bus::NoticeBus;
pub use ledger::{CreateOrder, CreatedOrder, OrderLedger, OrderLine, StatusChange};
pub use sync::{StatusSynchronizer, SyncOutcome};
