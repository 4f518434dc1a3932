//! `fulfillment-core`: shared domain building blocks.
//!
//! Pure domain primitives only: identifiers, errors, the lifecycle contract
//! both state machines implement, and the authenticated caller identity.

pub mod aggregate;
pub mod caller;
pub mod error;
pub mod id;
pub mod lifecycle;

pub use aggregate::{AggregateRoot, ExpectedVersion};
pub use caller::{Caller, Role};
pub use error::{DomainError, DomainResult};
pub use id::{DeliveryId, MenuItemId, OrderId, RestaurantId, UserId};
pub use lifecycle::Lifecycle;
