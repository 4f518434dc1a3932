//! Delivery dispatch domain: the Delivery aggregate and its lifecycle.
//!
//! A delivery holds only a weak reference to its order. Keeping the order's
//! status in step is the application layer's concern, driven by the
//! [`DeliveryChanged`] facts returned here.

pub mod delivery;
pub mod status;

pub use delivery::{Delivery, DeliveryChanged, DeliveryTransition, NewDelivery};
pub use status::DeliveryStatus;
