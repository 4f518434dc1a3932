//! Catalog of record: restaurants, menu items, and order-item validation.
//!
//! Pure domain logic. Loading a [`CatalogSnapshot`] from storage is the
//! infrastructure layer's job; deciding whether an order is legitimate and
//! what it costs happens here.

pub mod menu;
pub mod validation;

pub use menu::{MenuItem, Restaurant};
pub use validation::{
    validate, CatalogSnapshot, ItemValidation, RequestedItem, ValidationRequest, ValidationResult,
    PRICE_TOLERANCE,
};
