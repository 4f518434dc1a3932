//! Strongly-typed identifiers.
//!
//! Every service owns its own store and assigns numeric keys on insert, so ids
//! are plain 64-bit integers wrapped per entity. Ids that cross a service
//! boundary (an order id held by a delivery) are weak references: nothing
//! guarantees the other side still knows them.

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// Restaurant (catalog-owned).
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RestaurantId(i64);

/// Menu item (catalog-owned).
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MenuItemId(i64);

/// Order (ledger-owned).
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(i64);

/// Delivery (dispatcher-owned).
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeliveryId(i64);

/// User as issued by the external identity service.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(i64);

macro_rules! impl_numeric_id {
    ($t:ty, $name:literal) => {
        impl $t {
            pub const fn new(raw: i64) -> Self {
                Self(raw)
            }

            pub const fn get(self) -> i64 {
                self.0
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                core::fmt::Display::fmt(&self.0, f)
            }
        }

        impl From<i64> for $t {
            fn from(value: i64) -> Self {
                Self(value)
            }
        }

        impl From<$t> for i64 {
            fn from(value: $t) -> Self {
                value.0
            }
        }

        impl FromStr for $t {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let raw = s
                    .trim()
                    .parse::<i64>()
                    .map_err(|e| DomainError::invalid_id(format!("{}: {}", $name, e)))?;
                if raw <= 0 {
                    return Err(DomainError::invalid_id(format!(
                        "{}: must be positive, got {raw}",
                        $name
                    )));
                }
                Ok(Self(raw))
            }
        }
    };
}

impl_numeric_id!(RestaurantId, "RestaurantId");
impl_numeric_id!(MenuItemId, "MenuItemId");
impl_numeric_id!(OrderId, "OrderId");
impl_numeric_id!(DeliveryId, "DeliveryId");
impl_numeric_id!(UserId, "UserId");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_positive_ids_and_rejects_garbage() {
        let id: OrderId = " 42 ".parse().unwrap();
        assert_eq!(id.get(), 42);
        assert_eq!(id.to_string(), "42");

        match "abc".parse::<OrderId>() {
            Err(DomainError::InvalidId(msg)) if msg.starts_with("OrderId") => {}
            other => panic!("expected InvalidId, got {other:?}"),
        }
        assert!("0".parse::<DeliveryId>().is_err());
        assert!("-3".parse::<UserId>().is_err());
    }

    #[test]
    fn serializes_transparently() {
        let json = serde_json::to_string(&MenuItemId::new(7)).unwrap();
        assert_eq!(json, "7");
        let back: MenuItemId = serde_json::from_str("7").unwrap();
        assert_eq!(back, MenuItemId::new(7));
    }
}
