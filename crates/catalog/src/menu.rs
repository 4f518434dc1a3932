use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use fulfillment_core::{MenuItemId, RestaurantId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Restaurant {
    pub id: RestaurantId,
    pub name: String,
    pub address: String,
    pub is_active: bool,
}

/// A sellable item. `price` is authoritative; prices sent by clients are only
/// ever compared against it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MenuItem {
    pub id: MenuItemId,
    pub restaurant_id: RestaurantId,
    pub name: String,
    pub price: Decimal,
    pub is_available: bool,
}

impl MenuItem {
    pub fn is_sold_by(&self, restaurant_id: RestaurantId) -> bool {
        self.restaurant_id == restaurant_id
    }
}
