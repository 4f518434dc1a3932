//! Order-item validation against the catalog of record.
//!
//! The check is read-only and deterministic over a [`CatalogSnapshot`], so it
//! can be retried any number of times for the same order attempt.

use std::collections::HashMap;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use fulfillment_core::{MenuItemId, RestaurantId};

use crate::menu::{MenuItem, Restaurant};

/// Largest accepted difference between a requested and the current price.
pub const PRICE_TOLERANCE: Decimal = dec!(0.01);

/// One line of a candidate order as the client priced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestedItem {
    pub menu_item_id: MenuItemId,
    pub requested_price: Decimal,
    /// Zero (or absent on the wire) counts as one unit.
    #[serde(default)]
    pub quantity: u32,
}

impl RequestedItem {
    pub fn effective_quantity(&self) -> u32 {
        self.quantity.max(1)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationRequest {
    pub restaurant_id: RestaurantId,
    pub items: Vec<RequestedItem>,
}

impl ValidationRequest {
    /// Distinct menu item ids referenced by the request.
    pub fn menu_item_ids(&self) -> Vec<MenuItemId> {
        let mut ids: Vec<MenuItemId> = self.items.iter().map(|i| i.menu_item_id).collect();
        ids.sort();
        ids.dedup();
        ids
    }
}

/// Outcome of the four per-item checks.
///
/// Checks run in order (exists, belongs, price, available) and stop at the
/// first failure, so every flag after the failing one stays `false`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemValidation {
    pub menu_item_id: MenuItemId,
    pub item_name: String,
    pub exists: bool,
    pub belongs_to_restaurant: bool,
    pub price_matches: bool,
    pub is_available: bool,
    /// Set whenever the item exists.
    pub current_price: Option<Decimal>,
    pub requested_price: Decimal,
    pub quantity: u32,
    pub error_message: Option<String>,
}

impl ItemValidation {
    pub fn passed(&self) -> bool {
        self.exists && self.belongs_to_restaurant && self.price_matches && self.is_available
    }

    /// `current_price * quantity` for a passing item, zero otherwise.
    pub fn subtotal(&self) -> Decimal {
        match (self.passed(), self.current_price) {
            (true, Some(price)) => price * Decimal::from(self.quantity),
            _ => Decimal::ZERO,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    pub valid: bool,
    pub message: String,
    pub item_results: Vec<ItemValidation>,
    /// Authoritative only when `valid` is true.
    pub total_calculated: Decimal,
    pub restaurant_name: String,
    pub restaurant_address: String,
}

impl ValidationResult {
    fn restaurant_rejected(message: String, restaurant: Option<&Restaurant>) -> Self {
        Self {
            valid: false,
            message,
            item_results: Vec::new(),
            total_calculated: Decimal::ZERO,
            restaurant_name: restaurant.map(|r| r.name.clone()).unwrap_or_default(),
            restaurant_address: restaurant.map(|r| r.address.clone()).unwrap_or_default(),
        }
    }

    pub fn failed_items(&self) -> impl Iterator<Item = &ItemValidation> {
        self.item_results.iter().filter(|r| !r.passed())
    }
}

/// The slice of the catalog a single request needs.
#[derive(Debug, Clone, Default)]
pub struct CatalogSnapshot {
    restaurant: Option<Restaurant>,
    menu_items: HashMap<MenuItemId, MenuItem>,
}

impl CatalogSnapshot {
    pub fn new(restaurant: Option<Restaurant>, menu_items: impl IntoIterator<Item = MenuItem>) -> Self {
        Self {
            restaurant,
            menu_items: menu_items.into_iter().map(|m| (m.id, m)).collect(),
        }
    }

    pub fn restaurant(&self) -> Option<&Restaurant> {
        self.restaurant.as_ref()
    }

    pub fn menu_item(&self, id: MenuItemId) -> Option<&MenuItem> {
        self.menu_items.get(&id)
    }
}

/// Decide whether `request` is a legitimate order and what it costs.
pub fn validate(catalog: &CatalogSnapshot, request: &ValidationRequest) -> ValidationResult {
    let restaurant = match catalog
        .restaurant()
        .filter(|r| r.id == request.restaurant_id)
    {
        Some(r) => r,
        None => {
            return ValidationResult::restaurant_rejected(
                format!("restaurant {} does not exist", request.restaurant_id),
                None,
            );
        }
    };

    if !restaurant.is_active {
        return ValidationResult::restaurant_rejected(
            format!("restaurant \"{}\" is not currently accepting orders", restaurant.name),
            Some(restaurant),
        );
    }

    let mut item_results = Vec::with_capacity(request.items.len());
    let mut errors = Vec::new();
    let mut total = Decimal::ZERO;

    for requested in &request.items {
        let result = check_item(catalog, restaurant.id, requested);
        match &result.error_message {
            Some(err) => errors.push(err.clone()),
            None => total += result.subtotal(),
        }
        item_results.push(result);
    }

    let valid = errors.is_empty();
    let message = if valid {
        format!(
            "validated {} item(s) for restaurant \"{}\", total {:.2}",
            request.items.len(),
            restaurant.name,
            total
        )
    } else {
        format!("validation failed: {}", errors.join(" | "))
    };

    ValidationResult {
        valid,
        message,
        item_results,
        total_calculated: total,
        restaurant_name: restaurant.name.clone(),
        restaurant_address: restaurant.address.clone(),
    }
}

fn check_item(
    catalog: &CatalogSnapshot,
    restaurant_id: RestaurantId,
    requested: &RequestedItem,
) -> ItemValidation {
    let mut result = ItemValidation {
        menu_item_id: requested.menu_item_id,
        item_name: String::new(),
        exists: false,
        belongs_to_restaurant: false,
        price_matches: false,
        is_available: false,
        current_price: None,
        requested_price: requested.requested_price,
        quantity: requested.effective_quantity(),
        error_message: None,
    };

    let Some(item) = catalog.menu_item(requested.menu_item_id) else {
        result.error_message = Some(format!(
            "menu item {} does not exist",
            requested.menu_item_id
        ));
        return result;
    };
    result.exists = true;
    result.item_name = item.name.clone();
    result.current_price = Some(item.price);

    if !item.is_sold_by(restaurant_id) {
        result.error_message = Some(format!(
            "menu item \"{}\" ({}) does not belong to restaurant {}",
            item.name, item.id, restaurant_id
        ));
        return result;
    }
    result.belongs_to_restaurant = true;

    let within_tolerance = item
        .price
        .checked_sub(requested.requested_price)
        .is_some_and(|diff| diff.abs() <= PRICE_TOLERANCE);
    if !within_tolerance {
        result.error_message = Some(format!(
            "price of \"{}\" has changed: requested {:.2}, current {:.2}",
            item.name, requested.requested_price, item.price
        ));
        return result;
    }
    result.price_matches = true;

    if !item.is_available {
        result.error_message = Some(format!(
            "menu item \"{}\" is not currently available",
            item.name
        ));
        return result;
    }
    result.is_available = true;

    result
}
