//! Catalog Validator service.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, instrument, warn};

use fulfillment_catalog::{validate, CatalogSnapshot, ValidationRequest, ValidationResult};

use crate::error::ServiceError;
use crate::rpc::{CatalogRpc, RpcError};
use crate::store::CatalogStore;

/// Answers "is this order legitimate and what does it cost".
///
/// Loads the restaurant and the referenced menu items, then runs the pure
/// validation over that snapshot. Never writes.
#[derive(Clone)]
pub struct CatalogValidator {
    store: Arc<dyn CatalogStore>,
}

impl CatalogValidator {
    pub fn new(store: Arc<dyn CatalogStore>) -> Self {
        Self { store }
    }

    #[instrument(
        skip(self, request),
        fields(restaurant_id = %request.restaurant_id, items = request.items.len())
    )]
    pub async fn validate_order_items(
        &self,
        request: &ValidationRequest,
    ) -> Result<ValidationResult, ServiceError> {
        let restaurant = self.store.restaurant(request.restaurant_id).await?;
        let items = match &restaurant {
            Some(r) if r.is_active => self.store.menu_items(&request.menu_item_ids()).await?,
            _ => Vec::new(),
        };

        let result = validate(&CatalogSnapshot::new(restaurant, items), request);
        if result.valid {
            info!(total = %result.total_calculated, "order items validated");
        } else {
            warn!(
                failed = result.failed_items().count(),
                message = %result.message,
                "order items rejected"
            );
        }
        Ok(result)
    }
}

/// In-process use by the order ledger.
#[async_trait]
impl CatalogRpc for CatalogValidator {
    async fn validate_order_items(
        &self,
        request: &ValidationRequest,
    ) -> Result<ValidationResult, RpcError> {
        CatalogValidator::validate_order_items(self, request)
            .await
            .map_err(|e| RpcError::Unavailable(e.to_string()))
    }
}
