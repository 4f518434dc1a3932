use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, instrument};

use fulfillment_catalog::{ValidationRequest, ValidationResult};

use super::{CatalogRpc, RpcError, VALIDATE_ORDER_ITEMS_PATH};

/// Error body shape shared by every service (`{"error", "message"}`).
#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

/// Turn a non-success response into [`RpcError::Rejected`].
pub(crate) async fn rejection(resp: reqwest::Response) -> RpcError {
    let status = resp.status().as_u16();
    let raw = resp.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&raw)
        .map(|b| b.message)
        .unwrap_or(raw);
    RpcError::Rejected { status, message }
}

/// Calls the catalog validator over HTTP.
#[derive(Debug, Clone)]
pub struct HttpCatalogClient {
    client: reqwest::Client,
    base_url: String,
    deadline: Duration,
}

impl HttpCatalogClient {
    pub fn new(base_url: impl Into<String>, deadline: Duration) -> Result<Self, RpcError> {
        let client = reqwest::Client::builder()
            .timeout(deadline)
            .build()
            .map_err(|e| RpcError::Unavailable(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            deadline,
        })
    }
}

#[async_trait]
impl CatalogRpc for HttpCatalogClient {
    #[instrument(
        skip(self, request),
        fields(restaurant_id = %request.restaurant_id, items = request.items.len()),
        err
    )]
    async fn validate_order_items(
        &self,
        request: &ValidationRequest,
    ) -> Result<ValidationResult, RpcError> {
        let url = format!("{}{}", self.base_url, VALIDATE_ORDER_ITEMS_PATH);
        let resp = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| RpcError::from_reqwest(e, self.deadline))?;

        if !resp.status().is_success() {
            return Err(rejection(resp).await);
        }

        let result: ValidationResult = resp
            .json()
            .await
            .map_err(|e| RpcError::from_reqwest(e, self.deadline))?;
        debug!(valid = result.valid, "catalog answered");
        Ok(result)
    }
}
