use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use tracing::instrument;

use fulfillment_core::{Caller, OrderId};
use fulfillment_orders::{Order, OrderStatus};

use super::catalog::rejection;
use super::{OrderLedgerClient, RpcError, USER_ID_HEADER, USER_NAME_HEADER, USER_ROLE_HEADER};
use crate::error::ServiceError;
use crate::ledger::{OrderLedger, StatusChange};
use crate::store::OrderFilter;

/// Calls the order ledger's HTTP API, forwarding the acting identity in the
/// gateway headers.
#[derive(Debug, Clone)]
pub struct HttpOrderLedgerClient {
    client: reqwest::Client,
    base_url: String,
    deadline: Duration,
}

impl HttpOrderLedgerClient {
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

    fn with_identity(&self, req: reqwest::RequestBuilder, caller: &Caller) -> reqwest::RequestBuilder {
        let req = req
            .header(USER_ID_HEADER, caller.user_id.to_string())
            .header(USER_ROLE_HEADER, caller.role.as_str());
        match &caller.display_name {
            Some(name) => req.header(USER_NAME_HEADER, name),
            None => req,
        }
    }

    async fn send(&self, req: reqwest::RequestBuilder) -> Result<reqwest::Response, RpcError> {
        req.send()
            .await
            .map_err(|e| RpcError::from_reqwest(e, self.deadline))
    }

    async fn decode<T: serde::de::DeserializeOwned>(&self, resp: reqwest::Response) -> Result<T, RpcError> {
        if !resp.status().is_success() {
            return Err(rejection(resp).await);
        }
        resp.json()
            .await
            .map_err(|e| RpcError::from_reqwest(e, self.deadline))
    }
}

#[async_trait]
impl OrderLedgerClient for HttpOrderLedgerClient {
    #[instrument(skip(self, on_behalf_of), fields(order_id = %id), err)]
    async fn get_order(&self, on_behalf_of: &Caller, id: OrderId) -> Result<Option<Order>, RpcError> {
        let url = format!("{}/api/orders/{}", self.base_url, id);
        let resp = self
            .send(self.with_identity(self.client.get(&url), on_behalf_of))
            .await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        self.decode(resp).await.map(Some)
    }

    #[instrument(skip(self, on_behalf_of), fields(status = %status), err)]
    async fn list_orders_by_status(
        &self,
        on_behalf_of: &Caller,
        status: OrderStatus,
    ) -> Result<Vec<Order>, RpcError> {
        let url = format!("{}/api/orders", self.base_url);
        let req = self
            .client
            .get(&url)
            .query(&[("status", status.as_str())]);
        let resp = self.send(self.with_identity(req, on_behalf_of)).await?;
        self.decode(resp).await
    }

    #[instrument(skip(self, on_behalf_of, change), fields(order_id = %id, status = %change.status), err)]
    async fn update_status(
        &self,
        on_behalf_of: &Caller,
        id: OrderId,
        change: StatusChange,
    ) -> Result<Order, RpcError> {
        let url = format!("{}/api/orders/{}/status", self.base_url, id);
        let req = self.client.patch(&url).json(&change);
        let resp = self.send(self.with_identity(req, on_behalf_of)).await?;
        self.decode(resp).await
    }
}

fn refused(err: ServiceError) -> RpcError {
    match err {
        ServiceError::UpstreamUnavailable { reason, .. } => RpcError::Unavailable(reason),
        other => RpcError::Rejected {
            status: other.status_code(),
            message: other.to_string(),
        },
    }
}

/// In-process ledger, used when both services share one process.
#[async_trait]
impl OrderLedgerClient for OrderLedger {
    async fn get_order(&self, on_behalf_of: &Caller, id: OrderId) -> Result<Option<Order>, RpcError> {
        match self.get(on_behalf_of, id).await {
            Ok(order) => Ok(Some(order)),
            Err(ServiceError::NotFound { .. }) => Ok(None),
            Err(other) => Err(refused(other)),
        }
    }

    async fn list_orders_by_status(
        &self,
        on_behalf_of: &Caller,
        status: OrderStatus,
    ) -> Result<Vec<Order>, RpcError> {
        let filter = OrderFilter {
            status: Some(status),
            ..OrderFilter::default()
        };
        self.list(on_behalf_of, filter).await.map_err(refused)
    }

    async fn update_status(
        &self,
        on_behalf_of: &Caller,
        id: OrderId,
        change: StatusChange,
    ) -> Result<Order, RpcError> {
        OrderLedger::update_status(self, on_behalf_of, id, change)
            .await
            .map_err(refused)
    }
}
