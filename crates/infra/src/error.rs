//! Application-level error taxonomy shared by the three services.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use fulfillment_catalog::ItemValidation;
use fulfillment_core::{DomainError, MenuItemId};

use crate::rpc::RpcError;
use crate::store::StoreError;

/// Per-item diagnostic returned when the catalog rejects an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedItem {
    pub menu_item_id: MenuItemId,
    pub item_name: String,
    pub exists: bool,
    pub belongs_to_restaurant: bool,
    pub price_matches: bool,
    pub is_available: bool,
    pub current_price: Option<Decimal>,
    pub requested_price: Decimal,
    pub error_message: Option<String>,
}

impl From<&ItemValidation> for FailedItem {
    fn from(r: &ItemValidation) -> Self {
        Self {
            menu_item_id: r.menu_item_id,
            item_name: r.item_name.clone(),
            exists: r.exists,
            belongs_to_restaurant: r.belongs_to_restaurant,
            price_matches: r.price_matches,
            is_available: r.is_available,
            current_price: r.current_price,
            requested_price: r.requested_price,
            error_message: r.error_message.clone(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ServiceError {
    /// Missing or malformed request fields. Raised before any outbound call.
    #[error("invalid input: {message}")]
    Input { message: String, fields: Vec<String> },

    /// The catalog rejected one or more items.
    #[error("{message}")]
    ValidationFailed {
        message: String,
        failed_items: Vec<FailedItem>,
    },

    /// A collaborating service was unreachable or exceeded its deadline.
    /// Safe for the client to retry.
    #[error("{service} unavailable: {reason}")]
    UpstreamUnavailable { service: &'static str, reason: String },

    #[error("invalid {entity} transition from {from} to {to}")]
    InvalidTransition {
        entity: &'static str,
        from: String,
        to: String,
    },

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("storage failure: {0}")]
    Store(String),

    /// A domain invariant broke; indicates a bug rather than bad input.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    pub fn input(message: impl Into<String>, fields: Vec<String>) -> Self {
        Self::Input {
            message: message.into(),
            fields,
        }
    }

    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn upstream(service: &'static str, err: &RpcError) -> Self {
        Self::UpstreamUnavailable {
            service,
            reason: err.to_string(),
        }
    }

    /// Whether a client may safely repeat the same request.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ServiceError::UpstreamUnavailable { .. })
    }

    /// HTTP status this error is reported with.
    pub fn status_code(&self) -> u16 {
        match self {
            ServiceError::Input { .. }
            | ServiceError::ValidationFailed { .. }
            | ServiceError::InvalidTransition { .. } => 400,
            ServiceError::Forbidden(_) => 403,
            ServiceError::NotFound { .. } => 404,
            ServiceError::Conflict(_) => 409,
            ServiceError::UpstreamUnavailable { .. } => 503,
            ServiceError::Store(_) | ServiceError::Internal(_) => 500,
        }
    }

    /// Stable machine-readable code for the `error` field of responses.
    pub fn code(&self) -> &'static str {
        match self {
            ServiceError::Input { .. } => "invalid_input",
            ServiceError::ValidationFailed { .. } => "validation_failed",
            ServiceError::UpstreamUnavailable { .. } => "upstream_unavailable",
            ServiceError::InvalidTransition { .. } => "invalid_transition",
            ServiceError::Forbidden(_) => "forbidden",
            ServiceError::NotFound { .. } => "not_found",
            ServiceError::Conflict(_) => "conflict",
            ServiceError::Store(_) => "storage_error",
            ServiceError::Internal(_) => "internal_error",
        }
    }
}

impl From<DomainError> for ServiceError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::Validation(msg) | DomainError::InvalidId(msg) => Self::Input {
                message: msg,
                fields: Vec::new(),
            },
            DomainError::InvalidTransition { entity, from, to } => {
                Self::InvalidTransition { entity, from, to }
            }
            DomainError::Forbidden(msg) => Self::Forbidden(msg),
            DomainError::Conflict(msg) => Self::Conflict(msg),
            DomainError::InvariantViolation(msg) => Self::Internal(msg),
        }
    }
}

impl From<StoreError> for ServiceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(msg) => Self::Conflict(msg),
            StoreError::NotFound { entity, id } => Self::NotFound { entity, id },
            other => Self::Store(other.to_string()),
        }
    }
}
