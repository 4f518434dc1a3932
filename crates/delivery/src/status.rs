use core::str::FromStr;

use serde::{Deserialize, Serialize};

use fulfillment_core::{DomainError, Lifecycle};

/// Delivery lifecycle.
///
/// ASIGNADO -> {EN_CAMINO, CANCELADO}; EN_CAMINO -> {ENTREGADO, CANCELADO}.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeliveryStatus {
    Asignado,
    EnCamino,
    Entregado,
    Cancelado,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Asignado => "ASIGNADO",
            DeliveryStatus::EnCamino => "EN_CAMINO",
            DeliveryStatus::Entregado => "ENTREGADO",
            DeliveryStatus::Cancelado => "CANCELADO",
        }
    }

    /// Counts toward the one-delivery-per-order rule.
    pub fn is_live(&self) -> bool {
        *self != DeliveryStatus::Cancelado
    }

    /// Courier still has work to do.
    pub fn is_active(&self) -> bool {
        matches!(self, DeliveryStatus::Asignado | DeliveryStatus::EnCamino)
    }
}

impl Lifecycle for DeliveryStatus {
    const ENTITY: &'static str = "delivery";

    const ALL: &'static [Self] = &[
        DeliveryStatus::Asignado,
        DeliveryStatus::EnCamino,
        DeliveryStatus::Entregado,
        DeliveryStatus::Cancelado,
    ];

    fn successors(self) -> &'static [Self] {
        match self {
            DeliveryStatus::Asignado => &[DeliveryStatus::EnCamino, DeliveryStatus::Cancelado],
            DeliveryStatus::EnCamino => &[DeliveryStatus::Entregado, DeliveryStatus::Cancelado],
            DeliveryStatus::Entregado | DeliveryStatus::Cancelado => &[],
        }
    }
}

impl core::fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeliveryStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_uppercase();
        Self::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == wanted)
            .ok_or_else(|| DomainError::validation(format!("unknown delivery status: {s}")))
    }
}
