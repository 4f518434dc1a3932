use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use fulfillment_core::{
    AggregateRoot, Caller, DeliveryId, DomainError, DomainResult, Lifecycle, OrderId, Role, UserId,
};
use fulfillment_events::Event;

use crate::status::DeliveryStatus;

/// What happened to a delivery.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryTransition {
    Assigned,
    Accepted,
    Started,
    Completed,
    Cancelled,
    Reassigned,
}

impl DeliveryTransition {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryTransition::Assigned => "assigned",
            DeliveryTransition::Accepted => "accepted",
            DeliveryTransition::Started => "started",
            DeliveryTransition::Completed => "completed",
            DeliveryTransition::Cancelled => "cancelled",
            DeliveryTransition::Reassigned => "reassigned",
        }
    }
}

impl core::fmt::Display for DeliveryTransition {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A delivery that has not been inserted yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewDelivery {
    pub order_external_id: OrderId,
    pub courier_id: UserId,
    pub status: DeliveryStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub transition: DeliveryTransition,
}

impl NewDelivery {
    /// Direct assignment: the courier has not set off yet.
    pub fn assigned(order_external_id: OrderId, courier_id: UserId, at: DateTime<Utc>) -> Self {
        Self {
            order_external_id,
            courier_id,
            status: DeliveryStatus::Asignado,
            started_at: None,
            created_at: at,
            transition: DeliveryTransition::Assigned,
        }
    }

    /// Self-service accept: the courier is already moving, so the delivery
    /// starts life in EN_CAMINO.
    pub fn accepted(order_external_id: OrderId, courier_id: UserId, at: DateTime<Utc>) -> Self {
        Self {
            order_external_id,
            courier_id,
            status: DeliveryStatus::EnCamino,
            started_at: Some(at),
            created_at: at,
            transition: DeliveryTransition::Accepted,
        }
    }

    /// Attach the store-assigned id.
    pub fn into_delivery(self, id: DeliveryId) -> Delivery {
        Delivery {
            id,
            order_external_id: self.order_external_id,
            courier_id: self.courier_id,
            status: self.status,
            started_at: self.started_at,
            delivered_at: None,
            created_at: self.created_at,
            updated_at: self.created_at,
            version: 1,
        }
    }
}

/// Aggregate root: Delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Delivery {
    pub id: DeliveryId,
    /// Weak reference into the order ledger.
    pub order_external_id: OrderId,
    pub courier_id: UserId,
    pub status: DeliveryStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub version: u64,
}

impl AggregateRoot for Delivery {
    type Id = DeliveryId;

    fn id(&self) -> Self::Id {
        self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

impl Delivery {
    /// Derived, never stored: `delivered_at - started_at`.
    pub fn duration(&self) -> Option<Duration> {
        match (self.started_at, self.delivered_at) {
            (Some(started), Some(delivered)) => Some(delivered - started),
            _ => None,
        }
    }

    pub fn duration_minutes(&self) -> Option<i64> {
        self.duration().map(|d| d.num_minutes())
    }

    /// Fact describing how this delivery came to exist.
    pub fn created_event(&self, transition: DeliveryTransition, actor: &Caller) -> DeliveryChanged {
        DeliveryChanged {
            delivery_id: self.id,
            order_id: self.order_external_id,
            courier_id: self.courier_id,
            transition,
            from: None,
            to: self.status,
            actor_name: actor.display_name.clone(),
            reason: None,
            occurred_at: self.created_at,
        }
    }

    /// ASIGNADO -> EN_CAMINO.
    pub fn start(&mut self, actor: &Caller, at: DateTime<Utc>) -> DomainResult<DeliveryChanged> {
        self.ensure_actor(actor)?;
        let from = self.advance(DeliveryStatus::EnCamino, at)?;
        self.started_at = Some(at);
        Ok(self.changed(from, DeliveryTransition::Started, actor, None, at))
    }

    /// EN_CAMINO -> ENTREGADO.
    pub fn complete(&mut self, actor: &Caller, at: DateTime<Utc>) -> DomainResult<DeliveryChanged> {
        self.ensure_actor(actor)?;
        let from = self.advance(DeliveryStatus::Entregado, at)?;
        self.delivered_at = Some(at);
        Ok(self.changed(from, DeliveryTransition::Completed, actor, None, at))
    }

    pub fn cancel(
        &mut self,
        actor: &Caller,
        reason: Option<String>,
        at: DateTime<Utc>,
    ) -> DomainResult<DeliveryChanged> {
        self.ensure_actor(actor)?;
        let from = self.advance(DeliveryStatus::Cancelado, at)?;
        Ok(self.changed(from, DeliveryTransition::Cancelled, actor, reason, at))
    }

    /// Hand the delivery to another courier, back in ASIGNADO.
    ///
    /// Not a table transition: allowed from any non-terminal status and
    /// clears `started_at` since the new courier has not set off.
    pub fn reassign(
        &mut self,
        actor: &Caller,
        new_courier: UserId,
        at: DateTime<Utc>,
    ) -> DomainResult<DeliveryChanged> {
        if actor.role != Role::Admin {
            return Err(DomainError::forbidden("only an admin may reassign deliveries"));
        }
        if self.status.is_terminal() {
            return Err(DomainError::invalid_transition(
                DeliveryStatus::ENTITY,
                self.status,
                DeliveryStatus::Asignado,
            ));
        }

        let from = self.status;
        self.courier_id = new_courier;
        self.status = DeliveryStatus::Asignado;
        self.started_at = None;
        self.updated_at = at;
        self.version += 1;

        Ok(self.changed(from, DeliveryTransition::Reassigned, actor, None, at))
    }

    /// Couriers act on their own deliveries only; admins on any.
    fn ensure_actor(&self, actor: &Caller) -> DomainResult<()> {
        match actor.role {
            Role::Admin => Ok(()),
            Role::Courier if actor.user_id == self.courier_id => Ok(()),
            Role::Courier => Err(DomainError::forbidden(format!(
                "delivery {} is assigned to another courier",
                self.id
            ))),
            other => Err(DomainError::forbidden(format!(
                "role {other} may not act on deliveries"
            ))),
        }
    }

    fn advance(&mut self, next: DeliveryStatus, at: DateTime<Utc>) -> DomainResult<DeliveryStatus> {
        self.status.ensure_transition(next)?;
        let from = self.status;
        self.status = next;
        self.updated_at = at;
        self.version += 1;
        Ok(from)
    }

    fn changed(
        &self,
        from: DeliveryStatus,
        transition: DeliveryTransition,
        actor: &Caller,
        reason: Option<String>,
        at: DateTime<Utc>,
    ) -> DeliveryChanged {
        DeliveryChanged {
            delivery_id: self.id,
            order_id: self.order_external_id,
            courier_id: self.courier_id,
            transition,
            from: Some(from),
            to: self.status,
            actor_name: actor.display_name.clone(),
            reason,
            occurred_at: at,
        }
    }
}

/// Event: a delivery was created or changed status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryChanged {
    pub delivery_id: DeliveryId,
    pub order_id: OrderId,
    pub courier_id: UserId,
    pub transition: DeliveryTransition,
    pub from: Option<DeliveryStatus>,
    pub to: DeliveryStatus,
    pub actor_name: Option<String>,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

impl Event for DeliveryChanged {
    fn event_type(&self) -> &'static str {
        match self.transition {
            DeliveryTransition::Assigned => "delivery.assigned",
            DeliveryTransition::Accepted => "delivery.accepted",
            DeliveryTransition::Started => "delivery.started",
            DeliveryTransition::Completed => "delivery.completed",
            DeliveryTransition::Cancelled => "delivery.cancelled",
            DeliveryTransition::Reassigned => "delivery.reassigned",
        }
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }
}
