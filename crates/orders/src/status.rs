use core::str::FromStr;

use serde::{Deserialize, Serialize};

use fulfillment_core::{Caller, DomainError, DomainResult, Lifecycle, Role, UserId};

/// Order lifecycle.
///
/// ```text
/// CREADA ──> EN_PROCESO ──> FINALIZADA ──> EN_CAMINO ──> ENTREGADO
///   │  │         │  │            │              │
///   │  └─────────┴──┴────────────┴──────────────┴──> CANCELADO
///   └────────────┴──> RECHAZADA
/// ```
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Creada,
    EnProceso,
    Finalizada,
    EnCamino,
    Entregado,
    Cancelado,
    Rechazada,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Creada => "CREADA",
            OrderStatus::EnProceso => "EN_PROCESO",
            OrderStatus::Finalizada => "FINALIZADA",
            OrderStatus::EnCamino => "EN_CAMINO",
            OrderStatus::Entregado => "ENTREGADO",
            OrderStatus::Cancelado => "CANCELADO",
            OrderStatus::Rechazada => "RECHAZADA",
        }
    }

    /// Whether `caller` may request a move into `self` on an order owned by
    /// `owner`.
    ///
    /// Delivery-driven statuses (EN_CAMINO, ENTREGADO) are reserved for the
    /// dispatcher's status sync. Clients may only cancel their own orders.
    pub fn ensure_authority(self, caller: &Caller, owner: UserId) -> DomainResult<()> {
        let allowed = match (caller.role, self) {
            (Role::Client, OrderStatus::Cancelado) => caller.user_id == owner,
            (Role::Restaurant | Role::Admin, s) => matches!(
                s,
                OrderStatus::EnProceso
                    | OrderStatus::Finalizada
                    | OrderStatus::Rechazada
                    | OrderStatus::Cancelado
            ),
            (Role::Dispatcher, s) => matches!(
                s,
                OrderStatus::EnCamino | OrderStatus::Entregado | OrderStatus::Cancelado
            ),
            _ => false,
        };

        if allowed {
            Ok(())
        } else {
            Err(DomainError::forbidden(format!(
                "role {} may not move this order to {}",
                caller.role, self
            )))
        }
    }
}

impl Lifecycle for OrderStatus {
    const ENTITY: &'static str = "order";

    const ALL: &'static [Self] = &[
        OrderStatus::Creada,
        OrderStatus::EnProceso,
        OrderStatus::Finalizada,
        OrderStatus::EnCamino,
        OrderStatus::Entregado,
        OrderStatus::Cancelado,
        OrderStatus::Rechazada,
    ];

    fn successors(self) -> &'static [Self] {
        use OrderStatus::*;
        match self {
            Creada => &[EnProceso, Cancelado, Rechazada],
            EnProceso => &[Finalizada, Cancelado, Rechazada],
            Finalizada => &[EnCamino, Cancelado],
            EnCamino => &[Entregado, Cancelado],
            Entregado | Cancelado | Rechazada => &[],
        }
    }
}

impl core::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_uppercase();
        Self::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == wanted)
            .ok_or_else(|| DomainError::validation(format!("unknown order status: {s}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caller(role: Role, user: i64) -> Caller {
        Caller::new(UserId::new(user), role)
    }

    #[test]
    fn terminal_statuses_have_no_successors() {
        for s in [OrderStatus::Entregado, OrderStatus::Cancelado, OrderStatus::Rechazada] {
            assert!(s.is_terminal());
        }
        assert!(!OrderStatus::Creada.is_terminal());
    }

    #[test]
    fn parse_and_display_round_trip() {
        for s in OrderStatus::ALL {
            assert_eq!(s.as_str().parse::<OrderStatus>().unwrap(), *s);
        }
        assert_eq!("en_camino".parse::<OrderStatus>().unwrap(), OrderStatus::EnCamino);
        assert!("SHIPPED".parse::<OrderStatus>().is_err());
    }

    #[test]
    fn clients_may_only_cancel_their_own_orders() {
        let owner = UserId::new(7);
        assert!(OrderStatus::Cancelado.ensure_authority(&caller(Role::Client, 7), owner).is_ok());
        assert!(OrderStatus::Cancelado.ensure_authority(&caller(Role::Client, 8), owner).is_err());
        assert!(OrderStatus::EnProceso.ensure_authority(&caller(Role::Client, 7), owner).is_err());
    }

    #[test]
    fn delivery_statuses_are_dispatcher_only() {
        let owner = UserId::new(1);
        for role in [Role::Client, Role::Restaurant, Role::Admin, Role::Courier] {
            for s in [OrderStatus::EnCamino, OrderStatus::Entregado] {
                match s.ensure_authority(&caller(role, 1), owner) {
                    Err(DomainError::Forbidden(_)) => {}
                    other => panic!("{role} -> {s}: expected Forbidden, got {other:?}"),
                }
            }
        }
        assert!(OrderStatus::EnCamino.ensure_authority(&caller(Role::Dispatcher, 0), owner).is_ok());
        assert!(OrderStatus::Cancelado.ensure_authority(&caller(Role::Dispatcher, 0), owner).is_ok());
        assert!(OrderStatus::Rechazada.ensure_authority(&caller(Role::Dispatcher, 0), owner).is_err());
    }

    #[test]
    fn rejection_is_restaurant_side_only() {
        let owner = UserId::new(1);
        assert!(OrderStatus::Rechazada.ensure_authority(&caller(Role::Restaurant, 2), owner).is_ok());
        assert!(OrderStatus::Rechazada.ensure_authority(&caller(Role::Admin, 3), owner).is_ok());
        assert!(OrderStatus::Rechazada.ensure_authority(&caller(Role::Client, 1), owner).is_err());
    }
}
