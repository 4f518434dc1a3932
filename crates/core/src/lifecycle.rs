//! Finite-state lifecycle contract.
//!
//! Order and delivery statuses are separate enums owned by separate services;
//! they only share this shape so both reject unknown transitions the same way.

use crate::error::{DomainError, DomainResult};

pub trait Lifecycle: Copy + Eq + core::fmt::Debug + core::fmt::Display + 'static {
    /// Entity name used in transition errors ("order", "delivery").
    const ENTITY: &'static str;

    /// Every status, in declaration order.
    const ALL: &'static [Self];

    /// Statuses directly reachable from `self`.
    fn successors(self) -> &'static [Self];

    fn can_transition_to(self, next: Self) -> bool {
        self.successors().contains(&next)
    }

    fn is_terminal(self) -> bool {
        self.successors().is_empty()
    }

    /// Reject `self -> next` unless it is in the transition table.
    fn ensure_transition(self, next: Self) -> DomainResult<()> {
        if self.can_transition_to(next) {
            Ok(())
        } else {
            Err(DomainError::invalid_transition(Self::ENTITY, self, next))
        }
    }
}
