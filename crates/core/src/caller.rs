//! Authenticated caller identity.
//!
//! Authentication happens upstream (gateway). Services receive an already
//! trusted identity and pass it explicitly into every operation.

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::id::UserId;

/// Role the gateway asserts for the caller.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Client,
    Restaurant,
    Courier,
    Admin,
    /// The delivery dispatcher acting as a service (status sync).
    Dispatcher,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Client => "client",
            Role::Restaurant => "restaurant",
            Role::Courier => "courier",
            Role::Admin => "admin",
            Role::Dispatcher => "dispatcher",
        }
    }
}

impl core::fmt::Display for Role {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "client" => Ok(Role::Client),
            "restaurant" => Ok(Role::Restaurant),
            "courier" | "repartidor" => Ok(Role::Courier),
            "admin" => Ok(Role::Admin),
            "dispatcher" => Ok(Role::Dispatcher),
            other => Err(DomainError::validation(format!("unknown role: {other}"))),
        }
    }
}

/// Who is performing an operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Caller {
    pub user_id: UserId,
    pub role: Role,
    /// Optional human-readable name, used only for notification text.
    pub display_name: Option<String>,
}

impl Caller {
    pub fn new(user_id: UserId, role: Role) -> Self {
        Self {
            user_id,
            role,
            display_name: None,
        }
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_parsing_is_case_insensitive() {
        assert_eq!("Courier".parse::<Role>().unwrap(), Role::Courier);
        assert_eq!("REPARTIDOR".parse::<Role>().unwrap(), Role::Courier);
        assert_eq!(" admin ".parse::<Role>().unwrap(), Role::Admin);
        assert!("guest".parse::<Role>().is_err());
    }
}
