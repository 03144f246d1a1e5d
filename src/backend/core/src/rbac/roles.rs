//! The closed role catalog.
//!
//! | Role         | Description                                                    |
//! |--------------|----------------------------------------------------------------|
//! | ADMIN        | Full access, including creating organizations                  |
//! | OWNER        | Manage users, API keys and the organizations they belong to    |
//! | SUPERVISOR   | Read organizations and roles; supervise check-in               |
//! | OPERATOR     | Perform check-in                                               |
//! | SPONSOR      | Scan attendees on behalf of a sponsor                          |
//! | API_CONSUMER | Machine access through an API key                              |

use serde::{Deserialize, Serialize};
use std::fmt;

use super::models::Role;

/// Role assigned to a user. Variant order is rank order, highest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoleType {
    Admin,
    Owner,
    Supervisor,
    Operator,
    Sponsor,
    ApiConsumer,
}

impl RoleType {
    /// Get the role identifier string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "ADMIN",
            Self::Owner => "OWNER",
            Self::Supervisor => "SUPERVISOR",
            Self::Operator => "OPERATOR",
            Self::Sponsor => "SPONSOR",
            Self::ApiConsumer => "API_CONSUMER",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::all().into_iter().find(|r| r.as_str() == s)
    }

    /// Get the description.
    pub fn description(&self) -> &'static str {
        match self {
            Self::Admin => "Administrator",
            Self::Owner => "Organization owner",
            Self::Supervisor => "Check-in supervisor",
            Self::Operator => "Check-in operator",
            Self::Sponsor => "Sponsor",
            Self::ApiConsumer => "API consumer",
        }
    }

    /// Build the catalog entry for this role.
    pub fn to_role(&self) -> Role {
        Role {
            role: *self,
            description: self.description().to_string(),
        }
    }

    /// Return all roles, in catalog order.
    pub fn all() -> Vec<RoleType> {
        vec![
            Self::Admin,
            Self::Owner,
            Self::Supervisor,
            Self::Operator,
            Self::Sponsor,
            Self::ApiConsumer,
        ]
    }

    /// Return the full catalog.
    pub fn catalog() -> Vec<Role> {
        Self::all().into_iter().map(|r| r.to_role()).collect()
    }
}

impl fmt::Display for RoleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
