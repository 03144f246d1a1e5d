//! RBAC data models: catalog entries, actions and decisions.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::roles::RoleType;

// ═══════════════════════════════════════════════════════════════════════════════
// Role catalog entry
// ═══════════════════════════════════════════════════════════════════════════════

/// A role as listed by the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub role: RoleType,
    pub description: String,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Actions
// ═══════════════════════════════════════════════════════════════════════════════

/// An operation a principal may attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Action {
    ReadUsers,
    ManageUsers,
    /// Grant the ADMIN role, or modify an account that holds it.
    ManageAdmins,
    IssueApiKeys,
    ReadOrganizations,
    CreateOrganization,
    UpdateOrganization,
    DeleteOrganization,
    ManageMembership,
    ReadRoles,
    CheckIn,
    SponsorScan,
    ConsumeApi,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ReadUsers => "ReadUsers",
            Self::ManageUsers => "ManageUsers",
            Self::ManageAdmins => "ManageAdmins",
            Self::IssueApiKeys => "IssueApiKeys",
            Self::ReadOrganizations => "ReadOrganizations",
            Self::CreateOrganization => "CreateOrganization",
            Self::UpdateOrganization => "UpdateOrganization",
            Self::DeleteOrganization => "DeleteOrganization",
            Self::ManageMembership => "ManageMembership",
            Self::ReadRoles => "ReadRoles",
            Self::CheckIn => "CheckIn",
            Self::SponsorScan => "SponsorScan",
            Self::ConsumeApi => "ConsumeApi",
        }
    }

    /// Roles carrying the capability for this action.
    pub fn required_roles(&self) -> &'static [RoleType] {
        use RoleType::*;
        match self {
            Self::ReadUsers
            | Self::ManageUsers
            | Self::IssueApiKeys
            | Self::UpdateOrganization
            | Self::DeleteOrganization
            | Self::ManageMembership => &[Admin, Owner],
            Self::CreateOrganization | Self::ManageAdmins => &[Admin],
            Self::ReadOrganizations | Self::ReadRoles => &[Admin, Owner, Supervisor],
            Self::CheckIn => &[Admin, Owner, Supervisor, Operator],
            Self::SponsorScan => &[Sponsor],
            Self::ConsumeApi => &[ApiConsumer],
        }
    }

    pub fn is_granted_to(&self, role: RoleType) -> bool {
        self.required_roles().contains(&role)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Decision
// ═══════════════════════════════════════════════════════════════════════════════

/// Why a request was denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DenyReason {
    /// Disabled, or past `validTo`.
    Inactive,
    /// No assigned role carries the capability. Also returned for unknown users.
    MissingCapability,
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inactive => f.write_str("account is disabled or expired"),
            Self::MissingCapability => f.write_str("missing capability"),
        }
    }
}

/// Result of a policy evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyDecision {
    /// The action is allowed.
    Allow,
    /// The action is denied, with a reason.
    Deny(DenyReason),
}

impl PolicyDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow)
    }

    pub fn is_denied(&self) -> bool {
        matches!(self, Self::Deny(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capability_table() {
        assert!(Action::ManageUsers.is_granted_to(RoleType::Owner));
        assert!(!Action::ManageUsers.is_granted_to(RoleType::Supervisor));
        assert!(Action::CreateOrganization.is_granted_to(RoleType::Admin));
        assert!(!Action::CreateOrganization.is_granted_to(RoleType::Owner));
        assert!(Action::ReadRoles.is_granted_to(RoleType::Supervisor));
        assert!(Action::CheckIn.is_granted_to(RoleType::Operator));
        assert!(!Action::CheckIn.is_granted_to(RoleType::Sponsor));
        assert!(Action::SponsorScan.is_granted_to(RoleType::Sponsor));
        assert!(!Action::SponsorScan.is_granted_to(RoleType::Admin));
        assert!(Action::ConsumeApi.is_granted_to(RoleType::ApiConsumer));
        assert!(Action::ManageAdmins.is_granted_to(RoleType::Admin));
        assert!(!Action::ManageAdmins.is_granted_to(RoleType::Owner));
    }

    #[test]
    fn test_api_consumer_holds_no_console_capability() {
        for action in [
            Action::ReadUsers,
            Action::ManageUsers,
            Action::IssueApiKeys,
            Action::ReadOrganizations,
            Action::ReadRoles,
        ] {
            assert!(!action.is_granted_to(RoleType::ApiConsumer), "{action}");
        }
    }

    #[test]
    fn test_decision_helpers() {
        assert!(PolicyDecision::Allow.is_allowed());
        assert!(PolicyDecision::Deny(DenyReason::Inactive).is_denied());
    }
}
