//! Policy engine for evaluating authorization decisions.
//!
//! The policy engine answers the question:
//! "Can user X perform action Y?"
//!
//! Effective roles are exactly the directly assigned roles; there is no
//! hierarchy. An unknown user goes through the same lookup and receives the
//! same `Deny(MissingCapability)` as a known user without the capability,
//! so a denial never reveals whether an account exists.

use std::collections::BTreeSet;
use tracing::debug;

use super::models::{Action, DenyReason, PolicyDecision};
use super::roles::RoleType;
use crate::error::{CastellanError, Result};
use crate::identity::{UserId, UserRecord};
use crate::store::SharedStore;
use crate::telemetry::metrics::record_authorization;

// ═══════════════════════════════════════════════════════════════════════════════
// Pure evaluation
// ═══════════════════════════════════════════════════════════════════════════════

/// Decide `action` for a resolved record; `None` is an unknown user.
pub fn evaluate(record: Option<&UserRecord>, action: Action) -> PolicyDecision {
    let Some(record) = record else {
        return PolicyDecision::Deny(DenyReason::MissingCapability);
    };
    if !record.is_active() {
        return PolicyDecision::Deny(DenyReason::Inactive);
    }
    if record.roles.iter().any(|role| action.is_granted_to(*role)) {
        PolicyDecision::Allow
    } else {
        PolicyDecision::Deny(DenyReason::MissingCapability)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Access Policy
// ═══════════════════════════════════════════════════════════════════════════════

/// Store-backed policy engine.
#[derive(Clone)]
pub struct AccessPolicy {
    store: SharedStore,
}

impl AccessPolicy {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    /// Directly assigned roles; empty for unknown users.
    pub async fn effective_roles(&self, user: UserId) -> Result<BTreeSet<RoleType>> {
        Ok(self
            .store
            .find_user(user)
            .await?
            .map(|record| record.roles)
            .unwrap_or_default())
    }

    /// `Err` only when the store itself fails.
    pub async fn authorize(&self, user: UserId, action: Action) -> Result<PolicyDecision> {
        let record = self.store.find_user(user).await?;
        let decision = evaluate(record.as_ref(), action);

        record_authorization(action.as_str(), decision.is_allowed());
        debug!(user_id = %user, action = %action, decision = ?decision, "Authorization evaluated");
        Ok(decision)
    }

    /// Like [`authorize`](Self::authorize), mapping a denial to `Unauthorized`.
    pub async fn require(&self, user: UserId, action: Action) -> Result<()> {
        match self.authorize(user, action).await? {
            PolicyDecision::Allow => Ok(()),
            PolicyDecision::Deny(reason) => Err(denied(action, reason)),
        }
    }

    /// Granting ADMIN needs [`Action::ManageAdmins`] on top of the caller's
    /// own capability check.
    pub async fn require_grant<'a, I>(&self, user: UserId, roles: I) -> Result<()>
    where
        I: IntoIterator<Item = &'a RoleType>,
    {
        if grants_admin(roles) {
            self.require(user, Action::ManageAdmins).await?;
        }
        Ok(())
    }

    /// An account holding ADMIN may only be modified by an admin. A missing
    /// target passes so the caller reports `NotFound` as usual.
    pub async fn require_target(&self, user: UserId, target: UserId) -> Result<()> {
        let held = self.effective_roles(target).await?;
        self.require_grant(user, &held).await
    }
}

pub fn grants_admin<'a, I>(roles: I) -> bool
where
    I: IntoIterator<Item = &'a RoleType>,
{
    roles.into_iter().any(|role| *role == RoleType::Admin)
}

fn denied(action: Action, reason: DenyReason) -> CastellanError {
    CastellanError::unauthorized("Access denied")
        .with_internal_message(format!("{} denied: {}", action, reason))
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::UserType;
    use chrono::Utc;

    fn record(roles: &[RoleType]) -> UserRecord {
        UserRecord {
            id: UserId(1),
            user_type: UserType::Internal,
            enabled: true,
            valid_to: None,
            username: "u".to_string(),
            first_name: None,
            last_name: None,
            email_address: None,
            description: None,
            roles: roles.iter().copied().collect(),
            secret_hash: None,
        }
    }

    #[test]
    fn test_allow_by_role() {
        let owner = record(&[RoleType::Owner]);
        assert!(evaluate(Some(&owner), Action::ManageUsers).is_allowed());
        assert!(evaluate(Some(&owner), Action::CreateOrganization).is_denied());
    }

    #[test]
    fn test_disabled_and_expired_are_inactive() {
        let mut admin = record(&[RoleType::Admin]);
        admin.enabled = false;
        assert_eq!(
            evaluate(Some(&admin), Action::ReadUsers),
            PolicyDecision::Deny(DenyReason::Inactive)
        );

        let mut admin = record(&[RoleType::Admin]);
        admin.valid_to = Some(Utc::now() - chrono::Duration::minutes(1));
        assert_eq!(
            evaluate(Some(&admin), Action::ReadUsers),
            PolicyDecision::Deny(DenyReason::Inactive)
        );
    }

    #[test]
    fn test_unknown_user_matches_unprivileged_user() {
        let sponsor = record(&[RoleType::Sponsor]);
        assert_eq!(
            evaluate(None, Action::ManageUsers),
            evaluate(Some(&sponsor), Action::ManageUsers)
        );
    }

    #[test]
    fn test_admin_grant_needs_admin() {
        assert!(grants_admin(&[RoleType::Owner, RoleType::Admin]));
        assert!(!grants_admin(&[RoleType::Owner, RoleType::Supervisor]));

        let owner = record(&[RoleType::Owner]);
        let admin = record(&[RoleType::Admin]);
        assert!(evaluate(Some(&owner), Action::ManageAdmins).is_denied());
        assert!(evaluate(Some(&admin), Action::ManageAdmins).is_allowed());
    }

    #[test]
    fn test_denial_error_hides_reason_from_clients() {
        let err = denied(Action::ManageUsers, DenyReason::Inactive);
        assert_eq!(err.user_message(), "Access denied");
        assert!(err.internal_message().unwrap().contains("ManageUsers"));
    }
}
