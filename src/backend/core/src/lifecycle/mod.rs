//! Lifecycle manager: every gated mutation of the directory.
//!
//! Each operation authorizes the actor first and only then touches the
//! target, so a caller without the capability gets the same `Unauthorized`
//! whether or not the target exists.

use tracing::{info, instrument};

use crate::error::{CastellanError, Result};
use crate::identity::validation::{
    validate_new_organization, validate_new_user, validate_organization_update,
};
use crate::identity::{
    NewOrganization, NewUser, Organization, OrganizationDraft, OrganizationId, OrganizationRef,
    OrganizationUpdate, User, UserDraft, UserId, UserType, UserUpdate,
};
use crate::issuer::secret::{generate_secret, verify_secret};
use crate::membership::MembershipIndex;
use crate::rbac::{AccessPolicy, Action, RoleType};
use crate::store::SharedStore;
use crate::telemetry::metrics::record_user_created;

#[derive(Clone)]
pub struct LifecycleManager {
    store: SharedStore,
    policy: AccessPolicy,
    membership: MembershipIndex,
}

impl LifecycleManager {
    pub fn new(store: SharedStore) -> Self {
        Self {
            policy: AccessPolicy::new(store.clone()),
            membership: MembershipIndex::new(store.clone()),
            store,
        }
    }

    pub fn policy(&self) -> &AccessPolicy {
        &self.policy
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Users
    // ─────────────────────────────────────────────────────────────────────────

    #[instrument(skip(self, new_user), fields(username = %new_user.username))]
    pub async fn create_user(&self, actor: UserId, new_user: NewUser) -> Result<User> {
        self.policy.require(actor, Action::ManageUsers).await?;
        self.policy.require_grant(actor, &new_user.roles).await?;
        if new_user.user_type == UserType::ApiKey {
            return Err(CastellanError::invalid_field(
                "type",
                "API keys are issued through bulk issuance",
            ));
        }
        let draft = validate_new_user(new_user)?;
        let user = self.store.create_user(draft).await?;

        record_user_created(user.user_type.as_str());
        info!(user_id = %user.id, user_type = %user.user_type, "User created");
        Ok(user)
    }

    #[instrument(skip(self, update), fields(user_id = %update.id))]
    pub async fn update_user(&self, actor: UserId, update: UserUpdate) -> Result<User> {
        self.policy.require(actor, Action::ManageUsers).await?;
        self.policy.require_target(actor, update.id).await?;
        if let Some(roles) = &update.roles {
            self.policy.require_grant(actor, roles).await?;
        }
        let user = self.store.update_user(update).await?;
        info!(user_id = %user.id, "User updated");
        Ok(user)
    }

    #[instrument(skip(self))]
    pub async fn set_enabled(&self, actor: UserId, user: UserId, enabled: bool) -> Result<()> {
        self.policy.require(actor, Action::ManageUsers).await?;
        self.policy.require_target(actor, user).await?;
        if actor == user && !enabled {
            return Err(CastellanError::validation("You cannot disable your own account"));
        }
        self.store.set_enabled(user, enabled).await?;
        info!(user_id = %user, enabled, "User enablement changed");
        Ok(())
    }

    /// Hard delete; the user disappears from every member list.
    #[instrument(skip(self))]
    pub async fn delete_user(&self, actor: UserId, user: UserId) -> Result<()> {
        self.policy.require(actor, Action::ManageUsers).await?;
        self.policy.require_target(actor, user).await?;
        if actor == user {
            return Err(CastellanError::validation("You cannot delete your own account"));
        }
        self.store.delete_user(user).await?;
        info!(user_id = %user, "User deleted");
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Organizations
    // ─────────────────────────────────────────────────────────────────────────

    #[instrument(skip(self, org), fields(name = %org.name))]
    pub async fn create_organization(
        &self,
        actor: UserId,
        org: NewOrganization,
    ) -> Result<Organization> {
        self.policy.require(actor, Action::CreateOrganization).await?;
        let draft = validate_new_organization(org)?;
        let org = self.store.create_organization(draft).await?;
        info!(organization_id = %org.id, slug = %org.slug, "Organization created");
        Ok(org)
    }

    #[instrument(skip(self, org), fields(organization_id = %org.id))]
    pub async fn update_organization(
        &self,
        actor: UserId,
        org: OrganizationUpdate,
    ) -> Result<Organization> {
        self.policy.require(actor, Action::UpdateOrganization).await?;
        let (id, draft) = validate_organization_update(org)?;
        let org = self.store.update_organization(id, draft).await?;
        info!(organization_id = %org.id, "Organization updated");
        Ok(org)
    }

    #[instrument(skip(self))]
    pub async fn delete_organization(&self, actor: UserId, org: OrganizationId) -> Result<()> {
        self.policy.require(actor, Action::DeleteOrganization).await?;
        self.store.delete_organization(org).await?;
        info!(organization_id = %org, "Organization deleted");
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Membership
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn add_member(&self, actor: UserId, org: OrganizationId, user: UserId) -> Result<()> {
        self.policy.require(actor, Action::ManageMembership).await?;
        self.membership.add_member(org, user).await
    }

    pub async fn remove_member(
        &self,
        actor: UserId,
        org: OrganizationId,
        user: UserId,
    ) -> Result<()> {
        self.policy.require(actor, Action::ManageMembership).await?;
        self.membership.remove_member(org, user).await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Demo
    // ─────────────────────────────────────────────────────────────────────────

    /// Log in to, or create, the demo account named `username` (an email
    /// address), owner of its own organization. Only reachable when demo
    /// mode is on.
    ///
    /// Creation returns a one-time secret; every later login must present
    /// it. An existing account of any other type is never handed out.
    #[instrument(skip(self, secret))]
    pub async fn provision_demo_user(
        &self,
        username: &str,
        secret: Option<&str>,
    ) -> Result<DemoLogin> {
        if let Some(existing) = self.store.find_user_by_username(username).await? {
            if existing.user_type != UserType::Demo {
                return Err(demo_rejected("demo login for a non-demo account"));
            }
            let verified = match (secret, existing.secret_hash.as_deref()) {
                (Some(presented), Some(stored)) => verify_secret(presented, stored),
                _ => false,
            };
            if !verified {
                return Err(demo_rejected("demo login without a valid secret"));
            }
            let user = self.store.get_user(existing.id).await?;
            return Ok(DemoLogin { user, secret: None });
        }

        let org = self.create_demo_organization(username).await?;

        let generated = generate_secret(DEMO_SECRET_PREFIX);
        let draft = validate_new_user(NewUser {
            user_type: UserType::Demo,
            username: username.to_string(),
            first_name: Some("Demo".to_string()),
            last_name: Some("User".to_string()),
            email_address: Some(username.to_string()),
            roles: vec![RoleType::Owner],
            member_of: vec![OrganizationRef { id: org.id }],
            ..NewUser::default()
        })
        .map(|draft| UserDraft {
            secret_hash: Some(generated.hash),
            ..draft
        });

        let created = match draft {
            Ok(draft) => self.store.create_user(draft).await,
            Err(e) => Err(e),
        };
        match created {
            Ok(user) => {
                record_user_created(user.user_type.as_str());
                info!(user_id = %user.id, organization_id = %org.id, "Demo user provisioned");
                Ok(DemoLogin {
                    user,
                    secret: Some(generated.plaintext),
                })
            }
            Err(e) => {
                // Lost a race on the username, or the draft was rejected.
                self.store.delete_organization(org.id).await?;
                Err(e)
            }
        }
    }

    /// Distinct usernames can derive the same slug, so a taken slug gets
    /// a numeric suffix.
    async fn create_demo_organization(&self, username: &str) -> Result<Organization> {
        let base = validate_new_organization(NewOrganization {
            name: username.to_string(),
            email: username.to_string(),
            description: "Demo organization".to_string(),
            slug: None,
            external_id: None,
        })?;

        let mut attempt = 1;
        loop {
            let draft = match attempt {
                1 => base.clone(),
                n => OrganizationDraft {
                    slug: format!("{}-{}", base.slug, n),
                    ..base.clone()
                },
            };
            match self.store.create_organization(draft).await {
                Err(e) if is_slug_conflict(&e) && attempt < DEMO_SLUG_ATTEMPTS => attempt += 1,
                result => return result,
            }
        }
    }
}

/// Outcome of a demo login. `secret` is only present when the account was
/// created by this call.
#[derive(Clone)]
pub struct DemoLogin {
    pub user: User,
    pub secret: Option<String>,
}

impl std::fmt::Debug for DemoLogin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DemoLogin")
            .field("user", &self.user)
            .field("secret", &self.secret.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

const DEMO_SECRET_PREFIX: &str = "demo_";

const DEMO_SLUG_ATTEMPTS: u32 = 16;

fn demo_rejected(reason: &str) -> CastellanError {
    CastellanError::unauthenticated("Authentication required").with_internal_message(reason)
}

fn is_slug_conflict(error: &CastellanError) -> bool {
    error.is_validation() && error.details().field.as_deref() == Some("slug")
}
