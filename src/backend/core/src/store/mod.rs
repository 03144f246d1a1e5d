//! Identity store: durable users, organizations and memberships.
//!
//! Two backends implement [`DirectoryStore`]:
//! - [`MemoryDirectory`]: in-process, journaled write transactions
//! - [`crate::db::PgDirectory`]: PostgreSQL through `sqlx`
//!
//! Every mutation is atomic and linearized. A store operation that cannot
//! finish within the configured timeout fails with `Unavailable` and leaves
//! no partial state behind.

pub mod memory;

pub use memory::{FaultPlan, MemoryDirectory};

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::Result;
use crate::identity::{
    Organization, OrganizationDraft, OrganizationId, User, UserDraft, UserFilter, UserId,
    UserRecord, UserUpdate,
};
use crate::rbac::RoleType;

/// Shared handle to the configured backend.
pub type SharedStore = Arc<dyn DirectoryStore>;

#[async_trait]
pub trait DirectoryStore: Send + Sync {
    // ─────────────────────────────────────────────────────────────────────────
    // Users
    // ─────────────────────────────────────────────────────────────────────────

    /// Insert a validated user together with its memberships.
    async fn create_user(&self, draft: UserDraft) -> Result<User>;

    /// Apply an update payload; `id` and `type` never change.
    async fn update_user(&self, update: UserUpdate) -> Result<User>;

    async fn get_user(&self, id: UserId) -> Result<User>;

    /// Raw record lookup, for policy and authentication.
    async fn find_user(&self, id: UserId) -> Result<Option<UserRecord>>;

    /// Exact, case-sensitive username lookup.
    async fn find_user_by_username(&self, username: &str) -> Result<Option<UserRecord>>;

    /// Users matching `filter`, ascending id.
    async fn list_users(&self, filter: UserFilter) -> Result<Vec<User>>;

    /// Hard delete, removing the user from every member list.
    async fn delete_user(&self, id: UserId) -> Result<()>;

    async fn set_enabled(&self, id: UserId, enabled: bool) -> Result<()>;

    /// Insert every draft or none of them.
    async fn create_users_batch(&self, drafts: Vec<UserDraft>) -> Result<Vec<User>>;

    async fn has_user_with_role(&self, role: RoleType) -> Result<bool>;

    // ─────────────────────────────────────────────────────────────────────────
    // Organizations
    // ─────────────────────────────────────────────────────────────────────────

    async fn create_organization(&self, draft: OrganizationDraft) -> Result<Organization>;

    async fn update_organization(
        &self,
        id: OrganizationId,
        draft: OrganizationDraft,
    ) -> Result<Organization>;

    async fn get_organization(&self, id: OrganizationId) -> Result<Organization>;

    /// All organizations, ascending id.
    async fn list_organizations(&self) -> Result<Vec<Organization>>;

    /// Hard delete, removing the organization from every user's `memberOf`.
    async fn delete_organization(&self, id: OrganizationId) -> Result<()>;

    // ─────────────────────────────────────────────────────────────────────────
    // Membership
    // ─────────────────────────────────────────────────────────────────────────

    /// Idempotent.
    async fn add_member(&self, org: OrganizationId, user: UserId) -> Result<()>;

    /// Removing a non-member succeeds.
    async fn remove_member(&self, org: OrganizationId, user: UserId) -> Result<()>;

    async fn organizations_of(&self, user: UserId) -> Result<Vec<Organization>>;

    async fn members_of(&self, org: OrganizationId) -> Result<Vec<User>>;

    /// Liveness probe.
    async fn ping(&self) -> Result<()>;

    /// Backend name for logs and health output.
    fn backend(&self) -> &'static str;
}
