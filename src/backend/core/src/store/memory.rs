//! In-process directory with journaled write transactions.
//!
//! All state sits behind one `tokio::sync::RwLock`. Readers take the shared
//! guard and therefore see committed state only. Writers open a
//! [`WriteTxn`], which records an undo entry for every change; dropping the
//! transaction without [`WriteTxn::commit`] replays the journal in reverse.
//! That covers early returns through `?`, panics, timeouts and callers that
//! drop the future mid-operation.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::future::Future;
use std::time::Duration;
use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, instrument};

use super::DirectoryStore;
use crate::error::{CastellanError, ErrorCode, Result};
use crate::identity::validation::apply_user_update;
use crate::identity::{
    Organization, OrganizationDraft, OrganizationId, User, UserDraft, UserFilter, UserId,
    UserRecord, UserUpdate,
};
use crate::rbac::RoleType;
use crate::telemetry::StoreTimer;

// ═══════════════════════════════════════════════════════════════════════════════
// State
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Default)]
struct DirectoryState {
    last_user_id: i64,
    last_organization_id: i64,
    users: BTreeMap<UserId, UserRecord>,
    usernames: HashMap<String, UserId>,
    organizations: BTreeMap<OrganizationId, Organization>,
    slugs: HashMap<String, OrganizationId>,
    /// `memberOf`, in the order memberships were added.
    user_orgs: HashMap<UserId, Vec<OrganizationId>>,
    org_members: HashMap<OrganizationId, BTreeSet<UserId>>,
}

impl DirectoryState {
    fn user(&self, id: UserId) -> Result<&UserRecord> {
        self.users
            .get(&id)
            .ok_or_else(|| CastellanError::user_not_found(id))
    }

    fn organization(&self, id: OrganizationId) -> Result<&Organization> {
        self.organizations
            .get(&id)
            .ok_or_else(|| CastellanError::organization_not_found(id))
    }

    fn member_of(&self, id: UserId) -> Vec<Organization> {
        self.user_orgs
            .get(&id)
            .map(|orgs| {
                orgs.iter()
                    .filter_map(|org| self.organizations.get(org).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    fn project(&self, record: &UserRecord) -> User {
        User::from_record(record.clone(), self.member_of(record.id))
    }

    fn is_member(&self, org: OrganizationId, user: UserId) -> bool {
        self.org_members
            .get(&org)
            .map_or(false, |members| members.contains(&user))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Write transaction
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug)]
enum Undo {
    Counters { last_user_id: i64, last_organization_id: i64 },
    User(UserId, Option<UserRecord>),
    Username(String, Option<UserId>),
    Organization(OrganizationId, Option<Organization>),
    Slug(String, Option<OrganizationId>),
    UserOrgs(UserId, Option<Vec<OrganizationId>>),
    OrgMembers(OrganizationId, Option<BTreeSet<UserId>>),
}

/// Exclusive access to the directory with rollback on drop.
struct WriteTxn<'a> {
    state: RwLockWriteGuard<'a, DirectoryState>,
    journal: Vec<Undo>,
    committed: bool,
}

fn restore<K, V>(map: &mut HashMap<K, V>, key: K, previous: Option<V>)
where
    K: std::hash::Hash + Eq,
{
    match previous {
        Some(value) => {
            map.insert(key, value);
        }
        None => {
            map.remove(&key);
        }
    }
}

fn restore_ordered<K: Ord, V>(map: &mut BTreeMap<K, V>, key: K, previous: Option<V>) {
    match previous {
        Some(value) => {
            map.insert(key, value);
        }
        None => {
            map.remove(&key);
        }
    }
}

impl<'a> WriteTxn<'a> {
    fn new(state: RwLockWriteGuard<'a, DirectoryState>) -> Self {
        Self {
            state,
            journal: Vec::new(),
            committed: false,
        }
    }

    fn commit(mut self) {
        self.committed = true;
        self.journal.clear();
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Journaled primitives
    // ─────────────────────────────────────────────────────────────────────────

    fn save_counters(&mut self) {
        self.journal.push(Undo::Counters {
            last_user_id: self.state.last_user_id,
            last_organization_id: self.state.last_organization_id,
        });
    }

    fn put_user(&mut self, record: UserRecord) {
        let previous = self.state.users.insert(record.id, record.clone());
        self.journal.push(Undo::User(record.id, previous));
    }

    fn take_user(&mut self, id: UserId) -> Option<UserRecord> {
        let previous = self.state.users.remove(&id);
        if previous.is_some() {
            self.journal.push(Undo::User(id, previous.clone()));
        }
        previous
    }

    fn put_username(&mut self, username: String, id: UserId) {
        let previous = self.state.usernames.insert(username.clone(), id);
        self.journal.push(Undo::Username(username, previous));
    }

    fn drop_username(&mut self, username: &str) {
        if let Some(previous) = self.state.usernames.remove(username) {
            self.journal
                .push(Undo::Username(username.to_string(), Some(previous)));
        }
    }

    fn put_organization(&mut self, org: Organization) {
        let previous = self.state.organizations.insert(org.id, org.clone());
        self.journal.push(Undo::Organization(org.id, previous));
    }

    fn take_organization(&mut self, id: OrganizationId) -> Option<Organization> {
        let previous = self.state.organizations.remove(&id);
        if previous.is_some() {
            self.journal.push(Undo::Organization(id, previous.clone()));
        }
        previous
    }

    fn put_slug(&mut self, slug: String, id: OrganizationId) {
        let previous = self.state.slugs.insert(slug.clone(), id);
        self.journal.push(Undo::Slug(slug, previous));
    }

    fn drop_slug(&mut self, slug: &str) {
        if let Some(previous) = self.state.slugs.remove(slug) {
            self.journal.push(Undo::Slug(slug.to_string(), Some(previous)));
        }
    }

    fn save_user_orgs(&mut self, user: UserId) {
        let previous = self.state.user_orgs.get(&user).cloned();
        self.journal.push(Undo::UserOrgs(user, previous));
    }

    fn save_org_members(&mut self, org: OrganizationId) {
        let previous = self.state.org_members.get(&org).cloned();
        self.journal.push(Undo::OrgMembers(org, previous));
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Composite operations
    // ─────────────────────────────────────────────────────────────────────────

    fn link(&mut self, org: OrganizationId, user: UserId) {
        if self.state.is_member(org, user) {
            return;
        }
        self.save_user_orgs(user);
        self.save_org_members(org);
        self.state.user_orgs.entry(user).or_default().push(org);
        self.state.org_members.entry(org).or_default().insert(user);
    }

    fn unlink(&mut self, org: OrganizationId, user: UserId) {
        if !self.state.is_member(org, user) {
            return;
        }
        self.save_user_orgs(user);
        self.save_org_members(org);
        if let Some(orgs) = self.state.user_orgs.get_mut(&user) {
            orgs.retain(|o| *o != org);
        }
        if let Some(members) = self.state.org_members.get_mut(&org) {
            members.remove(&user);
        }
    }

    fn ensure_organizations_exist(&self, orgs: &[OrganizationId]) -> Result<()> {
        for org in orgs {
            self.state.organization(*org)?;
        }
        Ok(())
    }

    fn insert_user(&mut self, draft: UserDraft) -> Result<UserRecord> {
        if self.state.usernames.contains_key(&draft.username) {
            return Err(CastellanError::duplicate_username(&draft.username));
        }
        self.ensure_organizations_exist(&draft.member_of)?;

        self.save_counters();
        self.state.last_user_id += 1;
        let id = UserId(self.state.last_user_id);

        let record = UserRecord {
            id,
            user_type: draft.user_type,
            enabled: true,
            valid_to: draft.valid_to,
            username: draft.username,
            first_name: draft.first_name,
            last_name: draft.last_name,
            email_address: draft.email_address,
            description: draft.description,
            roles: draft.roles,
            secret_hash: draft.secret_hash,
        };
        self.put_username(record.username.clone(), id);
        self.put_user(record.clone());
        for org in draft.member_of {
            self.link(org, id);
        }
        Ok(record)
    }

    fn remove_user(&mut self, id: UserId) -> Result<()> {
        let record = self
            .take_user(id)
            .ok_or_else(|| CastellanError::user_not_found(id))?;
        self.drop_username(&record.username);

        let orgs = self.state.user_orgs.get(&id).cloned().unwrap_or_default();
        for org in orgs {
            self.unlink(org, id);
        }
        if self.state.user_orgs.contains_key(&id) {
            self.save_user_orgs(id);
            self.state.user_orgs.remove(&id);
        }
        Ok(())
    }

    fn remove_organization(&mut self, id: OrganizationId) -> Result<()> {
        let org = self
            .take_organization(id)
            .ok_or_else(|| CastellanError::organization_not_found(id))?;
        self.drop_slug(&org.slug);

        let members: Vec<UserId> = self
            .state
            .org_members
            .get(&id)
            .map(|m| m.iter().copied().collect())
            .unwrap_or_default();
        for user in members {
            self.unlink(id, user);
        }
        if self.state.org_members.contains_key(&id) {
            self.save_org_members(id);
            self.state.org_members.remove(&id);
        }
        Ok(())
    }

    fn rollback(&mut self) {
        let state = &mut *self.state;
        while let Some(undo) = self.journal.pop() {
            match undo {
                Undo::Counters {
                    last_user_id,
                    last_organization_id,
                } => {
                    state.last_user_id = last_user_id;
                    state.last_organization_id = last_organization_id;
                }
                Undo::User(id, previous) => restore_ordered(&mut state.users, id, previous),
                Undo::Username(name, previous) => restore(&mut state.usernames, name, previous),
                Undo::Organization(id, previous) => {
                    restore_ordered(&mut state.organizations, id, previous)
                }
                Undo::Slug(slug, previous) => restore(&mut state.slugs, slug, previous),
                Undo::UserOrgs(id, previous) => restore(&mut state.user_orgs, id, previous),
                Undo::OrgMembers(id, previous) => restore(&mut state.org_members, id, previous),
            }
        }
    }
}

impl Drop for WriteTxn<'_> {
    fn drop(&mut self) {
        if !self.committed && !self.journal.is_empty() {
            debug!(entries = self.journal.len(), "Rolling back directory transaction");
            self.rollback();
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Fault injection
// ═══════════════════════════════════════════════════════════════════════════════

/// Failure plan applied to batch inserts, for exercising atomicity.
#[derive(Debug, Clone, Default)]
pub struct FaultPlan {
    /// Fail while inserting this 1-based record of the next batch.
    pub fail_batch_record: Option<usize>,
    /// Sleep after every batch record while holding the write lock.
    pub batch_record_delay: Option<Duration>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Memory Directory
// ═══════════════════════════════════════════════════════════════════════════════

/// In-process [`DirectoryStore`].
#[derive(Debug)]
pub struct MemoryDirectory {
    state: RwLock<DirectoryState>,
    operation_timeout: Duration,
    faults: Mutex<FaultPlan>,
}

impl Default for MemoryDirectory {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

impl MemoryDirectory {
    pub fn new(operation_timeout: Duration) -> Self {
        Self {
            state: RwLock::new(DirectoryState::default()),
            operation_timeout,
            faults: Mutex::new(FaultPlan::default()),
        }
    }

    /// Install a failure plan; it is consumed by the next batch.
    pub fn inject_faults(&self, plan: FaultPlan) {
        *self.faults.lock() = plan;
    }

    /// Run `op` under the operation timeout.
    async fn bounded<T, F>(&self, operation: &'static str, op: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let _timer = StoreTimer::start(operation);
        match tokio::time::timeout(self.operation_timeout, op).await {
            Ok(result) => result,
            Err(_) => Err(CastellanError::unavailable(operation)),
        }
    }

    async fn read(&self) -> RwLockReadGuard<'_, DirectoryState> {
        self.state.read().await
    }

    async fn begin(&self) -> WriteTxn<'_> {
        WriteTxn::new(self.state.write().await)
    }
}

#[async_trait]
impl DirectoryStore for MemoryDirectory {
    #[instrument(skip(self, draft), fields(username = %draft.username))]
    async fn create_user(&self, draft: UserDraft) -> Result<User> {
        self.bounded("create_user", async {
            let mut txn = self.begin().await;
            let record = txn.insert_user(draft)?;
            let user = txn.state.project(&record);
            txn.commit();
            Ok(user)
        })
        .await
    }

    #[instrument(skip(self, update), fields(user_id = %update.id))]
    async fn update_user(&self, update: UserUpdate) -> Result<User> {
        self.bounded("update_user", async {
            let mut txn = self.begin().await;
            let current = txn.state.user(update.id)?.clone();
            let applied = apply_user_update(&current, update)?;
            let record = applied.record;

            if record.username != current.username {
                if txn.state.usernames.contains_key(&record.username) {
                    return Err(CastellanError::duplicate_username(&record.username));
                }
                txn.drop_username(&current.username);
                txn.put_username(record.username.clone(), record.id);
            }

            if let Some(member_of) = applied.member_of {
                txn.ensure_organizations_exist(&member_of)?;
                let existing = txn.state.user_orgs.get(&record.id).cloned().unwrap_or_default();
                for org in existing.iter().filter(|o| !member_of.contains(o)) {
                    txn.unlink(*org, record.id);
                }
                for org in member_of {
                    txn.link(org, record.id);
                }
            }

            txn.put_user(record.clone());
            let user = txn.state.project(&record);
            txn.commit();
            Ok(user)
        })
        .await
    }

    async fn get_user(&self, id: UserId) -> Result<User> {
        self.bounded("get_user", async {
            let state = self.read().await;
            let record = state.user(id)?;
            Ok(state.project(record))
        })
        .await
    }

    async fn find_user(&self, id: UserId) -> Result<Option<UserRecord>> {
        self.bounded("find_user", async {
            Ok(self.read().await.users.get(&id).cloned())
        })
        .await
    }

    async fn find_user_by_username(&self, username: &str) -> Result<Option<UserRecord>> {
        self.bounded("find_user_by_username", async {
            let state = self.read().await;
            Ok(state
                .usernames
                .get(username)
                .and_then(|id| state.users.get(id))
                .cloned())
        })
        .await
    }

    async fn list_users(&self, filter: UserFilter) -> Result<Vec<User>> {
        self.bounded("list_users", async {
            let state = self.read().await;
            if let UserFilter::MemberOf(org) = filter {
                state.organization(org)?;
            }
            Ok(state
                .users
                .values()
                .filter(|u| filter.matches_type(u.user_type))
                .filter(|u| match filter {
                    UserFilter::MemberOf(org) => state.is_member(org, u.id),
                    _ => true,
                })
                .map(|u| state.project(u))
                .collect())
        })
        .await
    }

    #[instrument(skip(self))]
    async fn delete_user(&self, id: UserId) -> Result<()> {
        self.bounded("delete_user", async {
            let mut txn = self.begin().await;
            txn.remove_user(id)?;
            txn.commit();
            Ok(())
        })
        .await
    }

    #[instrument(skip(self))]
    async fn set_enabled(&self, id: UserId, enabled: bool) -> Result<()> {
        self.bounded("set_enabled", async {
            let mut txn = self.begin().await;
            let mut record = txn.state.user(id)?.clone();
            if record.enabled != enabled {
                record.enabled = enabled;
                txn.put_user(record);
            }
            txn.commit();
            Ok(())
        })
        .await
    }

    #[instrument(skip(self, drafts), fields(count = drafts.len()))]
    async fn create_users_batch(&self, drafts: Vec<UserDraft>) -> Result<Vec<User>> {
        let plan = std::mem::take(&mut *self.faults.lock());

        self.bounded("create_users_batch", async {
            let mut txn = self.begin().await;
            let mut created = Vec::with_capacity(drafts.len());

            for (index, draft) in drafts.into_iter().enumerate() {
                if plan.fail_batch_record == Some(index + 1) {
                    return Err(CastellanError::with_internal(
                        ErrorCode::DatabaseError,
                        "A database error occurred",
                        format!("injected fault at batch record {}", index + 1),
                    ));
                }
                let record = txn.insert_user(draft)?;
                created.push(record);

                if let Some(delay) = plan.batch_record_delay {
                    tokio::time::sleep(delay).await;
                }
            }

            let users = created.iter().map(|r| txn.state.project(r)).collect();
            txn.commit();
            Ok(users)
        })
        .await
    }

    async fn has_user_with_role(&self, role: RoleType) -> Result<bool> {
        self.bounded("has_user_with_role", async {
            Ok(self
                .read()
                .await
                .users
                .values()
                .any(|u| u.roles.contains(&role)))
        })
        .await
    }

    #[instrument(skip(self, draft), fields(slug = %draft.slug))]
    async fn create_organization(&self, draft: OrganizationDraft) -> Result<Organization> {
        self.bounded("create_organization", async {
            let mut txn = self.begin().await;
            if txn.state.slugs.contains_key(&draft.slug) {
                return Err(slug_in_use());
            }

            txn.save_counters();
            txn.state.last_organization_id += 1;
            let org = Organization {
                id: OrganizationId(txn.state.last_organization_id),
                name: draft.name,
                email: draft.email,
                description: draft.description,
                slug: draft.slug,
                external_id: draft.external_id,
            };
            txn.put_slug(org.slug.clone(), org.id);
            txn.put_organization(org.clone());
            txn.commit();
            Ok(org)
        })
        .await
    }

    #[instrument(skip(self, draft))]
    async fn update_organization(
        &self,
        id: OrganizationId,
        draft: OrganizationDraft,
    ) -> Result<Organization> {
        self.bounded("update_organization", async {
            let mut txn = self.begin().await;
            let current = txn.state.organization(id)?.clone();

            if draft.slug != current.slug {
                if txn.state.slugs.contains_key(&draft.slug) {
                    return Err(slug_in_use());
                }
                txn.drop_slug(&current.slug);
                txn.put_slug(draft.slug.clone(), id);
            }

            let org = Organization {
                id,
                name: draft.name,
                email: draft.email,
                description: draft.description,
                slug: draft.slug,
                external_id: draft.external_id,
            };
            txn.put_organization(org.clone());
            txn.commit();
            Ok(org)
        })
        .await
    }

    async fn get_organization(&self, id: OrganizationId) -> Result<Organization> {
        self.bounded("get_organization", async {
            Ok(self.read().await.organization(id)?.clone())
        })
        .await
    }

    async fn list_organizations(&self) -> Result<Vec<Organization>> {
        self.bounded("list_organizations", async {
            Ok(self.read().await.organizations.values().cloned().collect())
        })
        .await
    }

    #[instrument(skip(self))]
    async fn delete_organization(&self, id: OrganizationId) -> Result<()> {
        self.bounded("delete_organization", async {
            let mut txn = self.begin().await;
            txn.remove_organization(id)?;
            txn.commit();
            Ok(())
        })
        .await
    }

    #[instrument(skip(self))]
    async fn add_member(&self, org: OrganizationId, user: UserId) -> Result<()> {
        self.bounded("add_member", async {
            let mut txn = self.begin().await;
            txn.state.organization(org)?;
            txn.state.user(user)?;
            txn.link(org, user);
            txn.commit();
            Ok(())
        })
        .await
    }

    #[instrument(skip(self))]
    async fn remove_member(&self, org: OrganizationId, user: UserId) -> Result<()> {
        self.bounded("remove_member", async {
            let mut txn = self.begin().await;
            txn.state.organization(org)?;
            txn.state.user(user)?;
            txn.unlink(org, user);
            txn.commit();
            Ok(())
        })
        .await
    }

    async fn organizations_of(&self, user: UserId) -> Result<Vec<Organization>> {
        self.bounded("organizations_of", async {
            let state = self.read().await;
            state.user(user)?;
            Ok(state.member_of(user))
        })
        .await
    }

    async fn members_of(&self, org: OrganizationId) -> Result<Vec<User>> {
        self.bounded("members_of", async {
            let state = self.read().await;
            state.organization(org)?;
            Ok(state
                .org_members
                .get(&org)
                .map(|members| {
                    members
                        .iter()
                        .filter_map(|id| state.users.get(id))
                        .map(|u| state.project(u))
                        .collect()
                })
                .unwrap_or_default())
        })
        .await
    }

    async fn ping(&self) -> Result<()> {
        self.bounded("ping", async {
            drop(self.read().await);
            Ok(())
        })
        .await
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

fn slug_in_use() -> CastellanError {
    CastellanError::invalid_field("slug", "is already used by another organization")
}
