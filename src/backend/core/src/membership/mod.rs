//! Membership index: the User ↔ Organization relation.
//!
//! Both directions are maintained by the store inside the same transaction
//! as the entity writes, so this service never has to repair anything
//! itself. It is ungated; callers go through the lifecycle manager.

use tracing::debug;

use crate::error::Result;
use crate::identity::{Organization, OrganizationId, User, UserId};
use crate::store::SharedStore;

#[derive(Clone)]
pub struct MembershipIndex {
    store: SharedStore,
}

impl MembershipIndex {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    /// Idempotent. Both sides must exist.
    pub async fn add_member(&self, org: OrganizationId, user: UserId) -> Result<()> {
        self.store.add_member(org, user).await?;
        debug!(organization_id = %org, user_id = %user, "Member added");
        Ok(())
    }

    /// Removing a user that is not a member succeeds.
    pub async fn remove_member(&self, org: OrganizationId, user: UserId) -> Result<()> {
        self.store.remove_member(org, user).await?;
        debug!(organization_id = %org, user_id = %user, "Member removed");
        Ok(())
    }

    pub async fn organizations_of(&self, user: UserId) -> Result<Vec<Organization>> {
        self.store.organizations_of(user).await
    }

    pub async fn members_of(&self, org: OrganizationId) -> Result<Vec<User>> {
        self.store.members_of(org).await
    }

    /// True when `user` belongs to `org`.
    pub async fn is_member(&self, org: OrganizationId, user: UserId) -> Result<bool> {
        Ok(self
            .store
            .organizations_of(user)
            .await?
            .iter()
            .any(|o| o.id == org))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{OrganizationDraft, UserDraft, UserType};
    use crate::rbac::RoleType;
    use crate::store::{DirectoryStore, MemoryDirectory};
    use std::collections::BTreeSet;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_is_member_tracks_add_and_remove() {
        let store = Arc::new(MemoryDirectory::default());
        let org = store
            .create_organization(OrganizationDraft {
                name: "Acme".to_string(),
                email: "info@acme.test".to_string(),
                description: "Acme".to_string(),
                slug: "acme".to_string(),
                external_id: None,
            })
            .await
            .unwrap();
        let user = store
            .create_user(UserDraft {
                user_type: UserType::ApiKey,
                username: "k".to_string(),
                first_name: None,
                last_name: None,
                email_address: None,
                description: None,
                roles: BTreeSet::from([RoleType::ApiConsumer]),
                valid_to: None,
                secret_hash: None,
                member_of: vec![],
            })
            .await
            .unwrap();

        let index = MembershipIndex::new(store);
        assert!(!index.is_member(org.id, user.id).await.unwrap());
        index.add_member(org.id, user.id).await.unwrap();
        assert!(index.is_member(org.id, user.id).await.unwrap());
        assert_eq!(index.members_of(org.id).await.unwrap()[0].id, user.id);
        index.remove_member(org.id, user.id).await.unwrap();
        assert!(!index.is_member(org.id, user.id).await.unwrap());
    }
}
