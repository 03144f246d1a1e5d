//! Read-side projections for the admin console.
//!
//! Every listing is served from a single store read, so a response never
//! mixes states from before and after a concurrent mutation.

use std::collections::HashSet;

use crate::error::{CastellanError, Result};
use crate::identity::{Organization, User, UserFilter, UserId, UserInfo};
use crate::rbac::{Role, RoleType};
use crate::store::SharedStore;

#[derive(Clone)]
pub struct QueryFacade {
    store: SharedStore,
}

impl QueryFacade {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    /// Internal and demo users, ascending id.
    pub async fn list_non_api_users(&self) -> Result<Vec<User>> {
        self.store.list_users(UserFilter::ExcludeApiKeys).await
    }

    pub async fn list_api_key_users(&self) -> Result<Vec<User>> {
        self.store.list_users(UserFilter::OnlyApiKeys).await
    }

    pub async fn list_organizations(&self) -> Result<Vec<Organization>> {
        self.store.list_organizations().await
    }

    pub fn list_roles(&self) -> Vec<Role> {
        RoleType::catalog()
    }

    /// The calling principal. A token that outlived its account is
    /// treated as no credentials at all.
    pub async fn current_principal(&self, user: UserId) -> Result<UserInfo> {
        let record = self
            .store
            .find_user(user)
            .await?
            .ok_or_else(|| CastellanError::unauthenticated("Authentication required"))?;
        UserInfo::from_record(&record).ok_or_else(|| {
            CastellanError::internal(format!("user {} has no roles", record.id))
        })
    }
}

/// Organizations of `users`, deduplicated by id in first-seen order.
pub fn list_distinct_organizations(users: &[User]) -> Vec<Organization> {
    let mut seen = HashSet::new();
    users
        .iter()
        .flat_map(|u| u.member_of.iter())
        .filter(|org| seen.insert(org.id))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{OrganizationId, UserType};

    fn org(id: i64) -> Organization {
        Organization {
            id: OrganizationId(id),
            name: format!("org-{}", id),
            email: format!("org{}@example.org", id),
            description: "test".to_string(),
            slug: format!("org-{}", id),
            external_id: None,
        }
    }

    fn user(id: i64, orgs: Vec<Organization>) -> User {
        User {
            id: UserId(id),
            user_type: UserType::Internal,
            enabled: true,
            valid_to: None,
            valid_to_epoch_second: None,
            username: format!("user-{}", id),
            first_name: None,
            last_name: None,
            email_address: None,
            description: None,
            roles: vec![RoleType::Operator],
            member_of: orgs,
        }
    }

    #[test]
    fn test_distinct_organizations_first_seen_order() {
        let users = vec![
            user(1, vec![org(3), org(1)]),
            user(2, vec![org(1), org(2)]),
            user(3, vec![]),
            user(4, vec![org(3)]),
        ];
        let ids: Vec<i64> = list_distinct_organizations(&users)
            .into_iter()
            .map(|o| o.id.0)
            .collect();
        assert_eq!(ids, vec![3, 1, 2]);
    }

    #[test]
    fn test_distinct_organizations_empty() {
        assert!(list_distinct_organizations(&[]).is_empty());
    }
}
