//! Integration tests for the access policy and the bulk API-key issuer.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use castellan_core::config::IssuerConfig;
use castellan_core::error::ErrorCode;
use castellan_core::identity::{OrganizationDraft, UserDraft, UserFilter, UserId, UserType};
use castellan_core::issuer::{verify_secret, BulkApiKeyIssuer, KeyTemplate};
use castellan_core::lifecycle::LifecycleManager;
use castellan_core::rbac::{AccessPolicy, Action, DenyReason, PolicyDecision, RoleType};
use castellan_core::store::{DirectoryStore, FaultPlan, MemoryDirectory};

// ============================================================================
// Test Utilities
// ============================================================================

async fn seed(store: &MemoryDirectory, username: &str, roles: &[RoleType]) -> UserId {
    store
        .create_user(UserDraft {
            user_type: UserType::Internal,
            username: username.to_string(),
            first_name: Some("Test".to_string()),
            last_name: Some("User".to_string()),
            email_address: Some(format!("{}@example.org", username)),
            description: None,
            roles: roles.iter().copied().collect(),
            valid_to: None,
            secret_hash: None,
            member_of: vec![],
        })
        .await
        .unwrap()
        .id
}

fn issuer(store: Arc<MemoryDirectory>) -> BulkApiKeyIssuer {
    BulkApiKeyIssuer::new(store, &IssuerConfig::default())
}

// ============================================================================
// Denial parity
// ============================================================================

#[tokio::test]
async fn test_unknown_and_unprivileged_users_get_identical_denials() {
    let store = Arc::new(MemoryDirectory::default());
    let sponsor = seed(&store, "sponsor", &[RoleType::Sponsor]).await;
    let policy = AccessPolicy::new(store.clone());

    for action in [Action::ManageUsers, Action::IssueApiKeys, Action::ReadRoles] {
        let known = policy.authorize(sponsor, action).await.unwrap();
        let unknown = policy.authorize(UserId(404), action).await.unwrap();
        assert_eq!(known, PolicyDecision::Deny(DenyReason::MissingCapability));
        assert_eq!(known, unknown);

        let known = policy.require(sponsor, action).await.unwrap_err();
        let unknown = policy.require(UserId(404), action).await.unwrap_err();
        assert_eq!(known.code(), unknown.code());
        assert_eq!(known.user_message(), unknown.user_message());
        assert_eq!(known.http_status(), unknown.http_status());
    }
}

#[tokio::test]
async fn test_disabled_admin_is_denied() {
    let store = Arc::new(MemoryDirectory::default());
    let admin = seed(&store, "admin", &[RoleType::Admin]).await;
    let policy = AccessPolicy::new(store.clone());
    assert!(policy.authorize(admin, Action::ManageUsers).await.unwrap().is_allowed());

    store.set_enabled(admin, false).await.unwrap();
    assert_eq!(
        policy.authorize(admin, Action::ManageUsers).await.unwrap(),
        PolicyDecision::Deny(DenyReason::Inactive)
    );
}

#[tokio::test]
async fn test_effective_roles_are_assigned_roles() {
    let store = Arc::new(MemoryDirectory::default());
    let user = seed(&store, "multi", &[RoleType::Operator, RoleType::Sponsor]).await;
    let policy = AccessPolicy::new(store.clone());

    assert_eq!(
        policy.effective_roles(user).await.unwrap(),
        BTreeSet::from([RoleType::Operator, RoleType::Sponsor])
    );
    assert!(policy.effective_roles(UserId(999)).await.unwrap().is_empty());
    assert!(policy.authorize(user, Action::CheckIn).await.unwrap().is_allowed());
    assert!(policy.authorize(user, Action::SponsorScan).await.unwrap().is_allowed());
    assert!(policy.authorize(user, Action::ReadUsers).await.unwrap().is_denied());
}

#[tokio::test]
async fn test_lifecycle_denies_before_lookup() {
    let store = Arc::new(MemoryDirectory::default());
    let operator = seed(&store, "operator", &[RoleType::Operator]).await;
    let target = seed(&store, "target", &[RoleType::Operator]).await;
    let lifecycle = LifecycleManager::new(store.clone());

    let existing = lifecycle.set_enabled(operator, target, false).await.unwrap_err();
    let missing = lifecycle.set_enabled(operator, UserId(777), false).await.unwrap_err();
    assert_eq!(existing.code(), ErrorCode::Unauthorized);
    assert_eq!(missing.code(), ErrorCode::Unauthorized);
    assert!(store.get_user(target).await.unwrap().enabled);
}

#[tokio::test]
async fn test_admin_grants_and_targets_are_reserved_for_admins() {
    let store = Arc::new(MemoryDirectory::default());
    let admin = seed(&store, "admin", &[RoleType::Admin]).await;
    let owner = seed(&store, "owner", &[RoleType::Owner]).await;
    let co_admin = seed(&store, "co-admin", &[RoleType::Admin, RoleType::Owner]).await;
    let policy = AccessPolicy::new(store.clone());

    let err = policy.require_grant(owner, &[RoleType::Admin]).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::Unauthorized);
    policy.require_grant(owner, &[RoleType::Owner, RoleType::Sponsor]).await.unwrap();
    policy.require_grant(admin, &[RoleType::Admin]).await.unwrap();

    let err = policy.require_target(owner, co_admin).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::Unauthorized);
    policy.require_target(owner, owner).await.unwrap();
    policy.require_target(admin, co_admin).await.unwrap();
    // Missing targets are left to the store to report.
    policy.require_target(owner, UserId(404)).await.unwrap();
}

#[tokio::test]
async fn test_owner_cannot_disable_an_admin() {
    let store = Arc::new(MemoryDirectory::default());
    let owner = seed(&store, "owner", &[RoleType::Owner]).await;
    let admin = seed(&store, "admin", &[RoleType::Admin]).await;
    let lifecycle = LifecycleManager::new(store.clone());

    let err = lifecycle.set_enabled(owner, admin, false).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::Unauthorized);
    assert!(store.get_user(admin).await.unwrap().enabled);
}

// ============================================================================
// Bulk issuance
// ============================================================================

#[tokio::test]
async fn test_bulk_issue_yields_distinct_keys() {
    let store = Arc::new(MemoryDirectory::default());
    let admin = seed(&store, "admin", &[RoleType::Admin]).await;
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

    let template = KeyTemplate {
        organization_id: Some(org.id),
        description: Some("scanner".to_string()),
        ..KeyTemplate::default()
    };
    let keys = issuer(store.clone()).issue_bulk(admin, 5, template).await.unwrap();

    assert_eq!(keys.len(), 5);
    let ids: HashSet<_> = keys.iter().map(|k| k.user.id).collect();
    let secrets: HashSet<_> = keys.iter().map(|k| k.secret.clone()).collect();
    let usernames: HashSet<_> = keys.iter().map(|k| k.user.username.clone()).collect();
    assert_eq!(ids.len(), 5);
    assert_eq!(secrets.len(), 5);
    assert_eq!(usernames.len(), 5);

    for key in &keys {
        assert!(key.secret.starts_with("cst_"));
        assert_eq!(key.user.description.as_deref(), Some("scanner"));
        assert_eq!(key.user.member_of[0].id, org.id);
        let record = store.find_user(key.user.id).await.unwrap().unwrap();
        assert!(verify_secret(&key.secret, record.secret_hash.as_deref().unwrap()));
    }
    assert_eq!(store.members_of(org.id).await.unwrap().len(), 5);
}

#[tokio::test]
async fn test_fault_at_record_three_creates_nothing() {
    let store = Arc::new(MemoryDirectory::default());
    let admin = seed(&store, "admin", &[RoleType::Admin]).await;
    store.inject_faults(FaultPlan {
        fail_batch_record: Some(3),
        ..FaultPlan::default()
    });

    let result = issuer(store.clone()).issue_bulk(admin, 5, KeyTemplate::default()).await;
    assert!(result.is_err());
    assert!(store.list_users(UserFilter::OnlyApiKeys).await.unwrap().is_empty());

    // Without the fault the same call produces the full batch.
    let keys = issuer(store.clone()).issue_bulk(admin, 5, KeyTemplate::default()).await.unwrap();
    assert_eq!(keys.len(), 5);
    assert_eq!(store.list_users(UserFilter::OnlyApiKeys).await.unwrap().len(), 5);
}

#[tokio::test]
async fn test_bulk_issue_requires_capability() {
    let store = Arc::new(MemoryDirectory::default());
    let supervisor = seed(&store, "supervisor", &[RoleType::Supervisor]).await;

    let err = issuer(store.clone())
        .issue_bulk(supervisor, 0, KeyTemplate::default())
        .await
        .unwrap_err();
    // Denial takes precedence over the count check.
    assert_eq!(err.code(), ErrorCode::Unauthorized);
}

#[tokio::test]
async fn test_bulk_issue_above_maximum_is_validation_error() {
    let store = Arc::new(MemoryDirectory::default());
    let owner = seed(&store, "owner", &[RoleType::Owner]).await;

    let err = issuer(store.clone())
        .issue_bulk(owner, 101, KeyTemplate::default())
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::ValidationError);
    assert_eq!(err.http_status().as_u16(), 422);
}

#[tokio::test]
async fn test_owner_cannot_issue_admin_keys() {
    let store = Arc::new(MemoryDirectory::default());
    let owner = seed(&store, "owner", &[RoleType::Owner]).await;

    let template = KeyTemplate {
        role: RoleType::Admin,
        ..KeyTemplate::default()
    };
    let err = issuer(store.clone()).issue_bulk(owner, 3, template).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::Unauthorized);
    assert!(store.list_users(UserFilter::OnlyApiKeys).await.unwrap().is_empty());
}
