//! HTTP tests for the admin API.
//!
//! Tests cover:
//! - Health and authentication status
//! - The "OK" status token on create and update
//! - Status codes for every error kind
//! - Session and API-key authentication
//! - Bulk API-key issuance over HTTP

use std::sync::Arc;

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde_json::{json, Value};
use tower::ServiceExt;

use castellan_core::api::{build_router, AppState};
use castellan_core::bootstrap::ensure_admin;
use castellan_core::config::Config;
use castellan_core::identity::{UserDraft, UserId, UserType};
use castellan_core::rbac::RoleType;
use castellan_core::store::{MemoryDirectory, SharedStore};

// ============================================================================
// Test Utilities
// ============================================================================

struct TestApp {
    router: Router,
    state: AppState,
    admin_token: String,
}

fn test_config() -> Config {
    let mut config = Config::default();
    config.auth.jwt_secret = "test-secret-test-secret-test-secret!".to_string();
    config.demo.enabled = true;
    config
}

async fn test_app() -> TestApp {
    let store: SharedStore = Arc::new(MemoryDirectory::default());
    let config = test_config();
    let state = AppState::new(store.clone(), &config).unwrap();
    let admin = ensure_admin(&store, &config.bootstrap).await.unwrap().unwrap();
    let admin_token = state.authenticator.issue_session(admin.id).unwrap();

    TestApp {
        router: build_router(state.clone()),
        state,
        admin_token,
    }
}

impl TestApp {
    async fn send(
        &self,
        method: Method,
        uri: &str,
        authorization: Option<String>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(value) = authorization {
            builder = builder.header(header::AUTHORIZATION, value);
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    fn admin(&self) -> Option<String> {
        Some(format!("Bearer {}", self.admin_token))
    }

    async fn as_admin(&self, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        self.send(method, uri, self.admin(), body).await
    }

    async fn session_for(&self, username: &str, role: RoleType) -> Option<String> {
        let user = self
            .state
            .store
            .create_user(UserDraft {
                user_type: UserType::Internal,
                username: username.to_string(),
                first_name: Some("Test".to_string()),
                last_name: Some("User".to_string()),
                email_address: Some(format!("{}@example.org", username)),
                description: None,
                roles: [role].into_iter().collect(),
                valid_to: None,
                secret_hash: None,
                member_of: vec![],
            })
            .await
            .unwrap();
        let token = self.state.authenticator.issue_session(user.id).unwrap();
        Some(format!("Bearer {}", token))
    }
}

fn new_user(username: &str) -> Value {
    json!({
        "type": "INTERNAL",
        "username": username,
        "firstName": "Ada",
        "lastName": "Lovelace",
        "emailAddress": "ada@example.org",
        "roles": ["OPERATOR"]
    })
}

fn new_org(name: &str) -> Value {
    json!({
        "name": name,
        "email": "info@acme.test",
        "description": "An organization"
    })
}

// ============================================================================
// Health and Session
// ============================================================================

#[tokio::test]
async fn test_health_check() {
    let app = test_app().await;
    let (status, body) = app.send(Method::GET, "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["store"], "memory");
}

#[tokio::test]
async fn test_authentication_status() {
    let app = test_app().await;
    let (status, body) = app.send(Method::GET, "/authentication-status", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "authenticated": false }));

    let (_, body) = app.send(Method::GET, "/authentication-status", app.admin(), None).await;
    assert_eq!(body, json!({ "authenticated": true }));
}

#[tokio::test]
async fn test_invalid_token_is_unauthenticated() {
    let app = test_app().await;
    let (status, body) = app
        .send(Method::GET, "/admin/api/users", Some("Bearer not-a-jwt".to_string()), None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn test_anonymous_admin_calls_are_unauthenticated() {
    let app = test_app().await;
    let (status, _) = app.send(Method::GET, "/admin/api/users", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, _) = app
        .send(Method::POST, "/admin/api/users/new", None, Some(new_user("x")))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, _) = app.send(Method::GET, "/admin/api/users/current", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_current_principal() {
    let app = test_app().await;
    let (status, body) = app.as_admin(Method::GET, "/admin/api/users/current", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["username"], "admin");
    assert_eq!(body["role"], "ADMIN");
    assert_eq!(body["type"], "INTERNAL");
}

// ============================================================================
// Users
// ============================================================================

#[tokio::test]
async fn test_create_update_and_list_users() {
    let app = test_app().await;

    let (status, created) = app
        .as_admin(Method::POST, "/admin/api/users/new", Some(new_user("ada")))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(created["username"], "ada");
    assert_eq!(created["enabled"], true);
    let id = created["id"].as_i64().unwrap();

    let (status, body) = app
        .as_admin(
            Method::POST,
            "/admin/api/users/edit",
            Some(json!({ "id": id, "description": "mathematician" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!("OK"));

    let (status, body) = app.as_admin(Method::GET, &format!("/admin/api/users/{}", id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["description"], "mathematician");

    let (_, users) = app.as_admin(Method::GET, "/admin/api/users", None).await;
    let names: Vec<_> = users.as_array().unwrap().iter().map(|u| u["username"].clone()).collect();
    assert_eq!(names, vec![json!("admin"), json!("ada")]);
}

#[tokio::test]
async fn test_duplicate_username_is_conflict() {
    let app = test_app().await;
    app.as_admin(Method::POST, "/admin/api/users/new", Some(new_user("dup"))).await;
    let (status, body) = app
        .as_admin(Method::POST, "/admin/api/users/new", Some(new_user("dup")))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "DUPLICATE_USERNAME");
}

#[tokio::test]
async fn test_missing_contact_details_is_unprocessable() {
    let app = test_app().await;
    let (status, body) = app
        .as_admin(
            Method::POST,
            "/admin/api/users/new",
            Some(json!({ "type": "INTERNAL", "username": "nobody", "roles": ["OPERATOR"] })),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_type_change_is_unprocessable() {
    let app = test_app().await;
    let (_, created) = app
        .as_admin(Method::POST, "/admin/api/users/new", Some(new_user("typed")))
        .await;
    let (status, _) = app
        .as_admin(
            Method::POST,
            "/admin/api/users/edit",
            Some(json!({ "id": created["id"], "type": "DEMO" })),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_missing_user_is_not_found() {
    let app = test_app().await;
    let (status, _) = app.as_admin(Method::GET, "/admin/api/users/999", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = app.as_admin(Method::DELETE, "/admin/api/users/999", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = app
        .as_admin(Method::POST, "/admin/api/users/999/enable/false", None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_enable_disable_and_delete() {
    let app = test_app().await;
    let (_, created) = app
        .as_admin(Method::POST, "/admin/api/users/new", Some(new_user("toggle")))
        .await;
    let id = created["id"].as_i64().unwrap();

    let (status, body) = app
        .as_admin(Method::POST, &format!("/admin/api/users/{}/enable/false", id), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!("OK"));
    let (_, user) = app.as_admin(Method::GET, &format!("/admin/api/users/{}", id), None).await;
    assert_eq!(user["enabled"], false);

    let (status, body) = app
        .as_admin(Method::DELETE, &format!("/admin/api/users/{}", id), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!("OK"));
}

#[tokio::test]
async fn test_admin_cannot_disable_self() {
    let app = test_app().await;
    let (status, _) = app
        .as_admin(Method::POST, "/admin/api/users/1/enable/false", None)
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_unprivileged_caller_is_forbidden_regardless_of_target() {
    let app = test_app().await;
    let sponsor = app.session_for("sponsor", RoleType::Sponsor).await;

    let (status, _) = app.send(Method::GET, "/admin/api/users", sponsor.clone(), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (existing_status, existing) = app
        .send(Method::DELETE, "/admin/api/users/1", sponsor.clone(), None)
        .await;
    let (missing_status, missing) = app
        .send(Method::DELETE, "/admin/api/users/999", sponsor, None)
        .await;
    assert_eq!(existing_status, StatusCode::FORBIDDEN);
    assert_eq!(missing_status, StatusCode::FORBIDDEN);
    assert_eq!(existing["error"]["message"], missing["error"]["message"]);
    assert_eq!(existing["error"]["code"], missing["error"]["code"]);
}

#[tokio::test]
async fn test_deleted_principal_token_is_rejected() {
    let app = test_app().await;
    let owner = app.session_for("owner", RoleType::Owner).await;
    app.state.store.delete_user(UserId(2)).await.unwrap();

    let (status, _) = app.send(Method::GET, "/admin/api/users/current", owner, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_list_roles() {
    let app = test_app().await;
    let (status, roles) = app.as_admin(Method::GET, "/admin/api/roles", None).await;
    assert_eq!(status, StatusCode::OK);
    let roles = roles.as_array().unwrap();
    assert_eq!(roles.len(), 6);
    assert_eq!(roles[0]["role"], "ADMIN");
    assert_eq!(roles[5]["role"], "API_CONSUMER");
}

// ============================================================================
// Organizations
// ============================================================================

#[tokio::test]
async fn test_organization_lifecycle() {
    let app = test_app().await;

    let (status, body) = app
        .as_admin(Method::POST, "/admin/api/organizations/new", Some(new_org("Acme Corp")))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!("OK"));

    let (_, orgs) = app.as_admin(Method::GET, "/admin/api/organizations", None).await;
    let org = orgs[0].clone();
    assert_eq!(org["slug"], "acme-corp");
    let org_id = org["id"].as_i64().unwrap();

    let (status, body) = app
        .as_admin(
            Method::POST,
            "/admin/api/organizations/update",
            Some(json!({
                "id": org_id,
                "name": "Acme Corp",
                "email": "hello@acme.test",
                "description": "Renamed"
            })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!("OK"));

    let (_, created) = app
        .as_admin(Method::POST, "/admin/api/users/new", Some(new_user("member")))
        .await;
    let user_id = created["id"].as_i64().unwrap();
    let members = format!("/admin/api/organizations/{}/members/{}", org_id, user_id);
    let (status, _) = app.as_admin(Method::POST, &members, None).await;
    assert_eq!(status, StatusCode::OK);

    let (_, listed) = app
        .as_admin(Method::GET, &format!("/admin/api/organizations/{}/members", org_id), None)
        .await;
    assert_eq!(listed[0]["id"], user_id);

    let (_, distinct) = app.as_admin(Method::GET, "/admin/api/users/organizations", None).await;
    assert_eq!(distinct.as_array().unwrap().len(), 1);

    let (status, _) = app
        .as_admin(Method::DELETE, &format!("/admin/api/organizations/{}", org_id), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    let (_, user) = app
        .as_admin(Method::GET, &format!("/admin/api/users/{}", user_id), None)
        .await;
    assert_eq!(user["memberOf"], json!([]));

    let (status, _) = app
        .as_admin(Method::GET, &format!("/admin/api/organizations/{}", org_id), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_slug_collision_names_the_field() {
    let app = test_app().await;
    app.as_admin(Method::POST, "/admin/api/organizations/new", Some(new_org("Acme"))).await;
    let (status, body) = app
        .as_admin(Method::POST, "/admin/api/organizations/new", Some(new_org("ACME")))
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"]["details"]["field"], "slug");
}

// ============================================================================
// API keys
// ============================================================================

#[tokio::test]
async fn test_bulk_issue_and_authenticate_with_key() {
    let app = test_app().await;

    let (status, keys) = app
        .as_admin(
            Method::POST,
            "/admin/api/api-keys/bulk",
            Some(json!({ "count": 2, "description": "gate scanners" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let keys = keys.as_array().unwrap().clone();
    assert_eq!(keys.len(), 2);
    assert_eq!(keys[0]["user"]["type"], "API_KEY");
    assert_eq!(keys[0]["user"]["roles"], json!(["API_CONSUMER"]));

    let (_, listed) = app.as_admin(Method::GET, "/admin/api/api-keys", None).await;
    assert_eq!(listed.as_array().unwrap().len(), 2);
    let (_, users) = app.as_admin(Method::GET, "/admin/api/users", None).await;
    assert_eq!(users.as_array().unwrap().len(), 1);

    let username = keys[0]["user"]["username"].as_str().unwrap();
    let secret = keys[0]["secret"].as_str().unwrap();
    let basic = Some(format!("Basic {}", STANDARD.encode(format!("{}:{}", username, secret))));

    let (_, body) = app.send(Method::GET, "/authentication-status", basic.clone(), None).await;
    assert_eq!(body, json!({ "authenticated": true }));
    let (status, _) = app.send(Method::GET, "/admin/api/users", basic, None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let wrong = Some(format!("Basic {}", STANDARD.encode(format!("{}:cst_wrong", username))));
    let (status, _) = app.send(Method::GET, "/authentication-status", wrong, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_bulk_issue_rejects_bad_counts() {
    let app = test_app().await;
    for count in [0, -3, 101] {
        let (status, _) = app
            .as_admin(Method::POST, "/admin/api/api-keys/bulk", Some(json!({ "count": count })))
            .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }
    let (_, listed) = app.as_admin(Method::GET, "/admin/api/api-keys", None).await;
    assert_eq!(listed, json!([]));
}

#[tokio::test]
async fn test_api_key_type_is_refused_on_create() {
    let app = test_app().await;
    let (status, body) = app
        .as_admin(
            Method::POST,
            "/admin/api/users/new",
            Some(json!({ "type": "API_KEY", "username": "hand-made", "roles": ["API_CONSUMER"] })),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"]["details"]["field"], "type");
    let (_, listed) = app.as_admin(Method::GET, "/admin/api/api-keys", None).await;
    assert_eq!(listed, json!([]));
}

// ============================================================================
// Demo
// ============================================================================

#[tokio::test]
async fn test_demo_login_issues_owner_session() {
    let app = test_app().await;
    let (status, body) = app
        .send(
            Method::POST,
            "/demo/login",
            None,
            Some(json!({ "username": "visitor@demo.test" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user"]["type"], "DEMO");
    let secret = body["secret"].as_str().unwrap().to_string();

    let token = Some(format!("Bearer {}", body["token"].as_str().unwrap()));
    let (status, principal) = app.send(Method::GET, "/admin/api/users/current", token, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(principal["role"], "OWNER");

    let (status, again) = app
        .send(
            Method::POST,
            "/demo/login",
            None,
            Some(json!({ "username": "visitor@demo.test", "secret": secret })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(again["user"]["id"], body["user"]["id"]);
    assert!(again.get("secret").is_none());
}

#[tokio::test]
async fn test_demo_login_by_username_alone_is_rejected() {
    let app = test_app().await;
    let visitor = json!({ "username": "visitor@demo.test" });
    let (status, _) = app.send(Method::POST, "/demo/login", None, Some(visitor.clone())).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app.send(Method::POST, "/demo/login", None, Some(visitor)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body.get("token").is_none());

    let (status, _) = app
        .send(
            Method::POST,
            "/demo/login",
            None,
            Some(json!({ "username": "visitor@demo.test", "secret": "demo_wrong" })),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_demo_owner_cannot_mint_admins() {
    let app = test_app().await;
    let (_, login) = app
        .send(
            Method::POST,
            "/demo/login",
            None,
            Some(json!({ "username": "visitor@demo.test" })),
        )
        .await;
    let demo = Some(format!("Bearer {}", login["token"].as_str().unwrap()));

    let mut admin = new_user("backdoor");
    admin["roles"] = json!(["ADMIN"]);
    let (status, _) = app
        .send(Method::POST, "/admin/api/users/new", demo.clone(), Some(admin))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = app
        .send(
            Method::POST,
            "/admin/api/users/edit",
            demo.clone(),
            Some(json!({ "id": login["user"]["id"], "roles": ["ADMIN"] })),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = app
        .send(
            Method::POST,
            "/admin/api/api-keys/bulk",
            demo.clone(),
            Some(json!({ "count": 1, "role": "ADMIN" })),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = app
        .send(Method::POST, "/admin/api/users/1/enable/false", demo, None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (_, users) = app.as_admin(Method::GET, "/admin/api/users", None).await;
    let names: Vec<&str> = users
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|u| u["username"].as_str())
        .collect();
    assert!(!names.contains(&"backdoor"));
    let (_, listed) = app.as_admin(Method::GET, "/admin/api/api-keys", None).await;
    assert_eq!(listed, json!([]));
}
