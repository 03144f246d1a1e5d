//! API request handlers with proper error propagation.
//!
//! All handlers return `Result<_, CastellanError>` so that errors are
//! converted to the matching HTTP status by the `IntoResponse`
//! implementation on `CastellanError`.

use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};

use super::AppState;
use crate::error::Result;
use crate::identity::{
    NewOrganization, NewUser, Organization, OrganizationId, OrganizationUpdate, User, UserId,
    UserInfo, UserUpdate,
};
use crate::issuer::{IssuedKey, KeyTemplate};
use crate::middleware::AuthContext;
use crate::query::list_distinct_organizations;
use crate::rbac::{Principal, Role};

/// Success token for create and update calls.
pub const OK: &str = "OK";

fn ok() -> Json<&'static str> {
    Json(OK)
}

// ═══════════════════════════════════════════════════════════════════════════════
// Health, Metrics and Session
// ═══════════════════════════════════════════════════════════════════════════════

pub async fn health_check(State(state): State<AppState>) -> Result<impl IntoResponse> {
    state.store.ping().await?;
    Ok(Json(serde_json::json!({
        "status": "healthy",
        "store": state.store.backend(),
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": chrono::Utc::now().to_rfc3339()
    })))
}

pub async fn prometheus_metrics(State(state): State<AppState>) -> impl IntoResponse {
    let body = state
        .metrics
        .as_ref()
        .map(|handle| handle.render())
        .unwrap_or_default();

    (
        [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}

#[derive(Serialize)]
pub struct AuthenticationStatus {
    pub authenticated: bool,
}

pub async fn authentication_status(ctx: AuthContext) -> Json<AuthenticationStatus> {
    Json(AuthenticationStatus {
        authenticated: ctx.is_authenticated(),
    })
}

#[derive(Deserialize)]
pub struct DemoLoginRequest {
    pub username: String,
    /// Required once the account exists.
    #[serde(default)]
    pub secret: Option<String>,
}

#[derive(Serialize)]
pub struct DemoLoginResponse {
    pub token: String,
    pub user: User,
    /// Returned only by the login that created the account.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
}

pub async fn demo_login(
    State(state): State<AppState>,
    Json(req): Json<DemoLoginRequest>,
) -> Result<Json<DemoLoginResponse>> {
    let login = state
        .lifecycle
        .provision_demo_user(req.username.trim(), req.secret.as_deref())
        .await?;
    let token = state.authenticator.issue_session(login.user.id)?;
    Ok(Json(DemoLoginResponse {
        token,
        user: login.user,
        secret: login.secret,
    }))
}

// ═══════════════════════════════════════════════════════════════════════════════
// Users
// ═══════════════════════════════════════════════════════════════════════════════

pub async fn list_users(State(state): State<AppState>) -> Result<Json<Vec<User>>> {
    Ok(Json(state.query.list_non_api_users().await?))
}

pub async fn list_api_keys(State(state): State<AppState>) -> Result<Json<Vec<User>>> {
    Ok(Json(state.query.list_api_key_users().await?))
}

pub async fn list_user_organizations(
    State(state): State<AppState>,
) -> Result<Json<Vec<Organization>>> {
    let users = state.query.list_non_api_users().await?;
    Ok(Json(list_distinct_organizations(&users)))
}

pub async fn current_user(
    State(state): State<AppState>,
    principal: Principal,
) -> Result<Json<UserInfo>> {
    Ok(Json(state.query.current_principal(principal.user_id).await?))
}

pub async fn get_user(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<User>> {
    Ok(Json(state.store.get_user(UserId(id)).await?))
}

pub async fn create_user(
    State(state): State<AppState>,
    principal: Principal,
    Json(req): Json<NewUser>,
) -> Result<Json<User>> {
    Ok(Json(state.lifecycle.create_user(principal.user_id, req).await?))
}

pub async fn update_user(
    State(state): State<AppState>,
    principal: Principal,
    Json(req): Json<UserUpdate>,
) -> Result<Json<&'static str>> {
    state.lifecycle.update_user(principal.user_id, req).await?;
    Ok(ok())
}

pub async fn set_enabled(
    State(state): State<AppState>,
    principal: Principal,
    Path((id, enabled)): Path<(i64, bool)>,
) -> Result<Json<&'static str>> {
    state
        .lifecycle
        .set_enabled(principal.user_id, UserId(id), enabled)
        .await?;
    Ok(ok())
}

pub async fn delete_user(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<i64>,
) -> Result<Json<&'static str>> {
    state.lifecycle.delete_user(principal.user_id, UserId(id)).await?;
    Ok(ok())
}

// ═══════════════════════════════════════════════════════════════════════════════
// API Keys
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Deserialize)]
pub struct BulkIssueRequest {
    pub count: i64,
    #[serde(flatten)]
    pub template: KeyTemplate,
}

pub async fn issue_api_keys(
    State(state): State<AppState>,
    principal: Principal,
    Json(req): Json<BulkIssueRequest>,
) -> Result<Json<Vec<IssuedKey>>> {
    let keys = state
        .issuer
        .issue_bulk(principal.user_id, req.count, req.template)
        .await?;
    Ok(Json(keys))
}

// ═══════════════════════════════════════════════════════════════════════════════
// Organizations
// ═══════════════════════════════════════════════════════════════════════════════

pub async fn list_organizations(
    State(state): State<AppState>,
) -> Result<Json<Vec<Organization>>> {
    Ok(Json(state.query.list_organizations().await?))
}

pub async fn get_organization(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Organization>> {
    Ok(Json(state.store.get_organization(OrganizationId(id)).await?))
}

pub async fn create_organization(
    State(state): State<AppState>,
    principal: Principal,
    Json(req): Json<NewOrganization>,
) -> Result<Json<&'static str>> {
    state
        .lifecycle
        .create_organization(principal.user_id, req)
        .await?;
    Ok(ok())
}

pub async fn update_organization(
    State(state): State<AppState>,
    principal: Principal,
    Json(req): Json<OrganizationUpdate>,
) -> Result<Json<&'static str>> {
    state
        .lifecycle
        .update_organization(principal.user_id, req)
        .await?;
    Ok(ok())
}

pub async fn delete_organization(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<i64>,
) -> Result<Json<&'static str>> {
    state
        .lifecycle
        .delete_organization(principal.user_id, OrganizationId(id))
        .await?;
    Ok(ok())
}

pub async fn list_members(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Vec<User>>> {
    let org = OrganizationId(id);
    // Unknown organizations are a 404, not an empty list.
    state.store.get_organization(org).await?;
    Ok(Json(state.store.members_of(org).await?))
}

pub async fn add_member(
    State(state): State<AppState>,
    principal: Principal,
    Path((org, user)): Path<(i64, i64)>,
) -> Result<Json<&'static str>> {
    state
        .lifecycle
        .add_member(principal.user_id, OrganizationId(org), UserId(user))
        .await?;
    Ok(ok())
}

pub async fn remove_member(
    State(state): State<AppState>,
    principal: Principal,
    Path((org, user)): Path<(i64, i64)>,
) -> Result<Json<&'static str>> {
    state
        .lifecycle
        .remove_member(principal.user_id, OrganizationId(org), UserId(user))
        .await?;
    Ok(ok())
}

// ═══════════════════════════════════════════════════════════════════════════════
// Roles
// ═══════════════════════════════════════════════════════════════════════════════

pub async fn list_roles(State(state): State<AppState>) -> Json<Vec<Role>> {
    Json(state.query.list_roles())
}
