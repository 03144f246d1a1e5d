//! Admin API routes.
//!
//! All routes are mounted under `/admin/api`.
//!
//! # Endpoints
//!
//! ## Users
//! - `GET /users` - Users excluding API keys
//! - `GET /users/organizations` - Distinct organizations of those users
//! - `GET /users/current` - The calling principal
//! - `GET /users/:id` - Get user by id
//! - `POST /users/new` - Create a user
//! - `POST /users/edit` - Update a user
//! - `POST /users/:id/enable/:enabled` - Enable or disable a user
//! - `DELETE /users/:id` - Delete a user
//!
//! ## API keys
//! - `GET /api-keys` - API-key users
//! - `POST /api-keys/bulk` - Issue a batch of API keys
//!
//! ## Organizations
//! - `GET /organizations` - List organizations
//! - `POST /organizations/new` - Create an organization
//! - `POST /organizations/update` - Update an organization
//! - `GET /organizations/:id` - Get organization by id
//! - `DELETE /organizations/:id` - Delete an organization
//! - `GET /organizations/:id/members` - Members of an organization
//! - `POST /organizations/:id/members/:user_id` - Add a member
//! - `DELETE /organizations/:id/members/:user_id` - Remove a member
//!
//! ## Roles
//! - `GET /roles` - The role catalog

use axum::{
    routing::{get, post},
    Router,
};

use crate::api::{handlers, AppState};
use crate::rbac::{AccessPolicy, Action, RequireActionLayer};

/// Admin API prefix.
pub const ADMIN_PREFIX: &str = "/admin/api";

/// Build the admin router.
pub fn admin_router(policy: &AccessPolicy) -> Router<AppState> {
    let gate = |action: Action| RequireActionLayer::new(policy.clone(), action);

    Router::new()
        // Users
        .route(
            "/users",
            get(handlers::list_users).route_layer(gate(Action::ReadUsers)),
        )
        .route(
            "/users/organizations",
            get(handlers::list_user_organizations).route_layer(gate(Action::ReadUsers)),
        )
        .route("/users/current", get(handlers::current_user))
        .route("/users/new", post(handlers::create_user))
        .route("/users/edit", post(handlers::update_user))
        .route(
            "/users/:id",
            get(handlers::get_user)
                .route_layer(gate(Action::ReadUsers))
                .delete(handlers::delete_user),
        )
        .route("/users/:id/enable/:enabled", post(handlers::set_enabled))
        // API keys
        .route(
            "/api-keys",
            get(handlers::list_api_keys).route_layer(gate(Action::ReadUsers)),
        )
        .route("/api-keys/bulk", post(handlers::issue_api_keys))
        // Organizations
        .route(
            "/organizations",
            get(handlers::list_organizations).route_layer(gate(Action::ReadOrganizations)),
        )
        .route("/organizations/new", post(handlers::create_organization))
        .route("/organizations/update", post(handlers::update_organization))
        .route(
            "/organizations/:id",
            get(handlers::get_organization)
                .route_layer(gate(Action::ReadOrganizations))
                .delete(handlers::delete_organization),
        )
        .route(
            "/organizations/:id/members",
            get(handlers::list_members).route_layer(gate(Action::ReadOrganizations)),
        )
        .route(
            "/organizations/:id/members/:user_id",
            post(handlers::add_member).delete(handlers::remove_member),
        )
        // Roles
        .route(
            "/roles",
            get(handlers::list_roles).route_layer(gate(Action::ReadRoles)),
        )
}
