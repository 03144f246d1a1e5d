#![allow(clippy::result_large_err)]
//! # Castellan Core
//!
//! Access-control and membership backend for users, roles, organizations
//! and API keys.
//!
//! ## Architecture
//!
//! - **Identity Store**: users, organizations and memberships behind one
//!   transactional [`store::DirectoryStore`] trait (in-memory or PostgreSQL)
//! - **Membership Index**: the bidirectional user/organization relation
//! - **Access Policy**: flat role capabilities and allow/deny decisions
//! - **Lifecycle Manager**: gated creation, update, enablement and deletion
//! - **Bulk API-Key Issuer**: atomic batches of API-key users
//! - **Query Façade**: read projections for the admin console
//! - **Telemetry**: structured logging with redaction, OTLP and Prometheus

pub mod api;
pub mod bootstrap;
pub mod config;
pub mod db;
pub mod error;
pub mod identity;
pub mod issuer;
pub mod lifecycle;
pub mod membership;
pub mod middleware;
pub mod query;
pub mod rbac;
pub mod store;
pub mod telemetry;

pub use error::{CastellanError, ErrorCode, ErrorContext, ErrorDetails, ErrorSeverity, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::api::{build_router, AppState};
    pub use crate::config::Config;
    pub use crate::error::{CastellanError, ErrorCode, ErrorContext, ErrorDetails, ErrorSeverity, Result};
    pub use crate::identity::{
        NewOrganization, NewUser, Organization, OrganizationId, User, UserFilter, UserId,
        UserInfo, UserType, UserUpdate,
    };
    pub use crate::issuer::{BulkApiKeyIssuer, IssuedKey, KeyTemplate};
    pub use crate::lifecycle::LifecycleManager;
    pub use crate::membership::MembershipIndex;
    pub use crate::middleware::{AuthContext, AuthLayer, AuthMethod, Authenticator};
    pub use crate::query::{list_distinct_organizations, QueryFacade};
    pub use crate::rbac::{AccessPolicy, Action, DenyReason, PolicyDecision, Principal, Role, RoleType};
    pub use crate::store::{DirectoryStore, MemoryDirectory, SharedStore};
}
