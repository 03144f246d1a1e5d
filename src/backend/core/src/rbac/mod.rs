//! Role-based access control.
//!
//! This module provides:
//! - **Roles**: the fixed six-role catalog
//! - **Models**: actions, the capability table, and policy decisions
//! - **Policy Engine**: whether a user can perform an action
//! - **Authorization Middleware**: principal extraction and per-route checks
//!
//! # Usage
//!
//! ```rust,ignore
//! use castellan_core::rbac::{AccessPolicy, Action};
//!
//! let policy = AccessPolicy::new(store.clone());
//! if policy.authorize(user_id, Action::ManageUsers).await?.is_allowed() {
//!     // ...
//! }
//! ```

pub mod middleware;
pub mod models;
pub mod policy;
pub mod roles;

pub use middleware::{Principal, RequireActionLayer, RequireActionService};
pub use models::{Action, DenyReason, PolicyDecision, Role};
pub use policy::{evaluate, AccessPolicy};
pub use roles::RoleType;
