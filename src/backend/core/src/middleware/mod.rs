//! HTTP middleware for Castellan Core.
pub mod auth;

pub use auth::{AuthContext, AuthLayer, AuthMethod, AuthService, Authenticator, Claims};
