//! Axum authorization middleware that enforces actions on requests.
//!
//! This middleware reads the `AuthContext` (injected by the auth middleware)
//! and asks the access policy whether the request should proceed.

use axum::{
    body::Body,
    extract::{FromRequestParts, Request},
    http::request::Parts,
    response::{IntoResponse, Response},
};
use futures::future::BoxFuture;
use std::task::{Context, Poll};
use tower::{Layer, Service};
use tracing::warn;

use super::models::Action;
use super::policy::AccessPolicy;
use crate::error::CastellanError;
use crate::identity::UserId;
use crate::middleware::auth::{AuthContext, AuthMethod};

// ═══════════════════════════════════════════════════════════════════════════════
// Principal (extracted in handlers)
// ═══════════════════════════════════════════════════════════════════════════════

/// The authenticated user on whose behalf a request runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Principal {
    pub user_id: UserId,
    pub method: AuthMethod,
}

impl Principal {
    pub fn from_context(ctx: &AuthContext) -> Option<Self> {
        ctx.user_id.map(|user_id| Self {
            user_id,
            method: ctx.auth_method,
        })
    }
}

/// Anonymous requests are rejected with `Unauthenticated`.
#[axum::async_trait]
impl<S> FromRequestParts<S> for Principal
where
    S: Send + Sync,
{
    type Rejection = CastellanError;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthContext>()
            .and_then(Principal::from_context)
            .ok_or_else(|| CastellanError::unauthenticated("Authentication required"))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tower Layer
// ═══════════════════════════════════════════════════════════════════════════════

/// Layer that requires the principal to be granted `action`.
///
/// # Example
///
/// ```rust,ignore
/// let app = Router::new()
///     .route("/admin/api/roles", get(list_roles))
///     .route_layer(RequireActionLayer::new(policy.clone(), Action::ReadRoles));
/// ```
#[derive(Clone)]
pub struct RequireActionLayer {
    policy: AccessPolicy,
    action: Action,
}

impl RequireActionLayer {
    pub fn new(policy: AccessPolicy, action: Action) -> Self {
        Self { policy, action }
    }
}

impl<S> Layer<S> for RequireActionLayer {
    type Service = RequireActionService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RequireActionService {
            inner,
            policy: self.policy.clone(),
            action: self.action,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tower Service
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Clone)]
pub struct RequireActionService<S> {
    inner: S,
    policy: AccessPolicy,
    action: Action,
}

impl<S> Service<Request<Body>> for RequireActionService<S>
where
    S: Service<Request<Body>, Response = Response> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<Body>) -> Self::Future {
        let policy = self.policy.clone();
        let action = self.action;
        let mut inner = self.inner.clone();

        Box::pin(async move {
            let principal = request
                .extensions()
                .get::<AuthContext>()
                .and_then(Principal::from_context);

            let Some(principal) = principal else {
                return Ok(CastellanError::unauthenticated("Authentication required")
                    .into_response());
            };

            if let Err(error) = policy.require(principal.user_id, action).await {
                warn!(
                    user_id = %principal.user_id,
                    action = %action,
                    "Action denied"
                );
                return Ok(error.into_response());
            }

            inner.call(request).await
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
