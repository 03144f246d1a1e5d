//! Authentication middleware.
//!
//! Two credential transports are accepted on the `Authorization` header:
//! - `Bearer <jwt>`: HS256 session token whose `sub` is a user id
//! - `Basic base64(username:secret)`: API-key users
//!
//! Requests without credentials proceed with an anonymous [`AuthContext`];
//! handlers that need a principal reject those with `Unauthenticated`.
//! Presented but invalid credentials fail immediately with 401.
//!
//! # Example
//!
//! ```rust,ignore
//! use castellan_core::middleware::auth::{AuthLayer, Authenticator};
//!
//! let authenticator = Arc::new(Authenticator::new(&config.auth, store.clone())?);
//! let app = Router::new()
//!     .route("/admin/api/users", get(list_users))
//!     .layer(AuthLayer::new(authenticator));
//! ```

use axum::{
    body::Body,
    extract::{FromRequestParts, Request},
    http::{header::AUTHORIZATION, request::Parts, HeaderMap},
    response::{IntoResponse, Response},
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::Utc;
use futures::future::BoxFuture;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::{
    sync::Arc,
    task::{Context, Poll},
};
use tower::{Layer, Service};
use tracing::debug;
use uuid::Uuid;

use crate::config::AuthConfig;
use crate::error::{CastellanError, ErrorCode, Result};
use crate::identity::{UserId, UserRecord};
use crate::issuer::secret::verify_secret;
use crate::store::SharedStore;

// ═══════════════════════════════════════════════════════════════════════════════
// Session Claims
// ═══════════════════════════════════════════════════════════════════════════════

/// Session token claims.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user id)
    pub sub: String,

    /// Token id
    pub jti: String,

    pub iss: String,
    pub iat: i64,
    pub exp: i64,
}

impl Claims {
    pub fn new(user: UserId, issuer: impl Into<String>, ttl: std::time::Duration) -> Self {
        let now = Utc::now().timestamp();
        let ttl = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX);
        Self {
            sub: user.to_string(),
            jti: Uuid::new_v4().to_string(),
            iss: issuer.into(),
            iat: now,
            exp: now.saturating_add(ttl),
        }
    }

    pub fn user_id(&self) -> Result<UserId> {
        self.sub.parse::<i64>().map(UserId).map_err(|_| {
            CastellanError::with_internal(
                ErrorCode::InvalidToken,
                "Authentication required",
                format!("non-numeric subject: {}", self.sub),
            )
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Auth Context
// ═══════════════════════════════════════════════════════════════════════════════

/// Authentication method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    Session,
    ApiKey,
    Anonymous,
}

impl AuthMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Session => "session",
            Self::ApiKey => "api_key",
            Self::Anonymous => "anonymous",
        }
    }
}

/// Authentication context attached to requests.
#[derive(Debug, Clone)]
pub struct AuthContext {
    /// `None` for anonymous requests
    pub user_id: Option<UserId>,
    pub auth_method: AuthMethod,
    pub request_id: String,
}

impl AuthContext {
    pub fn session(user_id: UserId, request_id: String) -> Self {
        Self {
            user_id: Some(user_id),
            auth_method: AuthMethod::Session,
            request_id,
        }
    }

    pub fn api_key(record: &UserRecord, request_id: String) -> Self {
        Self {
            user_id: Some(record.id),
            auth_method: AuthMethod::ApiKey,
            request_id,
        }
    }

    pub fn anonymous(request_id: String) -> Self {
        Self {
            user_id: None,
            auth_method: AuthMethod::Anonymous,
            request_id,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.user_id.is_some()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Authenticator
// ═══════════════════════════════════════════════════════════════════════════════

/// Issues session tokens and resolves request credentials.
pub struct Authenticator {
    store: SharedStore,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    issuer: String,
    session_ttl: std::time::Duration,
}

impl Authenticator {
    pub fn new(config: &AuthConfig, store: SharedStore) -> Result<Self> {
        if config.jwt_secret.is_empty() {
            return Err(CastellanError::configuration("auth.jwt_secret is not set"));
        }
        let secret = config.jwt_secret.as_bytes();

        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[config.issuer.as_str()]);
        validation.set_required_spec_claims(&["exp", "sub", "iss"]);

        Ok(Self {
            store,
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            validation,
            issuer: config.issuer.clone(),
            session_ttl: config.session_ttl,
        })
    }

    /// Sign a session token for `user`.
    pub fn issue_session(&self, user: UserId) -> Result<String> {
        let claims = Claims::new(user, &self.issuer, self.session_ttl);
        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)?;
        counter!("castellan_sessions_issued_total").increment(1);
        Ok(token)
    }

    pub fn verify_session(&self, token: &str) -> Result<Claims> {
        let data = decode::<Claims>(token, &self.decoding_key, &self.validation)?;
        Ok(data.claims)
    }

    /// Resolve the credentials on `headers`, if any.
    pub async fn authenticate(&self, headers: &HeaderMap) -> Result<AuthContext> {
        let request_id = headers
            .get("X-Request-ID")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string())
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let Some(value) = headers.get(AUTHORIZATION) else {
            return Ok(AuthContext::anonymous(request_id));
        };
        let value = value
            .to_str()
            .map_err(|_| CastellanError::unauthenticated("Authentication required"))?;

        let context = if let Some(token) = strip_scheme(value, "Bearer") {
            let claims = self.verify_session(token)?;
            AuthContext::session(claims.user_id()?, request_id)
        } else if let Some(encoded) = strip_scheme(value, "Basic") {
            let (username, secret) = decode_basic(encoded)?;
            let record = self.verify_api_key(&username, &secret).await?;
            AuthContext::api_key(&record, request_id)
        } else {
            return Err(CastellanError::unauthenticated("Authentication required")
                .with_internal_message("unsupported authorization scheme"));
        };

        counter!("castellan_auth_success_total", "method" => context.auth_method.as_str())
            .increment(1);
        Ok(context)
    }

    /// Check an API-key username and secret against the store.
    ///
    /// Unknown usernames still pay for a hash so both failure paths cost the
    /// same.
    pub async fn verify_api_key(&self, username: &str, secret: &str) -> Result<UserRecord> {
        let record = self.store.find_user_by_username(username).await?;
        let stored = record
            .as_ref()
            .and_then(|r| r.secret_hash.as_deref())
            .unwrap_or("");
        let matches = verify_secret(secret, stored);

        match record {
            Some(record) if matches && record.is_api_key() && record.is_active() => Ok(record),
            _ => {
                debug!("API key authentication failed");
                Err(CastellanError::unauthenticated("Authentication required")
                    .with_internal_message("invalid API key credentials"))
            }
        }
    }
}

fn strip_scheme<'a>(value: &'a str, scheme: &str) -> Option<&'a str> {
    let (head, rest) = value.split_once(' ')?;
    head.eq_ignore_ascii_case(scheme).then(|| rest.trim())
}

fn decode_basic(encoded: &str) -> Result<(String, String)> {
    let malformed = || {
        CastellanError::unauthenticated("Authentication required")
            .with_internal_message("malformed basic credentials")
    };
    let bytes = STANDARD.decode(encoded).map_err(|_| malformed())?;
    let text = String::from_utf8(bytes).map_err(|_| malformed())?;
    let (username, secret) = text.split_once(':').ok_or_else(malformed)?;
    Ok((username.to_string(), secret.to_string()))
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tower Layer and Service
// ═══════════════════════════════════════════════════════════════════════════════

/// Authentication layer for Tower.
#[derive(Clone)]
pub struct AuthLayer {
    authenticator: Arc<Authenticator>,
}

impl AuthLayer {
    pub fn new(authenticator: Arc<Authenticator>) -> Self {
        Self { authenticator }
    }
}

impl<S> Layer<S> for AuthLayer {
    type Service = AuthService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AuthService {
            inner,
            authenticator: self.authenticator.clone(),
        }
    }
}

/// Authentication service.
#[derive(Clone)]
pub struct AuthService<S> {
    inner: S,
    authenticator: Arc<Authenticator>,
}

impl<S> Service<Request<Body>> for AuthService<S>
where
    S: Service<Request<Body>, Response = Response> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, std::result::Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<std::result::Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut request: Request<Body>) -> Self::Future {
        let authenticator = self.authenticator.clone();
        let mut inner = self.inner.clone();

        Box::pin(async move {
            match authenticator.authenticate(request.headers()).await {
                Ok(context) => {
                    request.extensions_mut().insert(context);
                    inner.call(request).await
                }
                Err(error) => Ok(error.into_response()),
            }
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Axum Extractor
// ═══════════════════════════════════════════════════════════════════════════════

#[axum::async_trait]
impl<S> FromRequestParts<S> for AuthContext
where
    S: Send + Sync,
{
    type Rejection = CastellanError;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> std::result::Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthContext>()
            .cloned()
            .ok_or_else(|| CastellanError::unauthenticated("Authentication required"))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
