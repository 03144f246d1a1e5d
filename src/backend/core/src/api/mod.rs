//! HTTP API for Castellan Core.
//!
//! Admin operations live under `/admin/api`. Create and update calls answer
//! with the JSON string `"OK"`; creating a user answers with the created
//! user. Failures render as the JSON error body of
//! [`CastellanError`](crate::error::CastellanError).
//!
//! Every request passes through the authentication layer, which attaches an
//! [`AuthContext`](crate::middleware::AuthContext). Read routes are gated per
//! route by [`RequireActionLayer`](crate::rbac::RequireActionLayer); mutations
//! are gated inside the lifecycle manager and the issuer.

mod handlers;
pub mod routes;

use axum::{
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::config::Config;
use crate::error::Result;
use crate::issuer::BulkApiKeyIssuer;
use crate::lifecycle::LifecycleManager;
use crate::middleware::{AuthLayer, Authenticator};
use crate::query::QueryFacade;
use crate::store::SharedStore;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: SharedStore,
    pub lifecycle: LifecycleManager,
    pub issuer: BulkApiKeyIssuer,
    pub query: QueryFacade,
    pub authenticator: Arc<Authenticator>,
    pub metrics: Option<PrometheusHandle>,
    pub demo_enabled: bool,
}

impl AppState {
    pub fn new(store: SharedStore, config: &Config) -> Result<Self> {
        Ok(Self {
            lifecycle: LifecycleManager::new(store.clone()),
            issuer: BulkApiKeyIssuer::new(store.clone(), &config.issuer),
            query: QueryFacade::new(store.clone()),
            authenticator: Arc::new(Authenticator::new(&config.auth, store.clone())?),
            metrics: None,
            demo_enabled: config.demo.enabled,
            store,
        })
    }

    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }
}

/// Build the full router.
///
/// # Example
///
/// ```rust,ignore
/// let state = AppState::new(store, &config)?;
/// let app = build_router(state);
/// ```
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let mut router = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/authentication-status", get(handlers::authentication_status))
        .nest(routes::ADMIN_PREFIX, routes::admin_router(state.lifecycle.policy()));

    if state.metrics.is_some() {
        router = router.route("/metrics", get(handlers::prometheus_metrics));
    }
    if state.demo_enabled {
        router = router.route("/demo/login", post(handlers::demo_login));
    }

    router
        .layer(AuthLayer::new(state.authenticator.clone()))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
