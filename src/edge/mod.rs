//! Gateway edge: the thin composition layer wiring credential validation,
//! authorization, rate limiting and the two session managers onto HTTP
//! routes.

mod http;
mod ws;

pub use http::{rate_limit, require_auth};
pub use ws::ws_upgrade;

use crate::auth::CredentialValidator;
use crate::authz::Capability;
use crate::observability::GatewayMetrics;
use crate::rate_limit::RateLimiter;
use crate::socket::ConnectionHub;
use axum::middleware;
use axum::routing::get;
use axum::Router;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Shared state handed to every edge handler.
pub struct GatewayState {
    pub validator: Arc<CredentialValidator>,
    pub limiter: Arc<RateLimiter>,
    pub hub: Arc<ConnectionHub>,
    pub metrics: Arc<GatewayMetrics>,
    pub registry: prometheus::Registry,
    /// Capability every authenticated caller must hold, when set.
    pub required_capability: Option<Capability>,
}

/// Builds the edge router. Authenticated routes pass through the
/// validator and limiter middleware; health and metrics stay open.
pub fn router(state: Arc<GatewayState>) -> Router {
    let protected = Router::new()
        .route("/v1/session", get(http::session_info))
        .layer(middleware::from_fn_with_state(state.clone(), http::rate_limit))
        .layer(middleware::from_fn_with_state(state.clone(), http::require_auth));

    Router::new()
        .route("/ws", get(ws::ws_upgrade))
        .merge(protected)
        .route("/healthz", get(http::healthz))
        .route("/metrics", get(http::metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
