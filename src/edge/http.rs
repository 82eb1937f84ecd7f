use crate::auth::Principal;
use crate::edge::GatewayState;
use crate::error::{ErrorCode, GatewayError};
use crate::rate_limit::{RateKey, RateLimitDecision};
use axum::extract::{ConnectInfo, Extension, Request, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use prometheus::Encoder;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, error};

pub(crate) fn bearer_from_headers(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .map(|raw| raw.strip_prefix("Bearer ").unwrap_or(raw).trim().to_string())
        .filter(|token| !token.is_empty())
}

/// Structured JSON error body with a stable `code` field.
pub(crate) fn error_response(err: &GatewayError) -> Response {
    let code = err.code();
    let status = StatusCode::from_u16(code.http_status())
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let body = serde_json::json!({
        "error": err.public_message(),
        "code": code.as_str(),
    });
    (status, Json(body)).into_response()
}

pub(crate) fn stamp_rate_headers(headers: &mut HeaderMap, decision: &RateLimitDecision) {
    let pairs = [
        ("x-ratelimit-limit", decision.limit.to_string()),
        ("x-ratelimit-remaining", decision.remaining.to_string()),
        ("x-ratelimit-reset", decision.reset_unix().to_string()),
    ];
    for (name, value) in pairs {
        if let Ok(value) = HeaderValue::from_str(&value) {
            headers.insert(name, value);
        }
    }
}

pub(crate) fn rate_limited_response(decision: &RateLimitDecision) -> Response {
    let retry_secs = decision
        .retry_after
        .map(|d| d.as_secs().max(1))
        .unwrap_or(1);
    let body = serde_json::json!({
        "error": "Rate limit exceeded",
        "code": ErrorCode::RateLimitExceeded.as_str(),
        "retry_after": retry_secs,
        "reset_time": decision.reset_at.to_rfc3339(),
    });
    let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
    stamp_rate_headers(response.headers_mut(), decision);
    response.headers_mut().insert(
        header::RETRY_AFTER,
        HeaderValue::from_str(&retry_secs.to_string())
            .unwrap_or(HeaderValue::from_static("1")),
    );
    response
}

/// Validates the bearer credential and stores the resulting principal in
/// request extensions. The response reveals only the error category.
pub async fn require_auth(
    State(state): State<Arc<GatewayState>>,
    mut request: Request,
    next: Next,
) -> Response {
    let Some(token) = bearer_from_headers(request.headers()) else {
        return error_response(&GatewayError::TokenMissing);
    };
    match state.validator.validate(&token) {
        Ok(principal) => {
            if let Some(capability) = &state.required_capability {
                if let Err(err) = crate::authz::require(&principal, capability) {
                    return error_response(&err);
                }
            }
            request.extensions_mut().insert(principal);
            next.run(request).await
        }
        Err(err) => {
            state
                .metrics
                .auth_failures
                .with_label_values(&[err.code().as_str()])
                .inc();
            debug!(error = %err, "credential validation failed");
            error_response(&err)
        }
    }
}

/// Consults the limiter for the resolved key and stamps the rate headers
/// on every allowed response.
pub async fn rate_limit(
    State(state): State<Arc<GatewayState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request,
    next: Next,
) -> Response {
    let route = request.uri().path().to_string();
    let user_id = request
        .extensions()
        .get::<Principal>()
        .map(|p| p.user_id.clone());
    let ip = addr.ip().to_string();
    let key = RateKey {
        user_id: user_id.as_deref(),
        source_addr: Some(&ip),
        route: &route,
    };
    let decision = state.limiter.allow(&key).await;
    state
        .metrics
        .rate_limit_decisions
        .with_label_values(&[if decision.allowed { "allowed" } else { "denied" }])
        .inc();
    if !decision.allowed {
        debug!(route, "request rate limited");
        return rate_limited_response(&decision);
    }
    let mut response = next.run(request).await;
    stamp_rate_headers(response.headers_mut(), &decision);
    response
}

/// Introspection for the authenticated caller.
pub async fn session_info(
    State(state): State<Arc<GatewayState>>,
    Extension(principal): Extension<Principal>,
) -> Json<serde_json::Value> {
    let active = state.hub.user_session_count(&principal.user_id).await;
    Json(serde_json::json!({
        "user_id": principal.user_id,
        "active_sessions": active,
    }))
}

pub async fn healthz() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

pub async fn metrics(State(state): State<Arc<GatewayState>>) -> Response {
    let encoder = prometheus::TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&state.registry.gather(), &mut buffer) {
        error!(error = %err, "metrics encoding failed");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        buffer,
    )
        .into_response()
}
