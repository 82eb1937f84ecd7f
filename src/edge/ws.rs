use crate::auth::Principal;
use crate::edge::http::{bearer_from_headers, error_response, rate_limited_response};
use crate::edge::GatewayState;
use crate::error::GatewayError;
use crate::rate_limit::RateKey;
use crate::socket::{run_reader, run_writer, DisconnectReason, Frame};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, Query, State};
use axum::http::HeaderMap;
use axum::response::Response;
use futures::StreamExt;
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Deserialize)]
pub struct UpgradeParams {
    token: Option<String>,
}

/// Socket upgrade endpoint.
///
/// The full admission pipeline runs before the protocol switch: credential
/// validation, rate limiting, then connection limits. A rejected upgrade
/// returns a structured JSON error and never creates a session.
pub async fn ws_upgrade(
    State(state): State<Arc<GatewayState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Query(params): Query<UpgradeParams>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let token = bearer_from_headers(&headers).or(params.token);
    let Some(token) = token else {
        return error_response(&GatewayError::TokenMissing);
    };

    let principal = match state.validator.validate(&token) {
        Ok(principal) => principal,
        Err(err) => {
            state
                .metrics
                .auth_failures
                .with_label_values(&[err.code().as_str()])
                .inc();
            debug!(error = %err, "upgrade credential rejected");
            return error_response(&err);
        }
    };
    if let Some(capability) = &state.required_capability {
        if let Err(err) = crate::authz::require(&principal, capability) {
            return error_response(&err);
        }
    }

    let ip = addr.ip().to_string();
    let key = RateKey {
        user_id: Some(&principal.user_id),
        source_addr: Some(&ip),
        route: "/ws",
    };
    let decision = state.limiter.allow(&key).await;
    state
        .metrics
        .rate_limit_decisions
        .with_label_values(&[if decision.allowed { "allowed" } else { "denied" }])
        .inc();
    if !decision.allowed {
        return rate_limited_response(&decision);
    }

    if let Err(err) = state.hub.check_admission(&principal.user_id).await {
        state
            .metrics
            .admission_rejections
            .with_label_values(&[err.code().as_str()])
            .inc();
        debug!(user_id = %principal.user_id, error = %err, "upgrade rejected at admission");
        return error_response(&err);
    }

    let socket_config = state.hub.config();
    ws.max_message_size(socket_config.max_message_size)
        .read_buffer_size(socket_config.read_buffer_size)
        .write_buffer_size(socket_config.write_buffer_size)
        .on_upgrade(move |socket| serve_session(state, principal, socket))
}

async fn serve_session(state: Arc<GatewayState>, principal: Principal, mut socket: WebSocket) {
    // Limits re-checked under the registry lock; the pre-upgrade check is
    // advisory only.
    let admitted = tokio::time::timeout(
        state.hub.config().handshake_timeout,
        state.hub.admit(principal),
    )
    .await;
    let (session, outbound) = match admitted {
        Ok(Ok(pair)) => pair,
        Ok(Err(err)) => {
            let frame = Frame::error(err.code());
            if let Ok(json) = serde_json::to_string(&frame) {
                let _ = socket.send(Message::Text(json.into())).await;
            }
            return;
        }
        Err(_) => {
            debug!("admission did not complete within the handshake timeout");
            return;
        }
    };

    let (sink, stream) = socket.split();
    let hub = state.hub.clone();
    let reader = tokio::spawn(run_reader(hub.clone(), session.clone(), stream));
    let writer = tokio::spawn(run_writer(hub.clone(), session.clone(), outbound, sink));
    let _ = tokio::join!(reader, writer);
    // No-op unless a worker exited without going through teardown.
    hub.disconnect(&session, DisconnectReason::Client).await;
}
