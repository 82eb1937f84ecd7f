//! Per-session reader and writer loops.
//!
//! Both loops are generic over the transport halves so they can be driven
//! by a split socket in production and by channel-backed fakes in tests.
//! Every exit path funnels into [`ConnectionHub::disconnect`], which is
//! idempotent, so the loops never coordinate who tears down first.

use crate::socket::{ConnectionHub, DisconnectReason, Frame, Session};
use axum::extract::ws::Message;
use bytes::Bytes;
use futures::{Sink, SinkExt, Stream, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Drains inbound frames until the peer closes, errors out, or the session
/// is cancelled. Any frame from the peer counts as liveness.
pub async fn run_reader<S>(hub: Arc<ConnectionHub>, session: Arc<Session>, mut inbound: S)
where
    S: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    let cancel = session.cancel_token().clone();
    let max_size = hub.config().max_message_size;
    let read_deadline = hub.config().read_deadline;
    let reason = loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            msg = timeout(read_deadline, inbound.next()) => match msg {
                Err(_) => {
                    debug!(session_id = %session.id, "no traffic within the read deadline");
                    break DisconnectReason::HeartbeatTimeout;
                }
                Ok(Some(Ok(Message::Text(text)))) => {
                    session.touch();
                    if text.len() > max_size {
                        warn!(
                            session_id = %session.id,
                            size = text.len(),
                            "discarding oversized frame"
                        );
                        continue;
                    }
                    match serde_json::from_str::<Frame>(&text) {
                        Ok(frame) => hub.handle_frame(&session, frame).await,
                        Err(err) => {
                            warn!(session_id = %session.id, error = %err, "discarding malformed frame");
                        }
                    }
                }
                // Transport-level pings are answered by the transport
                // itself; both directions still count as liveness.
                Ok(Some(Ok(Message::Ping(_)))) | Ok(Some(Ok(Message::Pong(_)))) => session.touch(),
                Ok(Some(Ok(Message::Binary(_)))) => {
                    session.touch();
                    debug!(session_id = %session.id, "ignoring binary frame");
                }
                Ok(Some(Ok(Message::Close(_)))) => break DisconnectReason::Client,
                Ok(Some(Err(err))) => {
                    debug!(session_id = %session.id, error = %err, "transport read failed");
                    break DisconnectReason::ReadError;
                }
                Ok(None) => break DisconnectReason::Client,
            }
        }
    };
    hub.disconnect(&session, reason).await;
}

/// Drains the session's outbound queue into the transport, interleaving
/// periodic pings. Each write gets a bounded deadline; a write that cannot
/// complete in time disconnects the session rather than stalling the queue.
pub async fn run_writer<K>(
    hub: Arc<ConnectionHub>,
    session: Arc<Session>,
    mut outbound: mpsc::Receiver<Frame>,
    mut sink: K,
) where
    K: Sink<Message> + Unpin,
    K::Error: std::fmt::Display,
{
    let cancel = session.cancel_token().clone();
    let write_deadline = hub.config().write_deadline;
    let mut ping = tokio::time::interval(hub.config().ping_period);
    ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // the first tick fires immediately; skip it so pings start one period in
    ping.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ping.tick() => {
                if !write(&mut sink, Message::Ping(Bytes::new()), write_deadline).await {
                    hub.disconnect(&session, DisconnectReason::WriteError).await;
                    break;
                }
            }
            frame = outbound.recv() => match frame {
                Some(frame) => {
                    let json = match serde_json::to_string(&frame) {
                        Ok(json) => json,
                        Err(err) => {
                            warn!(session_id = %session.id, error = %err, "dropping unserializable frame");
                            continue;
                        }
                    };
                    if !write(&mut sink, Message::Text(json.into()), write_deadline).await {
                        hub.disconnect(&session, DisconnectReason::WriteError).await;
                        break;
                    }
                }
                None => break,
            }
        }
    }
    let _ = sink.close().await;
}

async fn write<K>(sink: &mut K, msg: Message, deadline: std::time::Duration) -> bool
where
    K: Sink<Message> + Unpin,
    K::Error: std::fmt::Display,
{
    match timeout(deadline, sink.send(msg)).await {
        Ok(Ok(())) => true,
        Ok(Err(err)) => {
            debug!(error = %err, "transport write failed");
            false
        }
        Err(_) => {
            debug!("transport write deadline exceeded");
            false
        }
    }
}
