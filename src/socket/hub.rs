use crate::auth::Principal;
use crate::config::SocketConfig;
use crate::error::{ErrorCode, GatewayError};
use crate::observability::GatewayMetrics;
use crate::socket::session::EnqueueError;
use crate::socket::{DisconnectReason, Frame, MessageType, RoomRegistry, Session, SessionId};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Sessions keyed by ID, plus per-user counts for admission checks. Both
/// live under one lock so counts never drift from the registry.
#[derive(Default)]
struct SessionTable {
    by_id: HashMap<SessionId, Arc<Session>>,
    per_user: HashMap<String, usize>,
}

/// Owns the lifecycle of every persistent socket session.
pub struct ConnectionHub {
    config: SocketConfig,
    table: RwLock<SessionTable>,
    rooms: RoomRegistry,
    metrics: Arc<GatewayMetrics>,
}

impl ConnectionHub {
    pub fn new(config: SocketConfig, metrics: Arc<GatewayMetrics>) -> Self {
        ConnectionHub {
            config,
            table: RwLock::new(SessionTable::default()),
            rooms: RoomRegistry::new(),
            metrics,
        }
    }

    pub fn config(&self) -> &SocketConfig {
        &self.config
    }

    /// Admission check done before the upgrade completes, before any
    /// session object exists.
    pub async fn check_admission(&self, user_id: &str) -> Result<(), GatewayError> {
        let table = self.table.read().await;
        if table.by_id.len() >= self.config.max_connections {
            return Err(GatewayError::ConnectionLimitReached);
        }
        if table.per_user.get(user_id).copied().unwrap_or(0)
            >= self.config.max_connections_per_user
        {
            return Err(GatewayError::UserConnectionLimit);
        }
        Ok(())
    }

    /// Creates and registers a session for an authenticated principal.
    ///
    /// Limits are re-checked under the write lock; the welcome frame is
    /// queued before the handle is returned, so the session is `Active` the
    /// moment its workers start. The returned receiver is the writer
    /// worker's half of the bounded outbound queue.
    pub async fn admit(
        &self,
        principal: Principal,
    ) -> Result<(Arc<Session>, mpsc::Receiver<Frame>), GatewayError> {
        let mut table = self.table.write().await;
        if table.by_id.len() >= self.config.max_connections {
            self.metrics
                .admission_rejections
                .with_label_values(&[ErrorCode::ConnectionLimitReached.as_str()])
                .inc();
            return Err(GatewayError::ConnectionLimitReached);
        }
        let user_count = table.per_user.get(&principal.user_id).copied().unwrap_or(0);
        if user_count >= self.config.max_connections_per_user {
            self.metrics
                .admission_rejections
                .with_label_values(&[ErrorCode::UserConnectionLimit.as_str()])
                .inc();
            return Err(GatewayError::UserConnectionLimit);
        }

        let (session, rx) = Session::new(principal, self.config.outbound_queue_capacity);
        table.by_id.insert(session.id, session.clone());
        *table.per_user.entry(session.user_id.clone()).or_insert(0) += 1;
        drop(table);

        let _ = session.try_enqueue(Frame::welcome(&session.id.to_string()));
        self.metrics.active_sessions.inc();
        info!(session_id = %session.id, user_id = %session.user_id, "session admitted");
        Ok((session, rx))
    }

    /// Idempotent teardown. Safe to call concurrently and from any trigger:
    /// the first caller through the guard runs the full sequence, every
    /// other caller returns immediately.
    pub async fn disconnect(&self, session: &Arc<Session>, reason: DisconnectReason) {
        if !session.begin_disconnect() {
            return;
        }

        // (a) stop both workers
        session.cancel_token().cancel();

        // (b) leave every room, deleting any left empty
        let joined = session.rooms_snapshot();
        let left = self.rooms.remove_session(session.id, &joined).await;

        // (c) notify former rooms
        for room_id in &left {
            self.broadcast(
                room_id,
                Frame::member_left(room_id, &session.user_id),
                Some(session.id),
            )
            .await;
        }

        // (d) drop from the global registry
        {
            let mut table = self.table.write().await;
            table.by_id.remove(&session.id);
            if let Some(count) = table.per_user.get_mut(&session.user_id) {
                *count -= 1;
                if *count == 0 {
                    table.per_user.remove(&session.user_id);
                }
            }
        }

        // (e) queue and transport close as the cancelled writer unwinds
        self.metrics.active_sessions.dec();
        self.metrics
            .session_closed
            .with_label_values(&[reason.as_str()])
            .inc();
        info!(
            session_id = %session.id,
            user_id = %session.user_id,
            reason = reason.as_str(),
            "session closed"
        );
    }

    /// Best-effort broadcast over a member snapshot. A full member queue
    /// skips that member without blocking or affecting the rest. Returns
    /// the number of members the frame was delivered to.
    pub async fn broadcast(
        &self,
        room_id: &str,
        frame: Frame,
        except: Option<SessionId>,
    ) -> usize {
        let members = self.rooms.members(room_id).await;
        let mut delivered = 0;
        for member in members {
            if Some(member.id) == except {
                continue;
            }
            match member.try_enqueue(frame.clone()) {
                Ok(()) => delivered += 1,
                Err(EnqueueError::Full) => {
                    self.metrics.broadcast_dropped.inc();
                    debug!(
                        session_id = %member.id,
                        room_id,
                        "outbound queue full, dropping broadcast frame"
                    );
                }
                Err(EnqueueError::Closed) => {}
            }
        }
        delivered
    }

    /// Point-to-point send with a bounded wait. A timeout marks the peer
    /// unresponsive and disconnects it, so one slow consumer cannot pin
    /// memory indefinitely.
    pub async fn send_to(
        &self,
        session: &Arc<Session>,
        frame: Frame,
    ) -> Result<(), GatewayError> {
        match session
            .enqueue_within(frame, self.config.send_timeout)
            .await
        {
            Ok(()) => Ok(()),
            Err(err) => {
                warn!(session_id = %session.id, "peer unresponsive, disconnecting");
                self.disconnect(session, DisconnectReason::SendTimeout).await;
                Err(err)
            }
        }
    }

    /// Reader-side dispatch of one inbound frame.
    pub async fn handle_frame(&self, session: &Arc<Session>, frame: Frame) {
        match frame.kind {
            MessageType::JoinRoom => {
                let Some(room_id) = frame.room_id else {
                    debug!(session_id = %session.id, "join_room without room_id");
                    return;
                };
                self.rooms.join(&room_id, session.clone()).await;
                session.join_room(&room_id);
                self.broadcast(
                    &room_id,
                    Frame::member_joined(&room_id, &session.user_id),
                    Some(session.id),
                )
                .await;
            }
            MessageType::LeaveRoom => {
                let Some(room_id) = frame.room_id else {
                    debug!(session_id = %session.id, "leave_room without room_id");
                    return;
                };
                if self.rooms.leave(&room_id, session.id).await {
                    session.leave_room(&room_id);
                    self.broadcast(
                        &room_id,
                        Frame::member_left(&room_id, &session.user_id),
                        Some(session.id),
                    )
                    .await;
                }
            }
            MessageType::ChatMessage => {
                let Some(room_id) = frame.room_id else {
                    debug!(session_id = %session.id, "chat_message without room_id");
                    return;
                };
                // Re-checked per message: the sender may have left since.
                if !session.in_room(&room_id) {
                    debug!(
                        session_id = %session.id,
                        room_id,
                        "chat_message to room the session is not in"
                    );
                    let _ = session.try_enqueue(Frame::error(ErrorCode::PermissionDenied));
                    return;
                }
                let content = frame.content.unwrap_or(serde_json::Value::Null);
                self.broadcast(
                    &room_id,
                    Frame::chat(&room_id, &session.user_id, content),
                    None,
                )
                .await;
            }
            MessageType::TypingStart | MessageType::TypingStop => {
                let Some(room_id) = frame.room_id else {
                    return;
                };
                if session.in_room(&room_id) {
                    self.broadcast(
                        &room_id,
                        Frame::typing(frame.kind, &room_id, &session.user_id),
                        Some(session.id),
                    )
                    .await;
                }
            }
            MessageType::Ping => {
                if session.try_enqueue(Frame::pong()) == Err(EnqueueError::Full) {
                    self.disconnect(session, DisconnectReason::QueueOverflow).await;
                }
            }
            other => {
                warn!(session_id = %session.id, kind = ?other, "ignoring unexpected message type");
            }
        }
    }

    /// Background liveness sweep: disconnects sessions whose last-seen
    /// timestamp exceeds the configured timeout.
    pub async fn run_sweeper(self: Arc<Self>, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.sweep_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    let stale: Vec<Arc<Session>> = {
                        let table = self.table.read().await;
                        table
                            .by_id
                            .values()
                            .filter(|s| s.idle_for() > self.config.pong_timeout)
                            .cloned()
                            .collect()
                    };
                    for session in stale {
                        debug!(session_id = %session.id, "liveness sweep disconnecting idle session");
                        self.disconnect(&session, DisconnectReason::HeartbeatTimeout).await;
                    }
                }
            }
        }
    }

    /// Force-disconnects every session; used on server shutdown.
    pub async fn shutdown_all(&self) {
        let sessions: Vec<Arc<Session>> = {
            let table = self.table.read().await;
            table.by_id.values().cloned().collect()
        };
        for session in sessions {
            self.disconnect(&session, DisconnectReason::Shutdown).await;
        }
    }

    pub async fn session_count(&self) -> usize {
        self.table.read().await.by_id.len()
    }

    pub async fn user_session_count(&self, user_id: &str) -> usize {
        self.table
            .read()
            .await
            .per_user
            .get(user_id)
            .copied()
            .unwrap_or(0)
    }

    pub fn rooms(&self) -> &RoomRegistry {
        &self.rooms
    }
}
