use crate::auth::Principal;
use crate::error::GatewayError;
use crate::socket::Frame;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::{SendTimeoutError, TrySendError};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub type SessionId = Uuid;
pub type RoomId = String;

/// Why a session left the `Active` state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// Client-initiated close
    Client,
    /// Read error on the transport
    ReadError,
    /// Write error on the transport
    WriteError,
    /// No frame seen within the liveness timeout
    HeartbeatTimeout,
    /// Forced server shutdown
    Shutdown,
    /// The session's own outbound queue overflowed
    QueueOverflow,
    /// A point-to-point send exceeded the bounded wait
    SendTimeout,
}

impl DisconnectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Client => "client",
            Self::ReadError => "read_error",
            Self::WriteError => "write_error",
            Self::HeartbeatTimeout => "heartbeat_timeout",
            Self::Shutdown => "shutdown",
            Self::QueueOverflow => "queue_overflow",
            Self::SendTimeout => "send_timeout",
        }
    }
}

/// Enqueue failure on the bounded outbound queue.
#[derive(Debug, PartialEq, Eq)]
pub enum EnqueueError {
    /// Queue at capacity; the broadcaster skips this member.
    Full,
    /// Writer gone; the session is tearing down.
    Closed,
}

/// One persistent client session.
///
/// Mutated only by its own reader/writer workers and the room broadcaster.
/// Teardown runs exactly once: the `connected` flag is read-and-cleared
/// atomically and every cleanup path goes through that gate.
#[derive(Debug)]
pub struct Session {
    pub id: SessionId,
    pub user_id: String,
    pub principal: Principal,
    outbound: mpsc::Sender<Frame>,
    rooms: Mutex<HashSet<RoomId>>,
    /// Unix millis of the last frame seen from the peer.
    last_seen: AtomicI64,
    connected: AtomicBool,
    cancel: CancellationToken,
}

impl Session {
    /// Creates the session and hands back the receiver half of its bounded
    /// outbound queue for the writer worker.
    pub fn new(principal: Principal, queue_capacity: usize) -> (std::sync::Arc<Self>, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(queue_capacity);
        let session = Session {
            id: Uuid::new_v4(),
            user_id: principal.user_id.clone(),
            principal,
            outbound: tx,
            rooms: Mutex::new(HashSet::new()),
            last_seen: AtomicI64::new(chrono::Utc::now().timestamp_millis()),
            connected: AtomicBool::new(true),
            cancel: CancellationToken::new(),
        };
        (std::sync::Arc::new(session), rx)
    }

    /// Non-blocking enqueue. Used by the room broadcaster: a full queue is
    /// the receiver's problem, never the broadcaster's.
    pub fn try_enqueue(&self, frame: Frame) -> Result<(), EnqueueError> {
        self.outbound.try_send(frame).map_err(|e| match e {
            TrySendError::Full(_) => EnqueueError::Full,
            TrySendError::Closed(_) => EnqueueError::Closed,
        })
    }

    /// Point-to-point enqueue with a bounded wait. A timeout means the peer
    /// is unresponsive and the caller should disconnect it.
    pub async fn enqueue_within(
        &self,
        frame: Frame,
        wait: Duration,
    ) -> Result<(), GatewayError> {
        self.outbound
            .send_timeout(frame, wait)
            .await
            .map_err(|e| match e {
                SendTimeoutError::Timeout(_) => GatewayError::SendTimeout { waited: wait },
                SendTimeoutError::Closed(_) => GatewayError::SendTimeout { waited: wait },
            })
    }

    /// Stamps the liveness clock. Called by the reader for every inbound
    /// frame, pongs included.
    pub fn touch(&self) {
        self.last_seen
            .store(chrono::Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    /// How long since the peer was last seen.
    pub fn idle_for(&self) -> Duration {
        let last = self.last_seen.load(Ordering::Relaxed);
        let now = chrono::Utc::now().timestamp_millis();
        Duration::from_millis((now - last).max(0) as u64)
    }

    /// Claims the right to run teardown. Returns `true` exactly once no
    /// matter how many triggers race here.
    pub fn begin_disconnect(&self) -> bool {
        self.connected.swap(false, Ordering::SeqCst)
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn join_room(&self, room_id: &str) {
        self.rooms.lock().insert(room_id.to_string());
    }

    pub fn leave_room(&self, room_id: &str) {
        self.rooms.lock().remove(room_id);
    }

    /// Membership re-check, done per message since rooms may be left
    /// between messages.
    pub fn in_room(&self, room_id: &str) -> bool {
        self.rooms.lock().contains(room_id)
    }

    pub fn rooms_snapshot(&self) -> Vec<RoomId> {
        self.rooms.lock().iter().cloned().collect()
    }
}
