use crate::observability::GatewayMetrics;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

pub type StreamId = Uuid;

/// One active streaming call. Registered at stream open, removed when the
/// call ends.
#[derive(Debug, Clone)]
pub struct StreamContext {
    pub stream_id: StreamId,
    pub user_id: String,
    pub started_at: DateTime<Utc>,
}

/// Registry of in-flight streams.
///
/// Deregistration happens in [`StreamGuard::drop`], so completion, error
/// and peer cancellation all converge on the same cleanup whether or not
/// the handler task ran to its end.
pub struct StreamRegistry {
    streams: RwLock<HashMap<StreamId, StreamContext>>,
    metrics: Arc<GatewayMetrics>,
}

impl StreamRegistry {
    pub fn new(metrics: Arc<GatewayMetrics>) -> Arc<Self> {
        Arc::new(StreamRegistry {
            streams: RwLock::new(HashMap::new()),
            metrics,
        })
    }

    pub fn register(self: &Arc<Self>, user_id: &str) -> StreamGuard {
        let context = StreamContext {
            stream_id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            started_at: Utc::now(),
        };
        let stream_id = context.stream_id;
        self.streams.write().insert(stream_id, context);
        self.metrics.active_streams.inc();
        StreamGuard {
            registry: self.clone(),
            stream_id,
            outcome: parking_lot::Mutex::new(StreamOutcome::Cancelled),
        }
    }

    pub fn active(&self) -> usize {
        self.streams.read().len()
    }

    pub fn context(&self, stream_id: StreamId) -> Option<StreamContext> {
        self.streams.read().get(&stream_id).cloned()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamOutcome {
    Completed,
    Failed,
    /// Default: a guard dropped without an explicit outcome means the
    /// handler was torn down mid-flight by the peer going away.
    Cancelled,
}

impl StreamOutcome {
    fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

/// RAII handle for one registered stream.
pub struct StreamGuard {
    registry: Arc<StreamRegistry>,
    pub stream_id: StreamId,
    outcome: parking_lot::Mutex<StreamOutcome>,
}

impl StreamGuard {
    pub fn complete(&self) {
        *self.outcome.lock() = StreamOutcome::Completed;
    }

    pub fn fail(&self) {
        *self.outcome.lock() = StreamOutcome::Failed;
    }
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        self.registry.streams.write().remove(&self.stream_id);
        self.registry.metrics.active_streams.dec();
        let outcome = *self.outcome.lock();
        self.registry
            .metrics
            .stream_closed
            .with_label_values(&[outcome.as_str()])
            .inc();
        debug!(stream_id = %self.stream_id, outcome = outcome.as_str(), "stream deregistered");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus::Registry;

    fn registry() -> Arc<StreamRegistry> {
        let metrics = Arc::new(GatewayMetrics::new(&Registry::new()).unwrap());
        StreamRegistry::new(metrics)
    }

    #[test]
    fn guard_drop_deregisters() {
        let registry = registry();
        let guard = registry.register("user-1");
        assert_eq!(registry.active(), 1);
        assert!(registry.context(guard.stream_id).is_some());
        drop(guard);
        assert_eq!(registry.active(), 0);
    }

    #[test]
    fn concurrent_streams_are_independent() {
        let registry = registry();
        let a = registry.register("user-1");
        let b = registry.register("user-1");
        assert_eq!(registry.active(), 2);
        drop(a);
        assert_eq!(registry.active(), 1);
        assert!(registry.context(b.stream_id).is_some());
    }
}
