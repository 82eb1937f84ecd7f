//! Gateway core metrics.

use prometheus::{Counter, CounterVec, Gauge, Opts, Registry};

/// Counters and gauges for the connection/session core.
pub struct GatewayMetrics {
    /// Currently connected socket sessions
    pub active_sessions: Gauge,
    /// Session outcomes by disconnect reason
    pub session_closed: CounterVec,
    /// Upgrade rejections by error code
    pub admission_rejections: CounterVec,
    /// Broadcast frames dropped because a member queue was full
    pub broadcast_dropped: Counter,
    /// Rate limit decisions by outcome
    pub rate_limit_decisions: CounterVec,
    /// Credential validation failures by code
    pub auth_failures: CounterVec,
    /// Currently open streaming sessions
    pub active_streams: Gauge,
    /// Stream terminations by kind (completed, cancelled, internal)
    pub stream_closed: CounterVec,
}

impl GatewayMetrics {
    /// Creates and registers the gateway metrics.
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let active_sessions = Gauge::with_opts(
            Opts::new("active_sessions", "Currently connected socket sessions")
                .namespace("gateway_core"),
        )?;
        registry.register(Box::new(active_sessions.clone()))?;

        let session_closed = CounterVec::new(
            Opts::new("sessions_closed_total", "Closed sessions by reason")
                .namespace("gateway_core"),
            &["reason"],
        )?;
        registry.register(Box::new(session_closed.clone()))?;

        let admission_rejections = CounterVec::new(
            Opts::new("admission_rejections_total", "Rejected upgrades by code")
                .namespace("gateway_core"),
            &["code"],
        )?;
        registry.register(Box::new(admission_rejections.clone()))?;

        let broadcast_dropped = Counter::with_opts(
            Opts::new(
                "broadcast_dropped_total",
                "Broadcast frames dropped due to a full member queue",
            )
            .namespace("gateway_core"),
        )?;
        registry.register(Box::new(broadcast_dropped.clone()))?;

        let rate_limit_decisions = CounterVec::new(
            Opts::new("rate_limit_decisions_total", "Rate limit decisions")
                .namespace("gateway_core"),
            &["outcome"],
        )?;
        registry.register(Box::new(rate_limit_decisions.clone()))?;

        let auth_failures = CounterVec::new(
            Opts::new("auth_failures_total", "Credential validation failures")
                .namespace("gateway_core"),
            &["code"],
        )?;
        registry.register(Box::new(auth_failures.clone()))?;

        let active_streams = Gauge::with_opts(
            Opts::new("active_streams", "Currently open streaming sessions")
                .namespace("gateway_core"),
        )?;
        registry.register(Box::new(active_streams.clone()))?;

        let stream_closed = CounterVec::new(
            Opts::new("streams_closed_total", "Stream terminations by kind")
                .namespace("gateway_core"),
            &["kind"],
        )?;
        registry.register(Box::new(stream_closed.clone()))?;

        Ok(Self {
            active_sessions,
            session_closed,
            admission_rejections,
            broadcast_dropped,
            rate_limit_decisions,
            auth_failures,
            active_streams,
            stream_closed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registers_without_collision() {
        let registry = Registry::new();
        let metrics = GatewayMetrics::new(&registry).unwrap();
        metrics.active_sessions.inc();
        metrics.session_closed.with_label_values(&["client"]).inc();
        let families = registry.gather();
        assert!(families
            .iter()
            .any(|f| f.get_name() == "gateway_core_active_sessions"));
    }
}
