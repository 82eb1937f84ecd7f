//! Tracing subscriber initialization.
//!
//! Diagnostics (full validation failure detail, dropped broadcasts, store
//! outages) go through `tracing`; external callers only ever see error
//! categories.

use tracing_subscriber::{fmt, EnvFilter};

/// Initializes the global tracing subscriber.
///
/// `RUST_LOG` controls filtering; defaults to `info` for the crate and
/// `warn` elsewhere. Set `json` for machine-readable output in deployment.
pub fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,gateway_core=info"));

    if json {
        fmt()
            .with_env_filter(filter)
            .json()
            .with_current_span(true)
            .init();
    } else {
        fmt().with_env_filter(filter).init();
    }
}
