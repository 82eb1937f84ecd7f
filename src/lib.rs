//! Gateway connection and session core.
//!
//! Authenticates every inbound call, authorizes it against role/group
//! policy, throttles abusive traffic, and manages long-lived bidirectional
//! sessions over two transports: a JSON socket protocol and a streaming
//! RPC protocol. Business semantics, persistence and key management live
//! in external collaborators.

pub mod auth;
pub mod authz;
pub mod config;
pub mod edge;
pub mod error;
pub mod observability;
pub mod rate_limit;
pub mod shutdown;
pub mod socket;
pub mod streaming;

pub use config::Config;
pub use error::{ErrorCode, GatewayError};
