//! Streaming session service: bidirectional conversation streams and
//! server-streaming synthesis over the RPC transport.
//!
//! Independent transport from the socket proxy, same authentication and
//! authorization inputs. Credentials arrive as call metadata and are
//! validated once per stream at open.

mod engine;
mod frames;
mod registry;
mod service;

pub use engine::EchoEngine;
pub use frames::{
    client_frame, server_frame, ClientFrame, ControlSignal, ServerFrame, SessionConfig,
    SynthesizeChunk, SynthesizeRequest,
};
pub use registry::{StreamContext, StreamGuard, StreamId, StreamRegistry};
pub use service::{bearer_from_metadata, MediaEngine, StreamingSessionService};
