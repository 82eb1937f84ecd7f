//! Connection manager: persistent socket sessions, rooms, routing and
//! broadcast.
//!
//! Each session runs exactly two workers, a reader and a writer, that
//! communicate only through the session's bounded outbound queue and its
//! cancellation token. Room membership lives in an owned registry keyed by
//! opaque IDs; no session holds a reference into another session's state.

mod frame;
mod hub;
mod room;
mod session;
mod worker;

pub use frame::{Frame, MessageType};
pub use hub::ConnectionHub;
pub use room::RoomRegistry;
pub use session::{DisconnectReason, RoomId, Session, SessionId};
pub use worker::{run_reader, run_writer};
