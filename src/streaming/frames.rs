//! Wire types for the streaming session protocol.
//!
//! Frames are protobuf messages; the client frame carries a discriminated
//! payload so configuration, media data and control signals travel on one
//! stream. Control frames never carry payload data.

/// Control signals on the bidirectional stream. Idempotent by contract:
/// a duplicate `Stop` is a no-op, never an error.
#[derive(Clone, Copy, Debug, PartialEq, Eq, prost::Enumeration)]
#[repr(i32)]
pub enum ControlSignal {
    Unspecified = 0,
    Start = 1,
    Stop = 2,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct SessionConfig {
    #[prost(string, tag = "1")]
    pub language: String,
    #[prost(string, tag = "2")]
    pub voice: String,
    #[prost(uint32, tag = "3")]
    pub sample_rate_hz: u32,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ClientFrame {
    #[prost(oneof = "client_frame::Payload", tags = "1, 2, 3, 4")]
    pub payload: Option<client_frame::Payload>,
}

pub mod client_frame {
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum Payload {
        #[prost(message, tag = "1")]
        Config(super::SessionConfig),
        #[prost(bytes = "vec", tag = "2")]
        Audio(Vec<u8>),
        #[prost(string, tag = "3")]
        Text(String),
        #[prost(enumeration = "super::ControlSignal", tag = "4")]
        Control(i32),
    }
}

impl ClientFrame {
    pub fn config(config: SessionConfig) -> Self {
        ClientFrame {
            payload: Some(client_frame::Payload::Config(config)),
        }
    }

    pub fn audio(data: Vec<u8>) -> Self {
        ClientFrame {
            payload: Some(client_frame::Payload::Audio(data)),
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        ClientFrame {
            payload: Some(client_frame::Payload::Text(text.into())),
        }
    }

    pub fn control(signal: ControlSignal) -> Self {
        ClientFrame {
            payload: Some(client_frame::Payload::Control(signal as i32)),
        }
    }
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ServerFrame {
    #[prost(oneof = "server_frame::Payload", tags = "1, 2")]
    pub payload: Option<server_frame::Payload>,
}

pub mod server_frame {
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum Payload {
        #[prost(bytes = "vec", tag = "1")]
        Audio(Vec<u8>),
        #[prost(string, tag = "2")]
        Text(String),
    }
}

impl ServerFrame {
    pub fn audio(data: Vec<u8>) -> Self {
        ServerFrame {
            payload: Some(server_frame::Payload::Audio(data)),
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        ServerFrame {
            payload: Some(server_frame::Payload::Text(text.into())),
        }
    }
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct SynthesizeRequest {
    #[prost(string, tag = "1")]
    pub text: String,
    #[prost(string, tag = "2")]
    pub voice: String,
}

/// One chunk of a lazy, finite, non-restartable synthesis sequence.
#[derive(Clone, PartialEq, prost::Message)]
pub struct SynthesizeChunk {
    #[prost(bytes = "vec", tag = "1")]
    pub audio: Vec<u8>,
    #[prost(uint32, tag = "2")]
    pub sequence: u32,
    #[prost(bool, tag = "3")]
    pub last: bool,
}
