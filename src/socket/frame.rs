use crate::error::ErrorCode;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Declared message types on the socket protocol. Unknown inbound types
/// deserialize to [`MessageType::Unknown`] and are logged and ignored,
/// never treated as fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    JoinRoom,
    LeaveRoom,
    ChatMessage,
    TypingStart,
    TypingStop,
    Ping,
    // server -> client
    Welcome,
    Pong,
    MemberJoined,
    MemberLeft,
    Error,
    #[serde(other)]
    Unknown,
}

/// One JSON frame on the socket protocol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    #[serde(rename = "type")]
    pub kind: MessageType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<serde_json::Value>,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, String>>,
}

impl Frame {
    fn new(kind: MessageType) -> Self {
        Frame {
            kind,
            room_id: None,
            user_id: None,
            content: None,
            timestamp: Utc::now(),
            metadata: None,
        }
    }

    /// First frame queued after a successful upgrade.
    pub fn welcome(session_id: &str) -> Self {
        let mut frame = Frame::new(MessageType::Welcome);
        frame.content = Some(serde_json::json!({ "session_id": session_id }));
        frame
    }

    pub fn pong() -> Self {
        Frame::new(MessageType::Pong)
    }

    pub fn member_joined(room_id: &str, user_id: &str) -> Self {
        let mut frame = Frame::new(MessageType::MemberJoined);
        frame.room_id = Some(room_id.to_string());
        frame.user_id = Some(user_id.to_string());
        frame
    }

    pub fn member_left(room_id: &str, user_id: &str) -> Self {
        let mut frame = Frame::new(MessageType::MemberLeft);
        frame.room_id = Some(room_id.to_string());
        frame.user_id = Some(user_id.to_string());
        frame
    }

    pub fn chat(room_id: &str, user_id: &str, content: serde_json::Value) -> Self {
        let mut frame = Frame::new(MessageType::ChatMessage);
        frame.room_id = Some(room_id.to_string());
        frame.user_id = Some(user_id.to_string());
        frame.content = Some(content);
        frame
    }

    pub fn typing(kind: MessageType, room_id: &str, user_id: &str) -> Self {
        let mut frame = Frame::new(kind);
        frame.room_id = Some(room_id.to_string());
        frame.user_id = Some(user_id.to_string());
        frame
    }

    /// Category-only error notice.
    pub fn error(code: ErrorCode) -> Self {
        let mut frame = Frame::new(MessageType::Error);
        frame.content = Some(serde_json::json!({ "code": code.as_str() }));
        frame
    }
}
