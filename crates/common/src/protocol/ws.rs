// WebSocket frame types for the classroom messaging protocol.
//
// One JSON object per logical event, tagged by `type`. Client frames flow
// client -> server; server frames flow server -> client.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{ChatMessage, Role};

/// Frames a client may send after the connection is authenticated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Join a classroom room (explicit multi-room mode).
    JoinRoom { classroom_id: Uuid },

    /// Leave a previously joined room.
    LeaveRoom { classroom_id: Uuid },

    /// Send a chat message to a joined room. `classroom_id` may be omitted
    /// on connections bound to a room at connect time.
    SendMessage {
        #[serde(skip_serializing_if = "Option::is_none", default)]
        classroom_id: Option<Uuid>,
        content: String,
    },

    /// Edit one of the caller's own messages.
    EditMessage { message_id: Uuid, content: String },

    /// Delete a message (author, or any facilitator in the room).
    DeleteMessage { message_id: Uuid },

    /// Fetch a page of message history for a joined room.
    GetHistory {
        classroom_id: Uuid,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        limit: Option<i64>,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        before: Option<DateTime<Utc>>,
    },
}

/// A room member as reported in `joined_room` replies.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoomUser {
    pub id: Uuid,
    pub name: String,
    pub role: Role,
}

/// Frames the server sends to clients.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Handshake succeeded; sent once, before anything else.
    AuthSuccess { user_id: Uuid, user_name: String, role: Role },

    /// A page of history, oldest first. Sent during bring-up and in reply
    /// to `get_history`; never broadcast.
    MessageHistory { messages: Vec<ChatMessage> },

    /// A newly persisted message, broadcast to the whole room including
    /// the sender.
    NewMessage {
        #[serde(flatten)]
        message: ChatMessage,
    },

    /// An edited message, broadcast to the room.
    MessageEdited {
        id: Uuid,
        content: String,
        edited: bool,
        user_id: Uuid,
        user_name: String,
    },

    /// A soft-deleted message, broadcast to the room. Content is never
    /// echoed back.
    MessageDeleted { message_id: Uuid },

    /// Presence: a participant joined the room (not sent to the joiner).
    UserJoined {
        user_id: Uuid,
        user_name: String,
        role: Role,
        classroom_id: Uuid,
        timestamp: DateTime<Utc>,
    },

    /// Presence: a participant left the room or disconnected.
    UserLeft {
        user_id: Uuid,
        user_name: String,
        role: Role,
        classroom_id: Uuid,
        timestamp: DateTime<Utc>,
    },

    /// Confirmation to the joining connection, with the current member list.
    JoinedRoom { classroom_id: Uuid, users: Vec<RoomUser> },

    /// Confirmation to the leaving connection.
    LeftRoom { classroom_id: Uuid },

    /// Server -> client error. The connection stays open unless the server
    /// is tearing it down.
    Error { message: String, timestamp: DateTime<Utc> },
}

impl ServerFrame {
    /// Build an `error` frame stamped with the current time.
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error { message: message.into(), timestamp: Utc::now() }
    }
}

/// Every `type` tag a client may send. Kept in sync with [`ClientFrame`]
/// so decode failures can distinguish an unknown type from corrupt JSON.
pub const CLIENT_FRAME_TYPES: &[&str] = &[
    "join_room",
    "leave_room",
    "send_message",
    "edit_message",
    "delete_message",
    "get_history",
];

/// Why a client frame failed to decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeFailure {
    /// Not valid JSON, or a recognized frame with a bad payload.
    Malformed,
    /// Well-formed JSON whose `type` tag is not in the protocol.
    UnknownType,
}

/// Classify a frame that [`decode_client_frame`] rejected. Unknown types
/// get their own error reply so clients can tell a protocol-version
/// mismatch from corrupt input.
pub fn classify_decode_failure(raw: &str) -> DecodeFailure {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(raw) else {
        return DecodeFailure::Malformed;
    };
    match value.get("type").and_then(serde_json::Value::as_str) {
        Some(kind) if !CLIENT_FRAME_TYPES.contains(&kind) => DecodeFailure::UnknownType,
        _ => DecodeFailure::Malformed,
    }
}

pub fn decode_client_frame(raw: &str) -> Result<ClientFrame, serde_json::Error> {
    serde_json::from_str::<ClientFrame>(raw)
}

pub fn encode_server_frame(frame: &ServerFrame) -> Result<String, serde_json::Error> {
    serde_json::to_string(frame)
}
