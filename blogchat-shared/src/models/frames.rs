use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::chat::{ChatMessage, UserInfo};

/// Body of a `system` frame: either a persisted broadcast or a private
/// notice that was never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SystemPayload {
    Broadcast(ChatMessage),
    Notice { message: String },
}

/// Body of a `kick` frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KickNotice {
    pub reason: String,
}

/// Every event the server pushes over the socket, tagged by `type` with its
/// body under `data`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum FramePayload {
    History(Vec<ChatMessage>),
    Message(ChatMessage),
    System(SystemPayload),
    UserJoin(UserInfo),
    UserLeave(UserInfo),
    UserList(Vec<UserInfo>),
    Kick(KickNotice),
}

/// An outbound frame with the server timestamp (unix seconds).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerFrame {
    #[serde(flatten)]
    pub payload: FramePayload,
    pub timestamp: i64,
}

impl ServerFrame {
    /// Stamps `payload` with the current time.
    #[must_use]
    pub fn now(payload: FramePayload) -> Self {
        Self {
            payload,
            timestamp: Utc::now().timestamp(),
        }
    }

    /// Short name of the frame type, as written in the `type` field.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self.payload {
            FramePayload::History(_) => "history",
            FramePayload::Message(_) => "message",
            FramePayload::System(_) => "system",
            FramePayload::UserJoin(_) => "user_join",
            FramePayload::UserLeave(_) => "user_leave",
            FramePayload::UserList(_) => "user_list",
            FramePayload::Kick(_) => "kick",
        }
    }
}

/// Frames accepted from clients. Anything that does not parse is ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Message { content: String },
}
