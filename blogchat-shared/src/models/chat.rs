use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

/// Display priority of a message. Encoded on the wire as `0` or `1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum MessagePriority {
    /// Regular message.
    #[default]
    Normal,
    /// Pinned above regular messages.
    Pinned,
}

impl From<MessagePriority> for u8 {
    fn from(value: MessagePriority) -> Self {
        match value {
            MessagePriority::Normal => 0,
            MessagePriority::Pinned => 1,
        }
    }
}

impl TryFrom<u8> for MessagePriority {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Normal),
            1 => Ok(Self::Pinned),
            other => Err(format!("invalid priority {other}; expected 0 or 1")),
        }
    }
}

/// Where a broadcast is shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BroadcastTarget {
    /// Only the live chat stream.
    Chat,
    /// Only the blog's announcement panel.
    Announcement,
    /// Both surfaces.
    #[default]
    Both,
}

impl BroadcastTarget {
    /// Lower-case wire and storage name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Chat => "chat",
            Self::Announcement => "announcement",
            Self::Both => "both",
        }
    }

    /// Whether messages with this target belong in the live chat stream.
    #[must_use]
    pub const fn reaches_chat(self) -> bool {
        matches!(self, Self::Chat | Self::Both)
    }

    /// Whether messages with this target show up as announcements.
    #[must_use]
    pub const fn reaches_announcements(self) -> bool {
        matches!(self, Self::Announcement | Self::Both)
    }
}

impl fmt::Display for BroadcastTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BroadcastTarget {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "chat" => Ok(Self::Chat),
            "announcement" => Ok(Self::Announcement),
            "both" => Ok(Self::Both),
            other => Err(format!(
                "invalid target '{other}'; expected chat, announcement or both"
            )),
        }
    }
}

/// Moderation status. Encoded on the wire as `1` (visible) or `0` (deleted).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum MessageStatus {
    /// Soft-deleted by a moderator.
    Deleted,
    /// Shown to everyone.
    #[default]
    Visible,
}

impl From<MessageStatus> for u8 {
    fn from(value: MessageStatus) -> Self {
        match value {
            MessageStatus::Deleted => 0,
            MessageStatus::Visible => 1,
        }
    }
}

impl TryFrom<u8> for MessageStatus {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Deleted),
            1 => Ok(Self::Visible),
            other => Err(format!("invalid status {other}; expected 0 or 1")),
        }
    }
}

/// A persisted chat message or broadcast, as sent to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ChatMessage {
    pub id: i64,
    pub content: String,
    /// Author's account id; `None` for anonymous visitors and system broadcasts.
    pub user_id: Option<i64>,
    pub username: String,
    #[serde(default)]
    pub avatar: String,
    /// Source address. Only populated on moderator views.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    /// Live connection that sent the message. `None` in history and listings.
    #[serde(default)]
    pub client_id: Option<Uuid>,
    #[schema(value_type = u8)]
    pub priority: MessagePriority,
    #[schema(value_type = String)]
    pub target: BroadcastTarget,
    pub is_broadcast: bool,
    #[schema(value_type = u8)]
    pub status: MessageStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ChatMessage {
    /// Copy without the source address, for public surfaces.
    #[must_use]
    pub fn redacted(mut self) -> Self {
        self.ip = None;
        self
    }

    /// Whether the message is part of the live chat stream (user messages
    /// and broadcasts targeting chat).
    #[must_use]
    pub const fn in_chat_stream(&self) -> bool {
        !self.is_broadcast || self.target.reaches_chat()
    }

    /// Whether the message is a visible announcement.
    #[must_use]
    pub fn is_announcement(&self) -> bool {
        self.is_broadcast
            && self.target.reaches_announcements()
            && self.status == MessageStatus::Visible
    }
}

/// Fields supplied when appending a message; the store assigns id,
/// status and timestamps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewChatMessage {
    pub content: String,
    pub user_id: Option<i64>,
    pub username: String,
    pub avatar: String,
    pub ip: Option<String>,
    pub priority: MessagePriority,
    pub target: BroadcastTarget,
    pub is_broadcast: bool,
}

impl NewChatMessage {
    /// A regular chat message typed by a user.
    #[must_use]
    pub fn user_message(
        content: impl Into<String>,
        user_id: Option<i64>,
        username: impl Into<String>,
        avatar: impl Into<String>,
        ip: Option<String>,
    ) -> Self {
        Self {
            content: content.into(),
            user_id,
            username: username.into(),
            avatar: avatar.into(),
            ip,
            priority: MessagePriority::Normal,
            target: BroadcastTarget::Chat,
            is_broadcast: false,
        }
    }

    /// A moderator broadcast.
    #[must_use]
    pub fn broadcast(
        content: impl Into<String>,
        username: impl Into<String>,
        priority: MessagePriority,
        target: BroadcastTarget,
    ) -> Self {
        Self {
            content: content.into(),
            user_id: None,
            username: username.into(),
            avatar: String::new(),
            ip: None,
            priority,
            target,
            is_broadcast: true,
        }
    }

    /// The visible row this message becomes once stored under `id` at `now`.
    #[must_use]
    pub fn into_message(self, id: i64, now: DateTime<Utc>) -> ChatMessage {
        ChatMessage {
            id,
            content: self.content,
            user_id: self.user_id,
            username: self.username,
            avatar: self.avatar,
            ip: self.ip,
            client_id: None,
            priority: self.priority,
            target: self.target,
            is_broadcast: self.is_broadcast,
            status: MessageStatus::Visible,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A connected participant as shown in rosters and join/leave events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct UserInfo {
    /// Connection id.
    pub id: Uuid,
    pub username: String,
    #[serde(default)]
    pub avatar: String,
}

/// Page selection shared by every listing endpoint.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, IntoParams)]
pub struct PageQuery {
    /// 1-based page number.
    pub page: Option<u32>,
    /// Rows per page, 1 to 100.
    pub page_size: Option<u32>,
}

/// Largest page size accepted by listing endpoints.
pub const MAX_PAGE_SIZE: u32 = 100;

impl PageQuery {
    /// Resolves `(page, page_size)`, falling back to page 1 and
    /// `default_size` for missing or out-of-range values.
    #[must_use]
    pub fn resolve(&self, default_size: u32) -> (u32, u32) {
        let page = self.page.filter(|page| *page >= 1).unwrap_or(1);
        let page_size = self
            .page_size
            .filter(|size| (1..=MAX_PAGE_SIZE).contains(size))
            .unwrap_or(default_size);
        (page, page_size)
    }
}

/// One page of results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Page<T> {
    pub list: Vec<T>,
    pub total: u64,
    pub page: u32,
    pub page_size: u32,
}

/// Presence summary for the chat widget.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct OnlineInfo {
    /// Distinct people online.
    pub online_count: usize,
    pub online_users: Vec<UserInfo>,
}

/// Room-wide chat settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
pub struct ChatSettings {
    /// When set, only moderators may post.
    pub mute_all: bool,
}

/// Moderator broadcast request.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct BroadcastRequest {
    pub content: String,
    /// `0` normal, `1` pinned. Defaults to normal.
    #[serde(default)]
    pub priority: Option<u8>,
    /// `chat`, `announcement` or `both`. Defaults to both.
    #[serde(default)]
    pub target: Option<String>,
}

/// Kick a live connection.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct KickRequest {
    pub client_id: Uuid,
    #[serde(default)]
    pub reason: Option<String>,
}

/// Ban the address behind a live connection, then kick it.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct BanClientRequest {
    pub client_id: Uuid,
    #[serde(default)]
    pub reason: Option<String>,
    /// Hours; `0` or absent bans permanently.
    #[serde(default)]
    pub duration: Option<u32>,
}

/// Result of a ban-by-connection request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct BanClientResponse {
    pub ip: String,
}

/// Announcement listing parameters.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, IntoParams)]
pub struct AnnouncementQuery {
    /// Defaults to 3, capped at 20.
    pub limit: Option<u32>,
}

impl AnnouncementQuery {
    /// Effective limit.
    #[must_use]
    pub fn resolve(&self) -> u32 {
        match self.limit {
            Some(limit) if limit >= 1 => limit.min(20),
            _ => 3,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn priority_and_status_use_integer_encoding() {
        assert_eq!(serde_json::to_value(MessagePriority::Pinned).unwrap(), json!(1));
        assert_eq!(serde_json::to_value(MessageStatus::Deleted).unwrap(), json!(0));
        assert_eq!(
            serde_json::from_value::<MessageStatus>(json!(1)).unwrap(),
            MessageStatus::Visible
        );
        assert!(serde_json::from_value::<MessagePriority>(json!(7)).is_err());
    }

    #[test]
    fn target_parses_known_values_only() {
        assert_eq!("chat".parse::<BroadcastTarget>(), Ok(BroadcastTarget::Chat));
        assert_eq!(
            "announcement".parse::<BroadcastTarget>(),
            Ok(BroadcastTarget::Announcement)
        );
        assert!("everyone".parse::<BroadcastTarget>().is_err());
        assert!(BroadcastTarget::Both.reaches_chat());
        assert!(!BroadcastTarget::Announcement.reaches_chat());
    }

    #[test]
    fn page_query_falls_back_on_out_of_range_values() {
        let query = PageQuery {
            page: Some(0),
            page_size: Some(500),
        };
        assert_eq!(query.resolve(50), (1, 50));

        let query = PageQuery {
            page: Some(3),
            page_size: Some(10),
        };
        assert_eq!(query.resolve(50), (3, 10));
        assert_eq!(PageQuery::default().resolve(20), (1, 20));
    }

    #[test]
    fn announcement_limit_is_capped() {
        assert_eq!(AnnouncementQuery { limit: None }.resolve(), 3);
        assert_eq!(AnnouncementQuery { limit: Some(0) }.resolve(), 3);
        assert_eq!(AnnouncementQuery { limit: Some(99) }.resolve(), 20);
    }

    #[test]
    fn redacted_message_omits_ip() {
        let now = Utc::now();
        let message = ChatMessage {
            id: 1,
            content: "hi".into(),
            user_id: None,
            username: "guest-1".into(),
            avatar: String::new(),
            ip: Some("203.0.113.9".into()),
            client_id: None,
            priority: MessagePriority::Normal,
            target: BroadcastTarget::Chat,
            is_broadcast: false,
            status: MessageStatus::Visible,
            created_at: now,
            updated_at: now,
        };

        let value = serde_json::to_value(message.redacted()).unwrap();
        assert!(value.get("ip").is_none());
        assert_eq!(value["target"], "chat");
        assert_eq!(value["status"], 1);
    }
}
