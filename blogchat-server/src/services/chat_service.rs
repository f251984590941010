//! Chat moderation service layer.
//!
//! Operations that combine the store with the live hub: system broadcasts,
//! kicks, bans by connection, soft deletes and room settings.

use std::sync::Arc;

use metrics::counter;
use shared::models::{
    BanClientRequest, BanClientResponse, BanKind, BroadcastRequest, BroadcastTarget, ChatMessage,
    ChatSettings, FramePayload, KickRequest, MessagePriority, NewChatMessage, NewIpBan, OnlineInfo,
    Page, ServerFrame, SystemPayload,
};
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use crate::{
    chat::{Hub, HubError},
    services::clock::{Clock, expiry_after},
    store::{StoreError, Stores},
};

/// Display name of moderator broadcasts.
pub const SYSTEM_USERNAME: &str = "System";
pub const DEFAULT_KICK_REASON: &str = "violated chat rules";
pub const DEFAULT_BAN_REASON: &str = "banned by a moderator";

#[derive(Debug, Error)]
pub enum ChatServiceError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    NotFound(String),
    #[error(transparent)]
    Hub(#[from] HubError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type ChatServiceResult<T> = Result<T, ChatServiceError>;

/// Service for moderator and read operations on the chat room.
#[derive(Debug, Clone)]
pub struct ChatService {
    hub: Arc<Hub>,
    stores: Stores,
    clock: Arc<dyn Clock>,
}

impl ChatService {
    pub fn new(hub: Arc<Hub>, stores: Stores, clock: Arc<dyn Clock>) -> Self {
        Self { hub, stores, clock }
    }

    /// Persists a system broadcast and pushes it to the room when its target
    /// includes the chat stream.
    ///
    /// # Errors
    /// Returns [`ChatServiceError::Validation`] for empty content or an
    /// unknown target, and [`HubError::PayloadTooLarge`] before anything is
    /// stored when the frame would exceed the hub's size cap. A failed insert
    /// aborts the broadcast.
    pub async fn post_broadcast(&self, request: BroadcastRequest) -> ChatServiceResult<ChatMessage> {
        let content = request.content.trim();
        if content.is_empty() {
            return Err(ChatServiceError::Validation(
                "message content must not be empty".to_string(),
            ));
        }

        let target = match request.target.as_deref().map(str::trim) {
            None | Some("") => BroadcastTarget::Both,
            Some(raw) => raw
                .to_ascii_lowercase()
                .parse()
                .map_err(ChatServiceError::Validation)?,
        };
        let priority = match request.priority {
            Some(1) => MessagePriority::Pinned,
            _ => MessagePriority::Normal,
        };

        let draft = NewChatMessage::broadcast(content, SYSTEM_USERNAME, priority, target);
        if target.reaches_chat() {
            // Sized with the widest id so the stored frame can only be smaller.
            let preview = draft.clone().into_message(i64::MAX, self.clock.now());
            self.hub.ensure_fits(&system_frame(preview))?;
        }

        let stored = self.stores.chat.append(draft).await?;
        counter!("blogchat_system_broadcasts_total", "target" => target.as_str()).increment(1);

        if target.reaches_chat() {
            self.hub.broadcast_frame(&system_frame(stored.clone())).await?;
        }

        info!(message_id = stored.id, %target, "system broadcast posted");
        Ok(stored)
    }

    pub async fn kick(&self, request: KickRequest) -> ChatServiceResult<()> {
        let reason = non_empty(request.reason).unwrap_or_else(|| DEFAULT_KICK_REASON.to_string());
        if self.hub.kick(request.client_id, &reason).await {
            Ok(())
        } else {
            Err(not_online(request.client_id))
        }
    }

    /// Bans the address behind a live connection and then kicks it.
    ///
    /// # Arguments
    /// * `request` - Connection id, optional reason, and duration in hours
    ///   (`0` or absent bans permanently)
    ///
    /// # Errors
    /// [`ChatServiceError::NotFound`] when the connection is not online.
    pub async fn ban_client(&self, request: BanClientRequest) -> ChatServiceResult<BanClientResponse> {
        let client = self
            .hub
            .get_client(request.client_id)
            .await
            .ok_or_else(|| not_online(request.client_id))?;

        let reason = non_empty(request.reason).unwrap_or_else(|| DEFAULT_BAN_REASON.to_string());
        let expire_at = expiry_after(self.clock.now(), request.duration)
            .map_err(ChatServiceError::Validation)?;

        self.stores
            .bans
            .upsert(NewIpBan {
                ip: client.ip.clone(),
                reason: reason.clone(),
                ban_type: BanKind::Manual,
                expire_at,
            })
            .await?;
        info!(client_id = %client.id, ip = %client.ip, ?expire_at, "banned client address");

        self.hub
            .kick(client.id, &format!("you have been banned: {reason}"))
            .await;
        Ok(BanClientResponse { ip: client.ip })
    }

    pub async fn delete_message(&self, id: i64) -> ChatServiceResult<()> {
        self.stores.chat.soft_delete(id).await.map_err(|err| match err {
            StoreError::NotFound(_) => ChatServiceError::NotFound(format!("message {id} not found")),
            other => ChatServiceError::Store(other),
        })
    }

    pub async fn public_messages(&self, page: u32, page_size: u32) -> ChatServiceResult<Page<ChatMessage>> {
        let mut messages = self.stores.chat.list_public(page, page_size).await?;
        messages.list = messages.list.into_iter().map(ChatMessage::redacted).collect();
        Ok(messages)
    }

    /// Moderator listing; keeps source addresses and deleted rows.
    pub async fn all_messages(&self, page: u32, page_size: u32) -> ChatServiceResult<Page<ChatMessage>> {
        Ok(self.stores.chat.list_all(page, page_size).await?)
    }

    pub async fn online(&self) -> OnlineInfo {
        let online_users = self.hub.online_users().await;
        OnlineInfo {
            online_count: online_users.len(),
            online_users,
        }
    }

    pub async fn announcements(&self, limit: u32) -> ChatServiceResult<Vec<ChatMessage>> {
        let announcements = self.stores.chat.announcements(limit).await?;
        Ok(announcements.into_iter().map(ChatMessage::redacted).collect())
    }

    pub async fn announcement(&self, id: i64) -> ChatServiceResult<ChatMessage> {
        self.stores
            .chat
            .announcement(id)
            .await?
            .map(ChatMessage::redacted)
            .ok_or_else(|| ChatServiceError::NotFound(format!("announcement {id} not found")))
    }

    pub async fn settings(&self) -> ChatServiceResult<ChatSettings> {
        Ok(self.stores.settings.chat_settings().await?)
    }

    pub async fn update_settings(&self, settings: ChatSettings) -> ChatServiceResult<ChatSettings> {
        let updated = self.stores.settings.update_chat_settings(settings).await?;
        info!(mute_all = updated.mute_all, "chat settings updated");
        Ok(updated)
    }
}

fn system_frame(message: ChatMessage) -> ServerFrame {
    ServerFrame::now(FramePayload::System(SystemPayload::Broadcast(message)))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn not_online(id: Uuid) -> ChatServiceError {
    ChatServiceError::NotFound(format!("client {id} is not online"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        chat::ClientInfo,
        services::clock::ManualClock,
        store::{ChatStore, MemoryStore, failing::FailingChatStore},
    };
    use chrono::Duration;
    use serde_json::Value;
    use shared::{config::server::ChatConfig, models::MessageStatus};

    struct Fixture {
        clock: Arc<ManualClock>,
        store: Arc<MemoryStore>,
        hub: Arc<Hub>,
        service: ChatService,
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::default());
        let store = Arc::new(MemoryStore::new(clock.clone()));
        let stores = Stores::from_memory(store.clone());
        let hub = Hub::start(
            ChatConfig {
                kick_grace_ms: 10,
                ..ChatConfig::default()
            },
            stores.chat.clone(),
        );
        let service = ChatService::new(hub.clone(), stores, clock.clone());
        Fixture {
            clock,
            store,
            hub,
            service,
        }
    }

    fn guest(name: &str, ip: &str) -> ClientInfo {
        ClientInfo {
            id: Uuid::new_v4(),
            user_id: None,
            username: name.to_string(),
            avatar: String::new(),
            ip: ip.to_string(),
            role: None,
        }
    }

    fn broadcast(content: &str, target: Option<&str>) -> BroadcastRequest {
        BroadcastRequest {
            content: content.to_string(),
            priority: Some(1),
            target: target.map(str::to_string),
        }
    }

    async fn next_kind(connection: &mut crate::chat::Connection) -> Value {
        let payload = tokio::time::timeout(
            std::time::Duration::from_secs(1),
            connection.outbound.recv(),
        )
        .await
        .unwrap()
        .unwrap();
        serde_json::from_str(payload.as_str()).unwrap()
    }

    #[tokio::test]
    async fn announcement_only_broadcasts_are_stored_but_not_pushed() {
        let f = fixture();
        let mut client = f.hub.register(guest("reader", "192.0.2.1")).await.unwrap();
        for _ in 0..3 {
            next_kind(&mut client).await;
        }

        let stored = f
            .service
            .post_broadcast(broadcast("maintenance tonight", Some("announcement")))
            .await
            .unwrap();
        assert!(stored.is_broadcast);
        assert_eq!(stored.username, SYSTEM_USERNAME);
        assert_eq!(stored.priority, MessagePriority::Pinned);

        f.service
            .post_broadcast(broadcast("welcome", Some(" Chat ")))
            .await
            .unwrap();
        let frame = next_kind(&mut client).await;
        assert_eq!(frame["type"], "system");
        assert_eq!(frame["data"]["content"], "welcome");

        let announcements = f.service.announcements(3).await.unwrap();
        assert_eq!(announcements.len(), 1);
        assert_eq!(announcements[0].content, "maintenance tonight");
        f.hub.shutdown().await;
    }

    #[tokio::test]
    async fn broadcast_validation() {
        let f = fixture();
        assert!(matches!(
            f.service.post_broadcast(broadcast("   ", None)).await,
            Err(ChatServiceError::Validation(_))
        ));
        assert!(matches!(
            f.service.post_broadcast(broadcast("hi", Some("sidebar"))).await,
            Err(ChatServiceError::Validation(_))
        ));
        let stored = f
            .service
            .post_broadcast(BroadcastRequest {
                content: "hi".into(),
                priority: Some(7),
                target: None,
            })
            .await
            .unwrap();
        assert_eq!(stored.target, BroadcastTarget::Both);
        assert_eq!(stored.priority, MessagePriority::Normal);
        f.hub.shutdown().await;
    }

    #[tokio::test]
    async fn oversized_broadcast_is_refused_before_it_is_stored() {
        let f = fixture();
        let huge = "x".repeat(70_000);

        let err = f
            .service
            .post_broadcast(broadcast(&huge, Some("chat")))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ChatServiceError::Hub(HubError::PayloadTooLarge { .. })
        ));
        assert!(f.store.messages().await.is_empty());

        // nothing to replay either
        let mut late = f.hub.register(guest("late", "192.0.2.8")).await.unwrap();
        let history = next_kind(&mut late).await;
        assert_eq!(history["data"], serde_json::json!([]));

        // announcement-only broadcasts never travel through the hub
        f.service
            .post_broadcast(broadcast(&huge, Some("announcement")))
            .await
            .unwrap();
        assert_eq!(f.store.messages().await.len(), 1);
        f.hub.shutdown().await;
    }

    #[tokio::test]
    async fn failed_insert_aborts_the_broadcast() {
        let f = fixture();
        let mut reader = f.hub.register(guest("reader", "192.0.2.3")).await.unwrap();
        for _ in 0..3 {
            next_kind(&mut reader).await;
        }

        let mut stores = Stores::from_memory(f.store.clone());
        stores.chat = Arc::new(FailingChatStore);
        let service = ChatService::new(f.hub.clone(), stores, f.clock.clone());
        assert!(matches!(
            service.post_broadcast(broadcast("hello", Some("chat"))).await,
            Err(ChatServiceError::Store(_))
        ));

        let nothing = tokio::time::timeout(
            std::time::Duration::from_millis(100),
            reader.outbound.recv(),
        )
        .await;
        assert!(nothing.is_err(), "no frame may follow a failed insert");
        f.hub.shutdown().await;
    }

    #[tokio::test]
    async fn ban_duration_beyond_the_calendar_is_rejected() {
        let f = fixture();
        let mut client = f.hub.register(guest("troll", "198.51.100.10")).await.unwrap();
        for _ in 0..3 {
            next_kind(&mut client).await;
        }

        let err = f
            .service
            .ban_client(BanClientRequest {
                client_id: client.info.id,
                reason: None,
                duration: Some(u32::MAX),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ChatServiceError::Validation(_)));
        assert!(f.store.bans().await.is_empty());
        assert_eq!(f.hub.online_count().await, 1);
        f.hub.shutdown().await;
    }

    #[tokio::test]
    async fn kick_unknown_client_is_not_found() {
        let f = fixture();
        let err = f
            .service
            .kick(KickRequest {
                client_id: Uuid::new_v4(),
                reason: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ChatServiceError::NotFound(_)));
        f.hub.shutdown().await;
    }

    #[tokio::test]
    async fn kick_uses_default_reason() {
        let f = fixture();
        let mut client = f.hub.register(guest("noisy", "192.0.2.2")).await.unwrap();
        for _ in 0..3 {
            next_kind(&mut client).await;
        }

        f.service
            .kick(KickRequest {
                client_id: client.info.id,
                reason: Some("  ".into()),
            })
            .await
            .unwrap();
        let frame = next_kind(&mut client).await;
        assert_eq!(frame["data"]["reason"], DEFAULT_KICK_REASON);
        f.hub.shutdown().await;
    }

    #[tokio::test]
    async fn ban_client_upserts_manual_ban_and_kicks() {
        let f = fixture();
        let mut client = f.hub.register(guest("troll", "198.51.100.9")).await.unwrap();
        for _ in 0..3 {
            next_kind(&mut client).await;
        }

        let request = BanClientRequest {
            client_id: client.info.id,
            reason: Some("spam".into()),
            duration: Some(24),
        };
        let response = f.service.ban_client(request.clone()).await.unwrap();
        assert_eq!(response.ip, "198.51.100.9");

        let kick = next_kind(&mut client).await;
        assert_eq!(kick["type"], "kick");
        assert_eq!(kick["data"]["reason"], "you have been banned: spam");

        let bans = f.store.bans().await;
        assert_eq!(bans.len(), 1);
        assert_eq!(bans[0].ban_type, BanKind::Manual);
        assert_eq!(bans[0].expire_at, Some(f.clock.now() + Duration::hours(24)));

        // still online during the grace period: banning again refreshes the row
        let permanent = BanClientRequest {
            duration: Some(0),
            ..request
        };
        f.service.ban_client(permanent).await.unwrap();
        let bans = f.store.bans().await;
        assert_eq!(bans.len(), 1);
        assert_eq!(bans[0].expire_at, None);
        f.hub.shutdown().await;
    }

    #[tokio::test]
    async fn delete_message_is_idempotent_and_reports_unknown_ids() {
        let f = fixture();
        let stored = f
            .store
            .append(NewChatMessage::user_message("oops", None, "a", "", None))
            .await
            .unwrap();

        f.service.delete_message(stored.id).await.unwrap();
        f.service.delete_message(stored.id).await.unwrap();
        assert_eq!(f.store.messages().await[0].status, MessageStatus::Deleted);
        assert!(matches!(
            f.service.delete_message(999).await,
            Err(ChatServiceError::NotFound(_))
        ));
        f.hub.shutdown().await;
    }

    #[tokio::test]
    async fn public_listing_hides_addresses() {
        let f = fixture();
        f.store
            .append(NewChatMessage::user_message(
                "hello",
                None,
                "a",
                "",
                Some("203.0.113.4".into()),
            ))
            .await
            .unwrap();

        let public = f.service.public_messages(1, 50).await.unwrap();
        assert_eq!(public.list[0].ip, None);
        let all = f.service.all_messages(1, 20).await.unwrap();
        assert_eq!(all.list[0].ip.as_deref(), Some("203.0.113.4"));
        f.hub.shutdown().await;
    }

    #[tokio::test]
    async fn settings_round_trip_through_the_store() {
        let f = fixture();
        assert!(!f.service.settings().await.unwrap().mute_all);
        f.service
            .update_settings(ChatSettings { mute_all: true })
            .await
            .unwrap();
        assert!(f.service.settings().await.unwrap().mute_all);
        f.hub.shutdown().await;
    }
}
