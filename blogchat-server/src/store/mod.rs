//! Persistence ports for chat messages, IP bans and room settings.
//!
//! [`PgStore`] backs production; [`MemoryStore`] backs tests and runs without
//! a configured database.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared::models::{
    ChatMessage, ChatSettings, IpAllow, IpBan, NewChatMessage, NewIpAllow, NewIpBan, Page,
};
use sqlx::PgPool;
use thiserror::Error;

use crate::services::clock::Clock;

#[cfg(test)]
pub(crate) mod failing;
pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("{0}")]
    Conflict(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait ChatStore: Send + Sync {
    /// Appends a visible message and returns it with its assigned id.
    async fn append(&self, message: NewChatMessage) -> StoreResult<ChatMessage>;

    /// The newest `limit` visible messages of the chat stream, oldest first.
    async fn recent_chat(&self, limit: usize) -> StoreResult<Vec<ChatMessage>>;

    /// Visible chat-stream messages, newest first.
    async fn list_public(&self, page: u32, page_size: u32) -> StoreResult<Page<ChatMessage>>;

    /// Every message including deleted rows and announcement-only broadcasts,
    /// newest first.
    async fn list_all(&self, page: u32, page_size: u32) -> StoreResult<Page<ChatMessage>>;

    /// Marks a message deleted. Deleting twice succeeds; an unknown id is
    /// [`StoreError::NotFound`].
    async fn soft_delete(&self, id: i64) -> StoreResult<()>;

    /// Visible announcements ordered by priority, then recency.
    async fn announcements(&self, limit: u32) -> StoreResult<Vec<ChatMessage>>;

    async fn announcement(&self, id: i64) -> StoreResult<Option<ChatMessage>>;
}

#[async_trait]
pub trait BanStore: Send + Sync {
    async fn find_by_ip(&self, ip: &str) -> StoreResult<Option<IpBan>>;

    /// Inserts a ban or refreshes reason, kind and expiry of the existing
    /// row for the same address.
    async fn upsert(&self, ban: NewIpBan) -> StoreResult<IpBan>;

    /// Deletes a ban by id and returns the address it covered.
    async fn delete(&self, id: i64) -> StoreResult<Option<String>>;

    async fn delete_by_ip(&self, ip: &str) -> StoreResult<bool>;

    /// Removes bans whose expiry is at or before `now`; returns the count.
    async fn delete_expired(&self, now: DateTime<Utc>) -> StoreResult<u64>;

    async fn list(&self, page: u32, page_size: u32) -> StoreResult<Page<IpBan>>;
}

/// Addresses and CIDR blocks that skip the IP gate. Method names carry an
/// `allowed` suffix so they never clash with [`BanStore`] on stores that
/// implement both.
#[async_trait]
pub trait WhitelistStore: Send + Sync {
    /// Entries that have not expired at `now`.
    async fn active_allowed(&self, now: DateTime<Utc>) -> StoreResult<Vec<IpAllow>>;

    /// Inserts an entry. An existing entry for the same `ip` is
    /// [`StoreError::Conflict`].
    async fn insert_allowed(&self, entry: NewIpAllow) -> StoreResult<IpAllow>;

    /// Whitelists `ip` until at least `expire_at`. Permanent entries and
    /// entries that already outlive `expire_at` are left as they are.
    async fn extend_allowed(
        &self,
        ip: &str,
        reason: &str,
        expire_at: DateTime<Utc>,
    ) -> StoreResult<IpAllow>;

    async fn delete_allowed(&self, id: i64) -> StoreResult<bool>;

    /// Removes entries whose expiry is at or before `now`; returns the count.
    async fn delete_expired_allowed(&self, now: DateTime<Utc>) -> StoreResult<u64>;

    async fn list_allowed(&self, page: u32, page_size: u32) -> StoreResult<Page<IpAllow>>;
}

#[async_trait]
pub trait SettingStore: Send + Sync {
    async fn chat_settings(&self) -> StoreResult<ChatSettings>;

    async fn update_chat_settings(&self, settings: ChatSettings) -> StoreResult<ChatSettings>;
}

/// Key under which the room-wide mute flag is stored.
pub const MUTE_ALL_KEY: &str = "chat_mute_all";

/// The persistence ports, shared across the application.
#[derive(Clone)]
pub struct Stores {
    pub chat: Arc<dyn ChatStore>,
    pub bans: Arc<dyn BanStore>,
    pub whitelist: Arc<dyn WhitelistStore>,
    pub settings: Arc<dyn SettingStore>,
}

impl Stores {
    pub fn postgres(pool: PgPool) -> Self {
        let store = Arc::new(PgStore::new(pool));
        Self {
            chat: store.clone(),
            bans: store.clone(),
            whitelist: store.clone(),
            settings: store,
        }
    }

    pub fn memory(clock: Arc<dyn Clock>) -> Self {
        Self::from_memory(Arc::new(MemoryStore::new(clock)))
    }

    pub fn from_memory(store: Arc<MemoryStore>) -> Self {
        Self {
            chat: store.clone(),
            bans: store.clone(),
            whitelist: store.clone(),
            settings: store,
        }
    }
}

impl std::fmt::Debug for Stores {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stores").finish_non_exhaustive()
    }
}

/// Row offset for a 1-based page.
pub(crate) fn offset(page: u32, page_size: u32) -> u64 {
    u64::from(page.saturating_sub(1)) * u64::from(page_size)
}
