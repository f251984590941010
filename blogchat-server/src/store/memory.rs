use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared::models::{
    ChatMessage, ChatSettings, IpAllow, IpBan, MessageStatus, NewChatMessage, NewIpAllow,
    NewIpBan, Page,
};
use tokio::sync::Mutex;

use super::{
    BanStore, ChatStore, SettingStore, StoreError, StoreResult, WhitelistStore, offset,
};
use crate::services::clock::Clock;

#[derive(Debug, Default)]
struct Inner {
    messages: Vec<ChatMessage>,
    next_message_id: i64,
    bans: Vec<IpBan>,
    next_ban_id: i64,
    allowed: Vec<IpAllow>,
    next_allow_id: i64,
    settings: ChatSettings,
}

/// Process-local store. Messages are kept in insertion order, which is also
/// id order.
#[derive(Debug)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    clock: Arc<dyn Clock>,
}

impl MemoryStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                next_message_id: 1,
                next_ban_id: 1,
                next_allow_id: 1,
                ..Inner::default()
            }),
            clock,
        }
    }

    /// Snapshot of every stored message, for assertions.
    pub async fn messages(&self) -> Vec<ChatMessage> {
        self.inner.lock().await.messages.clone()
    }

    /// Snapshot of every stored ban, for assertions.
    pub async fn bans(&self) -> Vec<IpBan> {
        self.inner.lock().await.bans.clone()
    }

    /// Snapshot of every whitelist entry, for assertions.
    pub async fn allowed(&self) -> Vec<IpAllow> {
        self.inner.lock().await.allowed.clone()
    }
}

fn paginate<T: Clone>(rows: Vec<T>, page: u32, page_size: u32) -> Page<T> {
    let total = rows.len() as u64;
    let start = usize::try_from(offset(page, page_size)).unwrap_or(usize::MAX);
    let list = rows
        .into_iter()
        .skip(start)
        .take(page_size as usize)
        .collect();
    Page {
        list,
        total,
        page,
        page_size,
    }
}

#[async_trait]
impl ChatStore for MemoryStore {
    async fn append(&self, message: NewChatMessage) -> StoreResult<ChatMessage> {
        let now = self.clock.now();
        let mut inner = self.inner.lock().await;
        let id = inner.next_message_id;
        inner.next_message_id += 1;

        let stored = message.into_message(id, now);
        inner.messages.push(stored.clone());
        Ok(stored)
    }

    async fn recent_chat(&self, limit: usize) -> StoreResult<Vec<ChatMessage>> {
        let inner = self.inner.lock().await;
        let mut recent: Vec<ChatMessage> = inner
            .messages
            .iter()
            .rev()
            .filter(|m| m.status == MessageStatus::Visible && m.in_chat_stream())
            .take(limit)
            .cloned()
            .collect();
        recent.reverse();
        Ok(recent)
    }

    async fn list_public(&self, page: u32, page_size: u32) -> StoreResult<Page<ChatMessage>> {
        let inner = self.inner.lock().await;
        let rows = inner
            .messages
            .iter()
            .rev()
            .filter(|m| m.status == MessageStatus::Visible && m.in_chat_stream())
            .cloned()
            .collect();
        Ok(paginate(rows, page, page_size))
    }

    async fn list_all(&self, page: u32, page_size: u32) -> StoreResult<Page<ChatMessage>> {
        let inner = self.inner.lock().await;
        let rows = inner.messages.iter().rev().cloned().collect();
        Ok(paginate(rows, page, page_size))
    }

    async fn soft_delete(&self, id: i64) -> StoreResult<()> {
        let now = self.clock.now();
        let mut inner = self.inner.lock().await;
        let message = inner
            .messages
            .iter_mut()
            .find(|m| m.id == id)
            .ok_or(StoreError::NotFound("message"))?;
        if message.status != MessageStatus::Deleted {
            message.status = MessageStatus::Deleted;
            message.updated_at = now;
        }
        Ok(())
    }

    async fn announcements(&self, limit: u32) -> StoreResult<Vec<ChatMessage>> {
        let inner = self.inner.lock().await;
        let mut rows: Vec<ChatMessage> = inner
            .messages
            .iter()
            .filter(|m| m.is_announcement())
            .cloned()
            .collect();
        rows.sort_by(|a, b| {
            u8::from(b.priority)
                .cmp(&u8::from(a.priority))
                .then(b.created_at.cmp(&a.created_at))
                .then(b.id.cmp(&a.id))
        });
        rows.truncate(limit as usize);
        Ok(rows)
    }

    async fn announcement(&self, id: i64) -> StoreResult<Option<ChatMessage>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .messages
            .iter()
            .find(|m| m.id == id && m.is_announcement())
            .cloned())
    }
}

#[async_trait]
impl BanStore for MemoryStore {
    async fn find_by_ip(&self, ip: &str) -> StoreResult<Option<IpBan>> {
        let inner = self.inner.lock().await;
        Ok(inner.bans.iter().find(|ban| ban.ip == ip).cloned())
    }

    async fn upsert(&self, ban: NewIpBan) -> StoreResult<IpBan> {
        let now = self.clock.now();
        let mut inner = self.inner.lock().await;

        if let Some(existing) = inner.bans.iter_mut().find(|row| row.ip == ban.ip) {
            existing.reason = ban.reason;
            existing.ban_type = ban.ban_type;
            existing.expire_at = ban.expire_at;
            existing.updated_at = now;
            return Ok(existing.clone());
        }

        let id = inner.next_ban_id;
        inner.next_ban_id += 1;
        let row = IpBan {
            id,
            ip: ban.ip,
            reason: ban.reason,
            ban_type: ban.ban_type,
            expire_at: ban.expire_at,
            created_at: now,
            updated_at: now,
        };
        inner.bans.push(row.clone());
        Ok(row)
    }

    async fn delete(&self, id: i64) -> StoreResult<Option<String>> {
        let mut inner = self.inner.lock().await;
        let Some(index) = inner.bans.iter().position(|ban| ban.id == id) else {
            return Ok(None);
        };
        Ok(Some(inner.bans.remove(index).ip))
    }

    async fn delete_by_ip(&self, ip: &str) -> StoreResult<bool> {
        let mut inner = self.inner.lock().await;
        let before = inner.bans.len();
        inner.bans.retain(|ban| ban.ip != ip);
        Ok(inner.bans.len() != before)
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> StoreResult<u64> {
        let mut inner = self.inner.lock().await;
        let before = inner.bans.len();
        inner.bans.retain(|ban| ban.is_active(now));
        Ok((before - inner.bans.len()) as u64)
    }

    async fn list(&self, page: u32, page_size: u32) -> StoreResult<Page<IpBan>> {
        let inner = self.inner.lock().await;
        let rows = inner.bans.iter().rev().cloned().collect();
        Ok(paginate(rows, page, page_size))
    }
}

#[async_trait]
impl WhitelistStore for MemoryStore {
    async fn active_allowed(&self, now: DateTime<Utc>) -> StoreResult<Vec<IpAllow>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .allowed
            .iter()
            .filter(|entry| entry.is_active(now))
            .cloned()
            .collect())
    }

    async fn insert_allowed(&self, entry: NewIpAllow) -> StoreResult<IpAllow> {
        let now = self.clock.now();
        let mut inner = self.inner.lock().await;
        if inner.allowed.iter().any(|row| row.ip == entry.ip) {
            return Err(StoreError::Conflict(format!(
                "{} is already whitelisted",
                entry.ip
            )));
        }

        let id = inner.next_allow_id;
        inner.next_allow_id += 1;
        let row = IpAllow {
            id,
            ip: entry.ip,
            reason: entry.reason,
            expire_at: entry.expire_at,
            created_at: now,
            updated_at: now,
        };
        inner.allowed.push(row.clone());
        Ok(row)
    }

    async fn extend_allowed(
        &self,
        ip: &str,
        reason: &str,
        expire_at: DateTime<Utc>,
    ) -> StoreResult<IpAllow> {
        let now = self.clock.now();
        let mut inner = self.inner.lock().await;
        if let Some(existing) = inner.allowed.iter_mut().find(|row| row.ip == ip) {
            if existing
                .expire_at
                .is_some_and(|current| current < expire_at)
            {
                existing.expire_at = Some(expire_at);
                existing.updated_at = now;
            }
            return Ok(existing.clone());
        }

        let id = inner.next_allow_id;
        inner.next_allow_id += 1;
        let row = IpAllow {
            id,
            ip: ip.to_string(),
            reason: reason.to_string(),
            expire_at: Some(expire_at),
            created_at: now,
            updated_at: now,
        };
        inner.allowed.push(row.clone());
        Ok(row)
    }

    async fn delete_allowed(&self, id: i64) -> StoreResult<bool> {
        let mut inner = self.inner.lock().await;
        let before = inner.allowed.len();
        inner.allowed.retain(|entry| entry.id != id);
        Ok(inner.allowed.len() != before)
    }

    async fn delete_expired_allowed(&self, now: DateTime<Utc>) -> StoreResult<u64> {
        let mut inner = self.inner.lock().await;
        let before = inner.allowed.len();
        inner.allowed.retain(|entry| entry.is_active(now));
        Ok((before - inner.allowed.len()) as u64)
    }

    async fn list_allowed(&self, page: u32, page_size: u32) -> StoreResult<Page<IpAllow>> {
        let inner = self.inner.lock().await;
        let rows = inner.allowed.iter().rev().cloned().collect();
        Ok(paginate(rows, page, page_size))
    }
}

#[async_trait]
impl SettingStore for MemoryStore {
    async fn chat_settings(&self) -> StoreResult<ChatSettings> {
        Ok(self.inner.lock().await.settings)
    }

    async fn update_chat_settings(&self, settings: ChatSettings) -> StoreResult<ChatSettings> {
        self.inner.lock().await.settings = settings;
        Ok(settings)
    }
}
