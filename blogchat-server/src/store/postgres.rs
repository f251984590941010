use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared::models::{
    BanKind, ChatMessage, ChatSettings, IpAllow, IpBan, MessagePriority, MessageStatus,
    NewChatMessage, NewIpAllow, NewIpBan, Page,
};
use sqlx::PgPool;
use tracing::trace;

use super::{
    BanStore, ChatStore, MUTE_ALL_KEY, SettingStore, StoreError, StoreResult, WhitelistStore,
    offset,
};

const MESSAGE_COLUMNS: &str = "id, content, user_id, username, avatar, ip, priority, target, \
     is_broadcast, status, created_at, updated_at";

const BAN_COLUMNS: &str = "id, ip, reason, ban_type, expire_at, created_at, updated_at";

const ALLOW_COLUMNS: &str = "id, ip, reason, expire_at, created_at, updated_at";

const CHAT_STREAM_FILTER: &str =
    "status = 1 AND (is_broadcast = FALSE OR target IN ('chat', 'both'))";

const ANNOUNCEMENT_FILTER: &str =
    "status = 1 AND is_broadcast = TRUE AND target IN ('announcement', 'both')";

#[derive(Debug, sqlx::FromRow)]
struct MessageRow {
    id: i64,
    content: String,
    user_id: Option<i64>,
    username: String,
    avatar: String,
    ip: Option<String>,
    priority: i16,
    target: String,
    is_broadcast: bool,
    status: i16,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<MessageRow> for ChatMessage {
    type Error = StoreError;

    fn try_from(row: MessageRow) -> Result<Self, Self::Error> {
        Ok(ChatMessage {
            id: row.id,
            content: row.content,
            user_id: row.user_id,
            username: row.username,
            avatar: row.avatar,
            ip: row.ip,
            client_id: None,
            priority: small_enum::<MessagePriority>(row.priority, "priority")?,
            target: row.target.parse().map_err(StoreError::Corrupt)?,
            is_broadcast: row.is_broadcast,
            status: small_enum::<MessageStatus>(row.status, "status")?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct BanRow {
    id: i64,
    ip: String,
    reason: String,
    ban_type: i16,
    expire_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<BanRow> for IpBan {
    type Error = StoreError;

    fn try_from(row: BanRow) -> Result<Self, Self::Error> {
        Ok(IpBan {
            id: row.id,
            ip: row.ip,
            reason: row.reason,
            ban_type: small_enum::<BanKind>(row.ban_type, "ban_type")?,
            expire_at: row.expire_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct AllowRow {
    id: i64,
    ip: String,
    reason: String,
    expire_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<AllowRow> for IpAllow {
    fn from(row: AllowRow) -> Self {
        IpAllow {
            id: row.id,
            ip: row.ip,
            reason: row.reason,
            expire_at: row.expire_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

fn small_enum<T: TryFrom<u8, Error = String>>(value: i16, column: &str) -> StoreResult<T> {
    u8::try_from(value)
        .map_err(|_| format!("{column} out of range: {value}"))
        .and_then(T::try_from)
        .map_err(StoreError::Corrupt)
}

fn enum_code<T: Into<u8>>(value: T) -> i16 {
    i16::from(value.into())
}

fn to_messages(rows: Vec<MessageRow>) -> StoreResult<Vec<ChatMessage>> {
    rows.into_iter().map(ChatMessage::try_from).collect()
}

fn sql_limit(value: u32) -> i64 {
    i64::from(value)
}

fn sql_offset(page: u32, page_size: u32) -> i64 {
    i64::try_from(offset(page, page_size)).unwrap_or(i64::MAX)
}

#[derive(Clone, Debug)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn page_messages(
        &self,
        filter: &str,
        page: u32,
        page_size: u32,
    ) -> StoreResult<Page<ChatMessage>> {
        let total: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM chat_messages WHERE {filter}"
        ))
        .fetch_one(&self.pool)
        .await?;

        let rows: Vec<MessageRow> = sqlx::query_as(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM chat_messages WHERE {filter} \
             ORDER BY created_at DESC, id DESC LIMIT $1 OFFSET $2"
        ))
        .bind(sql_limit(page_size))
        .bind(sql_offset(page, page_size))
        .fetch_all(&self.pool)
        .await?;

        Ok(Page {
            list: to_messages(rows)?,
            total: u64::try_from(total).unwrap_or_default(),
            page,
            page_size,
        })
    }
}

#[async_trait]
impl ChatStore for PgStore {
    async fn append(&self, message: NewChatMessage) -> StoreResult<ChatMessage> {
        let row: MessageRow = sqlx::query_as(&format!(
            "INSERT INTO chat_messages \
             (content, user_id, username, avatar, ip, priority, target, is_broadcast, status) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 1) \
             RETURNING {MESSAGE_COLUMNS}"
        ))
        .bind(&message.content)
        .bind(message.user_id)
        .bind(&message.username)
        .bind(&message.avatar)
        .bind(&message.ip)
        .bind(enum_code(message.priority))
        .bind(message.target.as_str())
        .bind(message.is_broadcast)
        .fetch_one(&self.pool)
        .await?;

        trace!(message_id = row.id, "persisted chat message");
        ChatMessage::try_from(row)
    }

    async fn recent_chat(&self, limit: usize) -> StoreResult<Vec<ChatMessage>> {
        let rows: Vec<MessageRow> = sqlx::query_as(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM chat_messages WHERE {CHAT_STREAM_FILTER} \
             ORDER BY created_at DESC, id DESC LIMIT $1"
        ))
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        let mut messages = to_messages(rows)?;
        messages.reverse();
        Ok(messages)
    }

    async fn list_public(&self, page: u32, page_size: u32) -> StoreResult<Page<ChatMessage>> {
        self.page_messages(CHAT_STREAM_FILTER, page, page_size).await
    }

    async fn list_all(&self, page: u32, page_size: u32) -> StoreResult<Page<ChatMessage>> {
        self.page_messages("TRUE", page, page_size).await
    }

    async fn soft_delete(&self, id: i64) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE chat_messages \
             SET updated_at = CASE WHEN status = 0 THEN updated_at ELSE NOW() END, status = 0 \
             WHERE id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound("message"));
        }
        Ok(())
    }

    async fn announcements(&self, limit: u32) -> StoreResult<Vec<ChatMessage>> {
        let rows: Vec<MessageRow> = sqlx::query_as(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM chat_messages WHERE {ANNOUNCEMENT_FILTER} \
             ORDER BY priority DESC, created_at DESC, id DESC LIMIT $1"
        ))
        .bind(sql_limit(limit))
        .fetch_all(&self.pool)
        .await?;

        to_messages(rows)
    }

    async fn announcement(&self, id: i64) -> StoreResult<Option<ChatMessage>> {
        let row: Option<MessageRow> = sqlx::query_as(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM chat_messages WHERE id = $1 AND {ANNOUNCEMENT_FILTER}"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(ChatMessage::try_from).transpose()
    }
}

#[async_trait]
impl BanStore for PgStore {
    async fn find_by_ip(&self, ip: &str) -> StoreResult<Option<IpBan>> {
        let row: Option<BanRow> = sqlx::query_as(&format!(
            "SELECT {BAN_COLUMNS} FROM ip_blacklist WHERE ip = $1"
        ))
        .bind(ip)
        .fetch_optional(&self.pool)
        .await?;

        row.map(IpBan::try_from).transpose()
    }

    async fn upsert(&self, ban: NewIpBan) -> StoreResult<IpBan> {
        let row: BanRow = sqlx::query_as(&format!(
            "INSERT INTO ip_blacklist (ip, reason, ban_type, expire_at) \
             VALUES ($1, $2, $3, $4) \
             ON CONFLICT (ip) DO UPDATE SET \
                 reason = EXCLUDED.reason, \
                 ban_type = EXCLUDED.ban_type, \
                 expire_at = EXCLUDED.expire_at, \
                 updated_at = NOW() \
             RETURNING {BAN_COLUMNS}"
        ))
        .bind(&ban.ip)
        .bind(&ban.reason)
        .bind(enum_code(ban.ban_type))
        .bind(ban.expire_at)
        .fetch_one(&self.pool)
        .await?;

        IpBan::try_from(row)
    }

    async fn delete(&self, id: i64) -> StoreResult<Option<String>> {
        let ip = sqlx::query_scalar("DELETE FROM ip_blacklist WHERE id = $1 RETURNING ip")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(ip)
    }

    async fn delete_by_ip(&self, ip: &str) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM ip_blacklist WHERE ip = $1")
            .bind(ip)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> StoreResult<u64> {
        let result =
            sqlx::query("DELETE FROM ip_blacklist WHERE expire_at IS NOT NULL AND expire_at <= $1")
                .bind(now)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected())
    }

    async fn list(&self, page: u32, page_size: u32) -> StoreResult<Page<IpBan>> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM ip_blacklist")
            .fetch_one(&self.pool)
            .await?;

        let rows: Vec<BanRow> = sqlx::query_as(&format!(
            "SELECT {BAN_COLUMNS} FROM ip_blacklist ORDER BY created_at DESC, id DESC \
             LIMIT $1 OFFSET $2"
        ))
        .bind(sql_limit(page_size))
        .bind(sql_offset(page, page_size))
        .fetch_all(&self.pool)
        .await?;

        Ok(Page {
            list: rows
                .into_iter()
                .map(IpBan::try_from)
                .collect::<StoreResult<_>>()?,
            total: u64::try_from(total).unwrap_or_default(),
            page,
            page_size,
        })
    }
}

#[async_trait]
impl WhitelistStore for PgStore {
    async fn active_allowed(&self, now: DateTime<Utc>) -> StoreResult<Vec<IpAllow>> {
        let rows: Vec<AllowRow> = sqlx::query_as(&format!(
            "SELECT {ALLOW_COLUMNS} FROM ip_whitelist \
             WHERE expire_at IS NULL OR expire_at > $1"
        ))
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(IpAllow::from).collect())
    }

    async fn insert_allowed(&self, entry: NewIpAllow) -> StoreResult<IpAllow> {
        let row: Option<AllowRow> = sqlx::query_as(&format!(
            "INSERT INTO ip_whitelist (ip, reason, expire_at) VALUES ($1, $2, $3) \
             ON CONFLICT (ip) DO NOTHING \
             RETURNING {ALLOW_COLUMNS}"
        ))
        .bind(&entry.ip)
        .bind(&entry.reason)
        .bind(entry.expire_at)
        .fetch_optional(&self.pool)
        .await?;

        row.map(IpAllow::from)
            .ok_or_else(|| StoreError::Conflict(format!("{} is already whitelisted", entry.ip)))
    }

    async fn extend_allowed(
        &self,
        ip: &str,
        reason: &str,
        expire_at: DateTime<Utc>,
    ) -> StoreResult<IpAllow> {
        // The no-op update on a kept row makes RETURNING yield it too.
        let row: AllowRow = sqlx::query_as(&format!(
            "INSERT INTO ip_whitelist (ip, reason, expire_at) VALUES ($1, $2, $3) \
             ON CONFLICT (ip) DO UPDATE SET \
                 expire_at = CASE \
                     WHEN ip_whitelist.expire_at IS NULL THEN NULL \
                     ELSE GREATEST(ip_whitelist.expire_at, EXCLUDED.expire_at) \
                 END, \
                 updated_at = CASE \
                     WHEN ip_whitelist.expire_at IS NOT NULL \
                          AND ip_whitelist.expire_at < EXCLUDED.expire_at THEN NOW() \
                     ELSE ip_whitelist.updated_at \
                 END \
             RETURNING {ALLOW_COLUMNS}"
        ))
        .bind(ip)
        .bind(reason)
        .bind(expire_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(IpAllow::from(row))
    }

    async fn delete_allowed(&self, id: i64) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM ip_whitelist WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_expired_allowed(&self, now: DateTime<Utc>) -> StoreResult<u64> {
        let result =
            sqlx::query("DELETE FROM ip_whitelist WHERE expire_at IS NOT NULL AND expire_at <= $1")
                .bind(now)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected())
    }

    async fn list_allowed(&self, page: u32, page_size: u32) -> StoreResult<Page<IpAllow>> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM ip_whitelist")
            .fetch_one(&self.pool)
            .await?;

        let rows: Vec<AllowRow> = sqlx::query_as(&format!(
            "SELECT {ALLOW_COLUMNS} FROM ip_whitelist ORDER BY created_at DESC, id DESC \
             LIMIT $1 OFFSET $2"
        ))
        .bind(sql_limit(page_size))
        .bind(sql_offset(page, page_size))
        .fetch_all(&self.pool)
        .await?;

        Ok(Page {
            list: rows.into_iter().map(IpAllow::from).collect(),
            total: u64::try_from(total).unwrap_or_default(),
            page,
            page_size,
        })
    }
}

#[async_trait]
impl SettingStore for PgStore {
    async fn chat_settings(&self) -> StoreResult<ChatSettings> {
        let value: Option<String> =
            sqlx::query_scalar("SELECT value FROM chat_settings WHERE key = $1")
                .bind(MUTE_ALL_KEY)
                .fetch_optional(&self.pool)
                .await?;

        Ok(ChatSettings {
            mute_all: value.is_some_and(|value| value == "1"),
        })
    }

    async fn update_chat_settings(&self, settings: ChatSettings) -> StoreResult<ChatSettings> {
        sqlx::query(
            "INSERT INTO chat_settings (key, value) VALUES ($1, $2) \
             ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value, updated_at = NOW()",
        )
        .bind(MUTE_ALL_KEY)
        .bind(if settings.mute_all { "1" } else { "0" })
        .execute(&self.pool)
        .await?;

        Ok(settings)
    }
}
