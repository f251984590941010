//! A chat store whose every call fails, for exercising error paths.

use async_trait::async_trait;
use shared::models::{ChatMessage, NewChatMessage, Page};

use super::{ChatStore, StoreError, StoreResult};

#[derive(Debug, Default)]
pub struct FailingChatStore;

fn unavailable<T>() -> StoreResult<T> {
    Err(StoreError::Database(sqlx::Error::PoolTimedOut))
}

#[async_trait]
impl ChatStore for FailingChatStore {
    async fn append(&self, _message: NewChatMessage) -> StoreResult<ChatMessage> {
        unavailable()
    }

    async fn recent_chat(&self, _limit: usize) -> StoreResult<Vec<ChatMessage>> {
        unavailable()
    }

    async fn list_public(&self, _page: u32, _page_size: u32) -> StoreResult<Page<ChatMessage>> {
        unavailable()
    }

    async fn list_all(&self, _page: u32, _page_size: u32) -> StoreResult<Page<ChatMessage>> {
        unavailable()
    }

    async fn soft_delete(&self, _id: i64) -> StoreResult<()> {
        unavailable()
    }

    async fn announcements(&self, _limit: u32) -> StoreResult<Vec<ChatMessage>> {
        unavailable()
    }

    async fn announcement(&self, _id: i64) -> StoreResult<Option<ChatMessage>> {
        unavailable()
    }
}
