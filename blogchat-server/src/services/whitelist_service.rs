//! IP whitelist management for the moderation panel.

use std::{net::IpAddr, sync::Arc};

use shared::{
    models::{CleanExpiredResponse, CreateIpAllowRequest, IpAllow, IpAllowCheck, NewIpAllow, Page},
    net::IpNet,
};
use thiserror::Error;
use tracing::info;

use crate::{
    services::clock::{Clock, expiry_after},
    store::{StoreError, WhitelistStore},
};

pub const DEFAULT_ALLOW_REASON: &str = "whitelisted manually";

#[derive(Debug, Error)]
pub enum WhitelistServiceError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    NotFound(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type WhitelistServiceResult<T> = Result<T, WhitelistServiceError>;

#[derive(Clone)]
pub struct WhitelistService {
    whitelist: Arc<dyn WhitelistStore>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for WhitelistService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WhitelistService").finish_non_exhaustive()
    }
}

impl WhitelistService {
    pub fn new(whitelist: Arc<dyn WhitelistStore>, clock: Arc<dyn Clock>) -> Self {
        Self { whitelist, clock }
    }

    pub async fn list(&self, page: u32, page_size: u32) -> WhitelistServiceResult<Page<IpAllow>> {
        Ok(self.whitelist.list_allowed(page, page_size).await?)
    }

    /// Adds an address or CIDR block. `duration` is in hours; `0` or absent
    /// whitelists permanently. An existing entry for the same text is a conflict.
    pub async fn create(&self, request: CreateIpAllowRequest) -> WhitelistServiceResult<IpAllow> {
        let ip = normalize(&request.ip)?;
        let reason = request
            .reason
            .map(|reason| reason.trim().to_string())
            .filter(|reason| !reason.is_empty())
            .unwrap_or_else(|| DEFAULT_ALLOW_REASON.to_string());
        let expire_at = expiry_after(self.clock.now(), request.duration)
            .map_err(WhitelistServiceError::Validation)?;

        let entry = self
            .whitelist
            .insert_allowed(NewIpAllow {
                ip,
                reason,
                expire_at,
            })
            .await?;
        info!(ip = %entry.ip, expire_at = ?entry.expire_at, "whitelist entry stored");
        Ok(entry)
    }

    pub async fn delete(&self, id: i64) -> WhitelistServiceResult<()> {
        if !self.whitelist.delete_allowed(id).await? {
            return Err(WhitelistServiceError::NotFound(format!(
                "whitelist entry {id} not found"
            )));
        }
        info!(id, "whitelist entry removed");
        Ok(())
    }

    /// Reports the first unexpired entry covering `ip`, if any.
    pub async fn check(&self, ip: &str) -> WhitelistServiceResult<IpAllowCheck> {
        let addr: IpAddr = ip.trim().parse().map_err(|_| {
            WhitelistServiceError::Validation(format!("'{ip}' is not an IP address"))
        })?;
        let info = self
            .whitelist
            .active_allowed(self.clock.now())
            .await?
            .into_iter()
            .find(|entry| entry.matches(addr));
        Ok(IpAllowCheck {
            whitelisted: info.is_some(),
            info,
        })
    }

    pub async fn clean_expired(&self) -> WhitelistServiceResult<CleanExpiredResponse> {
        let deleted_count = self.whitelist.delete_expired_allowed(self.clock.now()).await?;
        info!(deleted_count, "expired whitelist entries removed");
        Ok(CleanExpiredResponse { deleted_count })
    }
}

/// Single addresses keep their plain form so they line up with the keys the
/// gate writes; blocks are stored as `addr/prefix`.
fn normalize(raw: &str) -> WhitelistServiceResult<String> {
    let invalid = || WhitelistServiceError::Validation(format!("'{raw}' is not an IP address or CIDR block"));
    let raw = raw.trim();
    if raw.contains('/') {
        raw.parse::<IpNet>().map(|net| net.to_string()).map_err(|_| invalid())
    } else {
        raw.parse::<IpAddr>()
            .map(|addr| addr.to_canonical().to_string())
            .map_err(|_| invalid())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{services::clock::ManualClock, store::MemoryStore};
    use chrono::Duration;

    fn fixture() -> (Arc<ManualClock>, WhitelistService) {
        let clock = Arc::new(ManualClock::default());
        let store = Arc::new(MemoryStore::new(clock.clone()));
        (clock.clone(), WhitelistService::new(store, clock))
    }

    fn request(ip: &str, duration: Option<u32>) -> CreateIpAllowRequest {
        CreateIpAllowRequest {
            ip: ip.to_string(),
            reason: None,
            duration,
        }
    }

    #[tokio::test]
    async fn blocks_and_addresses_are_normalized_on_create() {
        let (clock, service) = fixture();
        let block = service.create(request(" 10.8.0.0/16 ", Some(3))).await.unwrap();
        assert_eq!(block.ip, "10.8.0.0/16");
        assert_eq!(block.reason, DEFAULT_ALLOW_REASON);
        assert_eq!(block.expire_at, Some(clock.now() + Duration::hours(3)));

        let single = service.create(request("::ffff:192.0.2.9", None)).await.unwrap();
        assert_eq!(single.ip, "192.0.2.9");
        assert_eq!(single.expire_at, None);

        assert!(matches!(
            service.create(request("10.8.0.0/40", None)).await,
            Err(WhitelistServiceError::Validation(_))
        ));
        assert!(matches!(
            service.create(request("192.0.2.9", Some(u32::MAX))).await,
            Err(WhitelistServiceError::Validation(_))
        ));
        assert!(matches!(
            service.create(request("192.0.2.9", None)).await,
            Err(WhitelistServiceError::Store(StoreError::Conflict(_)))
        ));
    }

    #[tokio::test]
    async fn check_follows_blocks_and_expiry() {
        let (clock, service) = fixture();
        service.create(request("10.8.0.0/16", Some(1))).await.unwrap();

        let hit = service.check("10.8.200.1").await.unwrap();
        assert!(hit.whitelisted);
        assert_eq!(hit.info.map(|entry| entry.ip).as_deref(), Some("10.8.0.0/16"));
        assert!(!service.check("10.9.0.1").await.unwrap().whitelisted);
        assert!(matches!(
            service.check("nope").await,
            Err(WhitelistServiceError::Validation(_))
        ));

        clock.advance(Duration::hours(1));
        assert!(!service.check("10.8.200.1").await.unwrap().whitelisted);
        assert_eq!(service.clean_expired().await.unwrap().deleted_count, 1);
        assert_eq!(service.list(1, 20).await.unwrap().total, 0);
    }

    #[tokio::test]
    async fn deleting_unknown_entries_is_not_found() {
        let (_, service) = fixture();
        let entry = service.create(request("198.51.100.4", None)).await.unwrap();
        service.delete(entry.id).await.unwrap();
        assert!(matches!(
            service.delete(entry.id).await,
            Err(WhitelistServiceError::NotFound(_))
        ));
    }
}
