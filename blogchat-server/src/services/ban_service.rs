//! IP blacklist management for the moderation panel.

use std::{net::IpAddr, sync::Arc};

use shared::models::{
    BanKind, CleanExpiredResponse, CreateIpBanRequest, IpBan, IpBanCheck, NewIpBan, Page,
};
use thiserror::Error;
use tracing::info;

use crate::{
    services::{
        clock::{Clock, expiry_after},
        ip_guard::IpGuard,
    },
    store::{BanStore, StoreError},
};

pub const DEFAULT_MANUAL_BAN_REASON: &str = "banned manually";

#[derive(Debug, Error)]
pub enum BanServiceError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    NotFound(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type BanServiceResult<T> = Result<T, BanServiceError>;

#[derive(Clone)]
pub struct BanService {
    bans: Arc<dyn BanStore>,
    guard: Arc<IpGuard>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for BanService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BanService")
            .field("guard", &self.guard)
            .finish_non_exhaustive()
    }
}

impl BanService {
    pub fn new(bans: Arc<dyn BanStore>, guard: Arc<IpGuard>, clock: Arc<dyn Clock>) -> Self {
        Self { bans, guard, clock }
    }

    pub async fn list(&self, page: u32, page_size: u32) -> BanServiceResult<Page<IpBan>> {
        Ok(self.bans.list(page, page_size).await?)
    }

    /// Adds or refreshes a manual ban. `duration` is in hours; `0` or absent
    /// bans permanently.
    pub async fn create(&self, request: CreateIpBanRequest) -> BanServiceResult<IpBan> {
        let ip = parse_ip(&request.ip)?;
        let reason = request
            .reason
            .map(|reason| reason.trim().to_string())
            .filter(|reason| !reason.is_empty())
            .unwrap_or_else(|| DEFAULT_MANUAL_BAN_REASON.to_string());
        let expire_at =
            expiry_after(self.clock.now(), request.duration).map_err(BanServiceError::Validation)?;

        let ban = self
            .bans
            .upsert(NewIpBan {
                ip: ip.to_string(),
                reason,
                ban_type: BanKind::Manual,
                expire_at,
            })
            .await?;
        info!(ip = %ban.ip, expire_at = ?ban.expire_at, "manual ban stored");
        Ok(ban)
    }

    /// Lifts a ban and forgets the address's request counter.
    pub async fn delete(&self, id: i64) -> BanServiceResult<()> {
        let ip = self
            .bans
            .delete(id)
            .await?
            .ok_or_else(|| BanServiceError::NotFound(format!("ban {id} not found")))?;
        if let Ok(addr) = ip.parse::<IpAddr>() {
            self.guard.forget(addr).await;
        }
        info!(%ip, "ban lifted");
        Ok(())
    }

    /// Reports whether `ip` is banned right now. Expired rows are removed.
    pub async fn check(&self, ip: &str) -> BanServiceResult<IpBanCheck> {
        let ip = parse_ip(ip)?.to_string();
        match self.bans.find_by_ip(&ip).await? {
            Some(ban) if ban.is_active(self.clock.now()) => Ok(IpBanCheck {
                banned: true,
                info: Some(ban),
            }),
            Some(_) => {
                self.bans.delete_by_ip(&ip).await?;
                Ok(IpBanCheck {
                    banned: false,
                    info: None,
                })
            }
            None => Ok(IpBanCheck {
                banned: false,
                info: None,
            }),
        }
    }

    pub async fn clean_expired(&self) -> BanServiceResult<CleanExpiredResponse> {
        let deleted_count = self.bans.delete_expired(self.clock.now()).await?;
        info!(deleted_count, "expired bans removed");
        Ok(CleanExpiredResponse { deleted_count })
    }
}

fn parse_ip(raw: &str) -> BanServiceResult<IpAddr> {
    raw.trim()
        .parse()
        .map_err(|_| BanServiceError::Validation(format!("'{raw}' is not an IP address")))
}
