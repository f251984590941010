use std::{collections::HashMap, net::IpAddr, sync::Arc};

use chrono::{DateTime, Duration, Utc};
use metrics::{counter, gauge};
use shared::{
    config::server::IpGuardConfig,
    models::{BanKind, IpBan, NewIpBan},
    net::{IpNet, is_loopback},
};
use thiserror::Error;
use tokio::{sync::RwLock, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    services::clock::Clock,
    store::{BanStore, StoreError, WhitelistStore},
};

pub const AUTO_BAN_REASON: &str = "request rate too high, banned automatically";
pub const MODERATOR_ALLOW_REASON: &str = "moderator address, whitelisted automatically";

#[derive(Debug, Error)]
pub enum GuardError {
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Outcome of one admission check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Counted and under both thresholds.
    Allowed,
    /// Whitelisted, moderator, or gate disabled. Not counted.
    Bypassed,
    /// An unexpired ban exists for the address.
    Banned(IpBan),
    /// A threshold was crossed. `ban` is the ban issued by this request, or
    /// `None` when another request already issued it.
    RateLimited { ban: Option<IpBan> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardSettings {
    pub enabled: bool,
    pub max_per_minute: u32,
    pub max_per_ten_minutes: u32,
    pub auto_ban: Duration,
    pub idle_evict: Duration,
    pub sweep_interval: std::time::Duration,
    pub whitelist: Vec<IpNet>,
    pub count_loopback: bool,
    /// How long a moderator's address stays whitelisted; `None` disables it.
    pub moderator_allow: Option<Duration>,
}

impl GuardSettings {
    pub fn from_config(config: &IpGuardConfig) -> Self {
        // entries were checked by Config::validate
        let whitelist = config
            .whitelist
            .iter()
            .filter_map(|entry| entry.parse().ok())
            .collect();

        Self {
            enabled: config.enabled,
            max_per_minute: config.max_per_minute,
            max_per_ten_minutes: config.max_per_ten_minutes,
            auto_ban: seconds(config.auto_ban_seconds),
            idle_evict: seconds(config.idle_evict_seconds),
            sweep_interval: std::time::Duration::from_secs(config.sweep_interval_seconds.max(1)),
            whitelist,
            count_loopback: config.count_loopback,
            moderator_allow: match config.admin_whitelist_hours {
                0 => None,
                hours => Duration::try_hours(i64::from(hours)),
            },
        }
    }
}

fn seconds(value: u64) -> Duration {
    Duration::seconds(i64::try_from(value).unwrap_or(i64::MAX / 1000))
}

const SHORT_WINDOW: Duration = Duration::minutes(1);
const LONG_WINDOW: Duration = Duration::minutes(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessRecord {
    pub count: u32,
    pub window_start: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub banned_until: Option<DateTime<Utc>>,
}

impl AccessRecord {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            count: 0,
            window_start: now,
            last_seen: now,
            banned_until: None,
        }
    }

    fn reset(&mut self, now: DateTime<Utc>) {
        self.count = 0;
        self.window_start = now;
    }

    pub fn is_banned(&self, now: DateTime<Utc>) -> bool {
        self.banned_until.is_some_and(|until| until > now)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub evicted: usize,
    pub expired_bans: u64,
    pub expired_allowed: u64,
}

enum Counted {
    Allowed,
    AlreadyBanned,
    Exceeded,
}

/// Per-address sliding counters backed by the ban and whitelist stores.
pub struct IpGuard {
    settings: GuardSettings,
    records: RwLock<HashMap<IpAddr, AccessRecord>>,
    bans: Arc<dyn BanStore>,
    whitelist: Arc<dyn WhitelistStore>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for IpGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IpGuard")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl IpGuard {
    pub fn new(
        settings: GuardSettings,
        bans: Arc<dyn BanStore>,
        whitelist: Arc<dyn WhitelistStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            settings,
            records: RwLock::new(HashMap::new()),
            bans,
            whitelist,
            clock,
        }
    }

    pub fn settings(&self) -> &GuardSettings {
        &self.settings
    }

    /// Configured blocks first, then unexpired whitelist rows.
    pub async fn is_whitelisted(&self, ip: IpAddr) -> Result<bool, GuardError> {
        if self.settings.whitelist.iter().any(|net| net.contains(ip)) {
            return Ok(true);
        }
        let entries = self.whitelist.active_allowed(self.clock.now()).await?;
        Ok(entries.iter().any(|entry| entry.matches(ip)))
    }

    /// Admission check for one request from `ip`.
    pub async fn check(&self, ip: IpAddr, is_admin: bool) -> Result<Verdict, GuardError> {
        if !self.settings.enabled {
            return Ok(Verdict::Bypassed);
        }

        let key = ip.to_string();
        let now = self.clock.now();
        if is_admin {
            self.admit_moderator(ip, &key, now).await?;
            return Ok(Verdict::Bypassed);
        }
        if self.is_whitelisted(ip).await? {
            return Ok(Verdict::Bypassed);
        }

        if let Some(ban) = self.bans.find_by_ip(&key).await? {
            if ban.is_active(now) {
                counter!("blogchat_ip_guard_rejections_total", "reason" => "banned").increment(1);
                return Ok(Verdict::Banned(ban));
            }
            debug!(ip = %key, "removing expired ban");
            self.bans.delete_by_ip(&key).await?;
        }

        if is_loopback(ip) && !self.settings.count_loopback {
            return Ok(Verdict::Allowed);
        }

        match self.count(ip, now).await {
            Counted::Allowed => Ok(Verdict::Allowed),
            Counted::AlreadyBanned => {
                counter!("blogchat_ip_guard_rejections_total", "reason" => "rate_limited")
                    .increment(1);
                Ok(Verdict::RateLimited { ban: None })
            }
            Counted::Exceeded => {
                let ban = self
                    .bans
                    .upsert(NewIpBan {
                        ip: key.clone(),
                        reason: AUTO_BAN_REASON.to_string(),
                        ban_type: BanKind::Auto,
                        expire_at: Some(now + self.settings.auto_ban),
                    })
                    .await?;
                warn!(ip = %key, expire_at = ?ban.expire_at, "auto-banned address");
                counter!("blogchat_ip_auto_bans_total").increment(1);
                counter!("blogchat_ip_guard_rejections_total", "reason" => "rate_limited")
                    .increment(1);
                Ok(Verdict::RateLimited { ban: Some(ban) })
            }
        }
    }

    /// Lifts any ban on a moderator's address and keeps it whitelisted for a
    /// while, so their unauthenticated requests from it pass too.
    async fn admit_moderator(
        &self,
        ip: IpAddr,
        key: &str,
        now: DateTime<Utc>,
    ) -> Result<(), GuardError> {
        if self.bans.delete_by_ip(key).await? {
            info!(ip = %key, "lifted ban for moderator address");
            self.forget(ip).await;
        }

        let until = self
            .settings
            .moderator_allow
            .and_then(|allow| now.checked_add_signed(allow));
        if let (Some(until), false) = (until, is_loopback(ip)) {
            self.whitelist
                .extend_allowed(key, MODERATOR_ALLOW_REASON, until)
                .await?;
            debug!(ip = %key, %until, "moderator address whitelisted");
        }
        Ok(())
    }

    // Increment and threshold check share one exclusive lock so concurrent
    // requests from the same address cannot both slip under a threshold.
    async fn count(&self, ip: IpAddr, now: DateTime<Utc>) -> Counted {
        let mut records = self.records.write().await;
        let record = records.entry(ip).or_insert_with(|| AccessRecord::new(now));
        record.last_seen = now;

        if record.is_banned(now) {
            return Counted::AlreadyBanned;
        }
        if record.banned_until.take().is_some() || now - record.window_start > LONG_WINDOW {
            record.reset(now);
        }
        record.count += 1;

        let window = now - record.window_start;
        let exceeded = (record.count > self.settings.max_per_minute && window <= SHORT_WINDOW)
            || (record.count > self.settings.max_per_ten_minutes && window <= LONG_WINDOW);

        if exceeded {
            record.banned_until = Some(now + self.settings.auto_ban);
            record.reset(now);
        }

        gauge!("blogchat_ip_guard_tracked_ips").set(records.len() as f64);
        if exceeded {
            Counted::Exceeded
        } else {
            Counted::Allowed
        }
    }

    /// Drops the in-memory state for `ip`, e.g. after a moderator lifts its ban.
    pub async fn forget(&self, ip: IpAddr) {
        self.records.write().await.remove(&ip);
    }

    pub async fn snapshot(&self, ip: IpAddr) -> Option<AccessRecord> {
        self.records.read().await.get(&ip).copied()
    }

    pub async fn tracked_ips(&self) -> usize {
        self.records.read().await.len()
    }

    /// Evicts idle counters and deletes expired bans and whitelist rows.
    pub async fn sweep(&self) -> Result<SweepReport, GuardError> {
        let now = self.clock.now();
        let evicted = {
            let mut records = self.records.write().await;
            let before = records.len();
            records.retain(|_, record| now - record.last_seen <= self.settings.idle_evict);
            gauge!("blogchat_ip_guard_tracked_ips").set(records.len() as f64);
            before - records.len()
        };
        let expired_bans = self.bans.delete_expired(now).await?;
        let expired_allowed = self.whitelist.delete_expired_allowed(now).await?;

        Ok(SweepReport {
            evicted,
            expired_bans,
            expired_allowed,
        })
    }

    /// Runs [`IpGuard::sweep`] every `sweep_interval` until `shutdown` fires.
    pub fn spawn_sweeper(self: Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.settings.sweep_interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    _ = ticker.tick() => match self.sweep().await {
                        Ok(report) => debug!(
                            evicted = report.evicted,
                            expired_bans = report.expired_bans,
                            expired_allowed = report.expired_allowed,
                            "ip guard sweep finished"
                        ),
                        Err(err) => warn!(error = %err, "ip guard sweep failed"),
                    },
                }
            }
            debug!("ip guard sweeper stopped");
        })
    }
}
