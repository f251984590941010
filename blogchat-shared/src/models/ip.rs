use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

/// How a ban was created. Encoded on the wire as `1` (auto) or `2` (manual).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum BanKind {
    /// Issued by the rate gate.
    Auto,
    /// Issued by a moderator.
    Manual,
}

impl From<BanKind> for u8 {
    fn from(value: BanKind) -> Self {
        match value {
            BanKind::Auto => 1,
            BanKind::Manual => 2,
        }
    }
}

impl TryFrom<u8> for BanKind {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Auto),
            2 => Ok(Self::Manual),
            other => Err(format!("invalid ban type {other}; expected 1 or 2")),
        }
    }
}

/// A persisted IP ban.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct IpBan {
    pub id: i64,
    pub ip: String,
    pub reason: String,
    #[schema(value_type = u8)]
    pub ban_type: BanKind,
    /// `None` means the ban never expires.
    pub expire_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl IpBan {
    /// A ban whose expiry is at or before `now` counts as no ban.
    #[must_use]
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.expire_at.is_none_or(|expire_at| expire_at > now)
    }
}

/// Fields supplied when inserting or refreshing a ban.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewIpBan {
    pub ip: String,
    pub reason: String,
    pub ban_type: BanKind,
    pub expire_at: Option<DateTime<Utc>>,
}

/// Manual ban request from the moderation panel.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CreateIpBanRequest {
    pub ip: String,
    #[serde(default)]
    pub reason: Option<String>,
    /// Hours; `0` or absent bans permanently.
    #[serde(default)]
    pub duration: Option<u32>,
}

/// Query for a single address.
#[derive(Debug, Clone, Serialize, Deserialize, IntoParams)]
pub struct IpQuery {
    pub ip: String,
}

/// Whether an address is currently banned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct IpBanCheck {
    pub banned: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub info: Option<IpBan>,
}

/// A persisted whitelist entry. `ip` is an address or a CIDR block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct IpAllow {
    pub id: i64,
    pub ip: String,
    pub reason: String,
    /// `None` means the entry never expires.
    pub expire_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl IpAllow {
    #[must_use]
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.expire_at.is_none_or(|expire_at| expire_at > now)
    }

    /// Whether `ip` falls inside this entry. Unparseable rows match nothing.
    #[must_use]
    pub fn matches(&self, ip: std::net::IpAddr) -> bool {
        self.ip
            .parse::<crate::net::IpNet>()
            .is_ok_and(|net| net.contains(ip))
    }
}

/// Fields supplied when inserting a whitelist entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewIpAllow {
    pub ip: String,
    pub reason: String,
    pub expire_at: Option<DateTime<Utc>>,
}

/// Whitelist request from the moderation panel.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CreateIpAllowRequest {
    /// Address or CIDR block.
    pub ip: String,
    #[serde(default)]
    pub reason: Option<String>,
    /// Hours; `0` or absent whitelists permanently.
    #[serde(default)]
    pub duration: Option<u32>,
}

/// Whether an address is currently whitelisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct IpAllowCheck {
    pub whitelisted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub info: Option<IpAllow>,
}

/// Result of an expiry sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct CleanExpiredResponse {
    pub deleted_count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn ban(expire_at: Option<DateTime<Utc>>) -> IpBan {
        let now = Utc::now();
        IpBan {
            id: 1,
            ip: "198.51.100.4".into(),
            reason: "spam".into(),
            ban_type: BanKind::Manual,
            expire_at,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn permanent_bans_are_always_active() {
        assert!(ban(None).is_active(Utc::now() + Duration::days(3650)));
    }

    #[test]
    fn ban_expiring_now_is_inactive() {
        let now = Utc::now();
        assert!(!ban(Some(now)).is_active(now));
        assert!(ban(Some(now + Duration::seconds(1))).is_active(now));
    }

    #[test]
    fn ban_kind_wire_values() {
        assert_eq!(serde_json::to_value(BanKind::Auto).unwrap(), 1);
        assert_eq!(serde_json::to_value(BanKind::Manual).unwrap(), 2);
    }

    #[test]
    fn whitelist_entries_match_blocks_until_expiry() {
        let now = Utc::now();
        let entry = IpAllow {
            id: 1,
            ip: "10.8.0.0/16".into(),
            reason: String::new(),
            expire_at: Some(now + Duration::hours(2)),
            created_at: now,
            updated_at: now,
        };
        assert!(entry.matches("10.8.3.4".parse().unwrap()));
        assert!(!entry.matches("10.9.0.1".parse().unwrap()));
        assert!(entry.is_active(now));
        assert!(!entry.is_active(now + Duration::hours(2)));

        let broken = IpAllow {
            ip: "not-a-net".into(),
            ..entry
        };
        assert!(!broken.matches("10.8.3.4".parse().unwrap()));
    }
}
