//! Address helpers used by the IP reputation gate.

use std::{
    fmt,
    net::{IpAddr, Ipv4Addr},
    str::FromStr,
};

use thiserror::Error;

/// Error returned when an address or CIDR block cannot be parsed.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum NetParseError {
    /// The address part is not a valid IPv4 or IPv6 address.
    #[error("invalid address '{0}'")]
    Address(String),
    /// The prefix length is not a number or exceeds the address width.
    #[error("invalid prefix length '{0}'")]
    Prefix(String),
}

/// An address block such as `10.0.0.0/8` or a single address such as
/// `192.168.1.7` (treated as a full-length prefix).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpNet {
    addr: IpAddr,
    prefix: u8,
}

impl IpNet {
    /// Returns `true` when `ip` falls inside this block.
    ///
    /// IPv4-mapped IPv6 addresses are compared in their IPv4 form.
    #[must_use]
    pub fn contains(&self, ip: IpAddr) -> bool {
        match (self.addr, ip.to_canonical()) {
            (IpAddr::V4(net), IpAddr::V4(candidate)) => {
                let mask = mask_u32(self.prefix);
                u32::from(net) & mask == u32::from(candidate) & mask
            }
            (IpAddr::V6(net), IpAddr::V6(candidate)) => {
                let mask = mask_u128(self.prefix);
                u128::from(net) & mask == u128::from(candidate) & mask
            }
            _ => false,
        }
    }

    /// Prefix length in bits.
    #[must_use]
    pub const fn prefix(&self) -> u8 {
        self.prefix
    }
}

fn mask_u32(prefix: u8) -> u32 {
    if prefix == 0 {
        0
    } else {
        u32::MAX << (32 - u32::from(prefix))
    }
}

fn mask_u128(prefix: u8) -> u128 {
    if prefix == 0 {
        0
    } else {
        u128::MAX << (128 - u32::from(prefix))
    }
}

impl FromStr for IpNet {
    type Err = NetParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let value = value.trim();
        let (addr_part, prefix_part) = match value.split_once('/') {
            Some((addr, prefix)) => (addr, Some(prefix)),
            None => (value, None),
        };

        let addr = addr_part
            .parse::<IpAddr>()
            .map_err(|_| NetParseError::Address(addr_part.to_string()))?
            .to_canonical();
        let width = match addr {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        };

        let prefix = match prefix_part {
            Some(raw) => raw
                .parse::<u8>()
                .ok()
                .filter(|prefix| *prefix <= width)
                .ok_or_else(|| NetParseError::Prefix(raw.to_string()))?,
            None => width,
        };

        Ok(Self { addr, prefix })
    }
}

impl fmt::Display for IpNet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.prefix)
    }
}

/// Returns `true` for `127.0.0.0/8`, `::1` and their IPv4-mapped forms.
#[must_use]
pub fn is_loopback(ip: IpAddr) -> bool {
    match ip.to_canonical() {
        IpAddr::V4(v4) => v4.is_loopback(),
        IpAddr::V6(v6) => v6.is_loopback(),
    }
}

/// Address used when no client address can be determined.
pub const FALLBACK_CLIENT_IP: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);
