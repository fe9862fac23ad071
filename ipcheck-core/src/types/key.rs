//! Cache keys.

use std::fmt;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use crate::constants::MAX_IP_LENGTH;
use crate::error::{IpCheckError, Result};

/// What kind of data a lookup fetches.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LookupKind {
    /// Country, city, coordinates, ISP
    Geo,
    /// Network registration data (RDAP)
    Whois,
    /// PTR hostname
    #[serde(rename = "rdns")]
    ReverseDns,
}

impl LookupKind {
    /// Short tag used in cache keys and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            LookupKind::Geo => "geo",
            LookupKind::Whois => "whois",
            LookupKind::ReverseDns => "rdns",
        }
    }
}

impl fmt::Display for LookupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cache key for a lookup.
///
/// Keys are only built from parsed addresses, so every spelling of the same
/// address (`2001:DB8:0:0:0:0:0:1`, `2001:db8::1`) maps to one key.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    /// Key for a lookup of `kind` on `ip`: `lookup:{kind}:{ip}`.
    pub fn lookup(kind: LookupKind, ip: IpAddr) -> Self {
        Self(format!("lookup:{}:{}", kind.as_str(), ip))
    }

    /// Returns the key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Parses and validates a lookup identifier.
///
/// Accepts any IPv4/IPv6 address except the unspecified address, multicast
/// and the IPv4 broadcast address. Private ranges are allowed: the dashboard
/// looks up LAN peers too and providers answer them with a definitive
/// not-found.
pub fn parse_ip(id: &str) -> Result<IpAddr> {
    let trimmed = id.trim();
    if trimmed.is_empty() {
        return Err(IpCheckError::InvalidInput("IP address cannot be empty".into()));
    }
    if trimmed.len() > MAX_IP_LENGTH {
        return Err(IpCheckError::InvalidInput("IP address too long".into()));
    }

    let ip: IpAddr = trimmed
        .parse()
        .map_err(|_| IpCheckError::InvalidInput(format!("Invalid IP address: {}", trimmed)))?;

    if ip.is_unspecified() {
        return Err(IpCheckError::InvalidInput("Unspecified address not allowed".into()));
    }
    if ip.is_multicast() {
        return Err(IpCheckError::InvalidInput("Multicast addresses not allowed".into()));
    }
    if let IpAddr::V4(v4) = ip {
        if v4.is_broadcast() {
            return Err(IpCheckError::InvalidInput("Broadcast address not allowed".into()));
        }
    }
    Ok(ip)
}

/// Returns true for loopback, private, link-local and unique-local addresses.
pub fn is_private_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_private() || v4.is_loopback() || v4.is_link_local(),
        IpAddr::V6(v6) => {
            let first = v6.segments()[0];
            v6.is_loopback()
                || (first & 0xfe00) == 0xfc00
                || (first & 0xffc0) == 0xfe80
                || v6.to_ipv4_mapped().map(|v4| is_private_ip(IpAddr::V4(v4))).unwrap_or(false)
        }
    }
}
