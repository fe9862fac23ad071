//! Cache entries shared by the memory and disk tiers.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::clock::{add_duration, saturating_elapsed};

/// A cached value plus the metadata both tiers track for it.
///
/// `expires_at > created_at` always holds: constructors return `None` for a
/// zero TTL instead of building an entry that is dead on arrival.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry<V> {
    /// The cached value
    pub value: V,
    /// When the entry was written
    pub created_at: DateTime<Utc>,
    /// When the entry stops being served
    pub expires_at: DateTime<Utc>,
    /// Number of reads served from this entry
    #[serde(default)]
    pub hits: u64,
}

impl<V> CacheEntry<V> {
    /// Creates an entry written at `now` that lives for `ttl`.
    ///
    /// Returns `None` when `ttl` is zero.
    pub fn new(value: V, now: DateTime<Utc>, ttl: Duration) -> Option<Self> {
        let expires_at = add_duration(now, ttl);
        if expires_at <= now {
            return None;
        }
        Some(Self {
            value,
            created_at: now,
            expires_at,
            hits: 0,
        })
    }

    /// Returns true if the entry may be served at `now`.
    ///
    /// An entry whose creation time lies in the future means the clock was
    /// set back; it is treated as expired so a backwards jump can never
    /// stretch an entry past its original TTL.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.created_at <= now && now < self.expires_at
    }

    /// Returns true if the entry must not be served at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        !self.is_live(now)
    }

    /// Time left before expiry, zero if already expired.
    pub fn remaining_ttl(&self, now: DateTime<Utc>) -> Duration {
        if self.is_live(now) {
            saturating_elapsed(self.expires_at, now)
        } else {
            Duration::ZERO
        }
    }

    /// The TTL the entry was written with.
    pub fn ttl(&self) -> Duration {
        saturating_elapsed(self.expires_at, self.created_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    #[test]
    fn test_zero_ttl_rejected() {
        assert!(CacheEntry::new("v", Utc::now(), Duration::ZERO).is_none());
    }

    #[test]
    fn test_live_window() {
        let now = Utc::now();
        let entry = CacheEntry::new("v", now, Duration::from_secs(10)).unwrap();

        assert!(entry.expires_at > entry.created_at);
        assert!(entry.is_live(now));
        assert!(entry.is_live(now + ChronoDuration::seconds(9)));
        assert!(entry.is_expired(now + ChronoDuration::seconds(10)));
        assert!(entry.is_expired(now - ChronoDuration::seconds(1)));
    }

    #[test]
    fn test_remaining_ttl() {
        let now = Utc::now();
        let entry = CacheEntry::new("v", now, Duration::from_secs(10)).unwrap();

        assert_eq!(entry.ttl(), Duration::from_secs(10));
        assert_eq!(entry.remaining_ttl(now + ChronoDuration::seconds(4)), Duration::from_secs(6));
        assert_eq!(entry.remaining_ttl(now + ChronoDuration::seconds(40)), Duration::ZERO);
    }
}
