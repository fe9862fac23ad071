//! Memory tier in front of an optional disk tier.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use ipcheck_core::config::TieringConfig;
use ipcheck_core::error::Result;

use crate::disk::{DiskStats, DiskTier, ReconcileReport};
use crate::memory::{MemoryStats, MemoryTier};

/// Combined statistics of both tiers.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct TieredStats {
    /// Memory tier
    pub memory: MemoryStats,
    /// Disk tier, if configured
    pub disk: Option<DiskStats>,
    /// Disk hits copied into memory
    pub promotions: u64,
}

/// Two-tier cache.
///
/// Reads check memory first and fall back to disk; a disk hit is promoted
/// into memory with a TTL no longer than what remains on disk. Writes go to
/// disk first, then memory. The memory lock is never held across disk I/O.
///
/// A promotion is dropped if any set, delete or clear reached the memory
/// tier while the disk read was in flight, so a deleted or overwritten key
/// is never brought back by a slower read.
pub struct TieredCache<V> {
    memory: MemoryTier<V>,
    disk: Option<DiskTier<V>>,
    config: TieringConfig,
    promotions: AtomicU64,
}

impl<V> TieredCache<V>
where
    V: Clone + Serialize + DeserializeOwned,
{
    /// Creates a cache from its tiers.
    pub fn new(memory: MemoryTier<V>, disk: Option<DiskTier<V>>, config: TieringConfig) -> Self {
        Self {
            memory,
            disk,
            config,
            promotions: AtomicU64::new(0),
        }
    }

    /// Creates a cache without a disk tier.
    pub fn memory_only(memory: MemoryTier<V>, config: TieringConfig) -> Self {
        Self::new(memory, None, config)
    }

    /// Returns true if a disk tier is configured.
    pub fn has_disk(&self) -> bool {
        self.disk.is_some()
    }

    /// Returns the live value for `key` from either tier.
    pub async fn get(&self, key: &str) -> Option<V> {
        if let Some(value) = self.memory.get(key) {
            return Some(value);
        }

        let disk = self.disk.as_ref()?;
        let generation = self.memory.generation();
        let entry = disk.get(key).await?;

        let now = self.memory.clock().now();
        let ttl = entry.remaining_ttl(now).min(self.config.promotion_ceiling);
        if self.memory.set_if_unchanged(key, entry.value.clone(), ttl, generation) {
            self.promotions.fetch_add(1, Ordering::Relaxed);
            trace!(key, ?ttl, "promoted disk entry to memory");
        } else {
            trace!(key, "concurrent write, promotion skipped");
        }

        Some(entry.value)
    }

    /// Stores `value` in both tiers.
    ///
    /// The disk copy lives for `ttl`. The memory copy lives for `memory_ttl`
    /// if given, otherwise `min(ttl, memory_ttl_ceiling)`; it never outlives
    /// the disk copy. Without a disk tier memory keeps the full `ttl`.
    pub async fn set(&self, key: &str, value: V, ttl: Duration, memory_ttl: Option<Duration>) {
        let memory_ttl = match &self.disk {
            Some(disk) => {
                disk.set(key, &value, ttl).await;
                memory_ttl
                    .unwrap_or(self.config.memory_ttl_ceiling)
                    .min(ttl)
            }
            None => memory_ttl.unwrap_or(ttl).min(ttl),
        };
        self.memory.set(key, value, memory_ttl);
    }

    /// Removes `key` from both tiers. Returns true if either held it.
    pub async fn delete(&self, key: &str) -> bool {
        let on_disk = match &self.disk {
            Some(disk) => disk.delete(key).await,
            None => false,
        };
        let in_memory = self.memory.delete(key);
        in_memory || on_disk
    }

    /// Empties both tiers.
    pub async fn clear(&self) {
        if let Some(disk) = &self.disk {
            disk.clear().await;
        }
        self.memory.clear();
    }

    /// Reconciles the disk tier with its directory. `None` without a disk tier.
    pub async fn reconcile(&self) -> Result<Option<ReconcileReport>> {
        match &self.disk {
            Some(disk) => disk.reconcile().await.map(Some),
            None => Ok(None),
        }
    }

    /// Returns statistics of both tiers.
    pub async fn stats(&self) -> TieredStats {
        let disk = match &self.disk {
            Some(disk) => Some(disk.stats().await),
            None => None,
        };
        TieredStats {
            memory: self.memory.stats(),
            disk,
            promotions: self.promotions.load(Ordering::Relaxed),
        }
    }
}

impl<V> TieredCache<V>
where
    V: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Starts the periodic sweep of expired memory entries.
    ///
    /// Each tick also saves the disk tier's access order. The task holds
    /// only a weak reference and stops once the cache is dropped. Disk
    /// entries expire lazily on access.
    pub fn spawn_maintenance(self: &Arc<Self>) -> JoinHandle<()> {
        let cache = Arc::downgrade(self);
        let period = self.config.maintenance_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(cache) = cache.upgrade() else {
                    debug!("cache dropped, stopping maintenance");
                    break;
                };
                let purged = cache.memory.purge_expired();
                if purged > 0 {
                    debug!(purged, "purged expired memory entries");
                }
                if let Some(disk) = &cache.disk {
                    disk.flush().await;
                }
            }
        })
    }
}
