//! In-memory LRU tier.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use lru::LruCache;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::trace;

use ipcheck_core::clock::SharedClock;
use ipcheck_core::types::CacheEntry;

/// Memory tier statistics.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct MemoryStats {
    /// Entries currently held (including not yet purged expired ones)
    pub size: usize,
    /// Maximum number of entries
    pub capacity: usize,
    /// Reads served
    pub hits: u64,
    /// Reads that found nothing live
    pub misses: u64,
    /// Entries dropped to make room
    pub evictions: u64,
    /// Entries dropped because they expired
    pub expirations: u64,
}

/// Fixed-capacity in-memory cache with TTL expiry and LRU eviction.
///
/// Thread-safe. Every operation is total: a cache is an optimization, so
/// nothing here can fail.
pub struct MemoryTier<V> {
    entries: Mutex<LruCache<String, CacheEntry<V>>>,
    capacity: usize,
    clock: SharedClock,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
    // Bumped under the entries lock by every set, delete and clear.
    generation: AtomicU64,
}

impl<V: Clone> MemoryTier<V> {
    /// Creates a tier holding at most `max_entries` (minimum 1).
    pub fn new(max_entries: usize, clock: SharedClock) -> Self {
        let capacity = NonZeroUsize::new(max_entries).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            capacity: capacity.get(),
            clock,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
            generation: AtomicU64::new(0),
        }
    }

    /// Returns the value for `key` and marks it most recently used.
    ///
    /// An expired entry is removed and reported as a miss.
    pub fn get(&self, key: &str) -> Option<V> {
        let now = self.clock.now();
        let mut entries = self.entries.lock();

        let live = match entries.peek(key) {
            Some(entry) => entry.is_live(now),
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };

        if !live {
            entries.pop(key);
            self.expirations.fetch_add(1, Ordering::Relaxed);
            self.misses.fetch_add(1, Ordering::Relaxed);
            trace!(key, "memory entry expired");
            return None;
        }

        let entry = entries.get_mut(key)?;
        entry.hits += 1;
        self.hits.fetch_add(1, Ordering::Relaxed);
        Some(entry.value.clone())
    }

    /// Inserts or replaces `key`, expiring `ttl` from now.
    ///
    /// A new key at capacity evicts the least recently used entry. A zero
    /// TTL removes the key instead of storing a dead entry.
    pub fn set(&self, key: &str, value: V, ttl: Duration) {
        let entry = CacheEntry::new(value, self.clock.now(), ttl);
        let mut entries = self.entries.lock();
        self.generation.fetch_add(1, Ordering::SeqCst);
        match entry {
            Some(entry) => self.insert(&mut entries, key, entry),
            None => {
                entries.pop(key);
            }
        }
    }

    /// Stores `value` only if no set, delete or clear happened since
    /// `generation` was read. Returns true if the value was stored.
    pub(crate) fn set_if_unchanged(&self, key: &str, value: V, ttl: Duration, generation: u64) -> bool {
        let Some(entry) = CacheEntry::new(value, self.clock.now(), ttl) else {
            return false;
        };
        let mut entries = self.entries.lock();
        if self.generation.load(Ordering::SeqCst) != generation {
            return false;
        }
        self.insert(&mut entries, key, entry);
        true
    }

    /// Current write generation, see [`MemoryTier::set_if_unchanged`].
    pub(crate) fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    fn insert(&self, entries: &mut LruCache<String, CacheEntry<V>>, key: &str, entry: CacheEntry<V>) {
        if entries.contains(key) {
            entries.put(key.to_string(), entry);
            return;
        }
        if let Some((evicted, _)) = entries.push(key.to_string(), entry) {
            self.evictions.fetch_add(1, Ordering::Relaxed);
            trace!(key = %evicted, "memory entry evicted");
        }
    }

    /// Removes `key`. Returns true if it was present.
    pub fn delete(&self, key: &str) -> bool {
        let mut entries = self.entries.lock();
        self.generation.fetch_add(1, Ordering::SeqCst);
        entries.pop(key).is_some()
    }

    /// Removes every entry. Counters are kept.
    pub fn clear(&self) {
        let mut entries = self.entries.lock();
        self.generation.fetch_add(1, Ordering::SeqCst);
        entries.clear();
    }

    /// Removes all expired entries and returns how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.entries.lock();
        let expired: Vec<String> = entries
            .iter()
            .filter(|(_, e)| e.is_expired(now))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            entries.pop(key);
        }
        self.expirations.fetch_add(expired.len() as u64, Ordering::Relaxed);
        expired.len()
    }

    /// Returns true if `key` holds a live entry, without touching LRU order.
    pub fn contains(&self, key: &str) -> bool {
        let now = self.clock.now();
        self.entries
            .lock()
            .peek(key)
            .map(|e| e.is_live(now))
            .unwrap_or(false)
    }

    /// Returns the number of held entries.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns true if the tier is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub(crate) fn clock(&self) -> &SharedClock {
        &self.clock
    }

    /// Returns tier statistics.
    pub fn stats(&self) -> MemoryStats {
        MemoryStats {
            size: self.len(),
            capacity: self.capacity,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
        }
    }
}
