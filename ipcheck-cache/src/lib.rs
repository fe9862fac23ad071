//! # IPCHECK Cache
//!
//! Two-tier TTL cache for lookup results.
//!
//! - **Memory** ([`MemoryTier`]): fixed-capacity LRU with per-entry TTL
//! - **Disk** ([`DiskTier`]): byte-bounded blob store with a persisted index
//! - **Tiered** ([`TieredCache`]): memory in front of disk, with promotion
//!
//! ## Example
//!
//! ```rust,ignore
//! use ipcheck_cache::{DiskTier, MemoryTier, TieredCache};
//!
//! let disk = DiskTier::open(disk_config, clock.clone()).await?;
//! let cache = TieredCache::new(MemoryTier::new(1000, clock.clone()), Some(disk), tiering);
//!
//! cache.set("lookup:geo:8.8.8.8", record, Duration::from_secs(3600), None).await;
//! let hit = cache.get("lookup:geo:8.8.8.8").await;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

mod disk;
mod memory;
mod tiered;

pub use disk::{DiskStats, DiskTier, ReconcileReport};
pub use memory::{MemoryStats, MemoryTier};
pub use tiered::{TieredCache, TieredStats};
