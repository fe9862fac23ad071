//! Domain types for IPCHECK.
//!
//! - [`CacheEntry`]: a cached value with its expiry metadata
//! - [`CacheKey`]: structured cache key for a lookup
//! - [`LookupRecord`]: the result of one lookup, cached or fresh

mod entry;
mod key;
mod record;

pub use entry::*;
pub use key::*;
pub use record::*;
