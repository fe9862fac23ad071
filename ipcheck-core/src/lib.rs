//! # IPCHECK Core
//!
//! Core types, errors, and traits shared by the IPCHECK lookup crates.
//!
//! - **Types**: cache entries, cache keys, lookup records
//! - **Errors**: the [`IpCheckError`] taxonomy
//! - **Clock**: injectable wall clock so expiry logic can be tested under skew
//! - **Config**: the validated [`ServiceConfig`] read once at startup
//! - **Traits**: the [`LookupProvider`] seam for external data sources
//!
//! ## Example
//!
//! ```rust
//! use ipcheck_core::{CacheKey, LookupKind};
//!
//! let ip = "8.8.8.8".parse().unwrap();
//! let key = CacheKey::lookup(LookupKind::Geo, ip);
//! assert_eq!(key.as_str(), "lookup:geo:8.8.8.8");
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, clippy::all)]

pub mod clock;
pub mod config;
pub mod constants;
pub mod error;
pub mod traits;
pub mod types;

// Re-export commonly used items at crate root
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use config::ServiceConfig;
pub use error::{IpCheckError, Result};
pub use traits::*;
pub use types::*;
