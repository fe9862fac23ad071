//! # IPCHECK Lookup
//!
//! Resilient geolocation, WHOIS and reverse DNS lookups.
//!
//! ## Features
//!
//! - **Circuit Breaking**: one [`CircuitBreaker`] per provider isolates a failing upstream
//! - **Retries**: per-attempt deadline plus exponential backoff for transient errors
//! - **Fallback**: providers of a kind are tried in priority order
//! - **Asymmetric Caching**: successes live long, misses and failures briefly
//! - **Bulk Lookups**: deduplicated, bounded concurrency, input order preserved
//!
//! ## Example
//!
//! ```rust,ignore
//! use ipcheck_core::ServiceConfig;
//! use ipcheck_lookup::{LookupOptions, LookupService};
//!
//! let service = LookupService::from_config(ServiceConfig::from_env()?).await?;
//!
//! let record = service.get_location("8.8.8.8", LookupOptions::default()).await;
//! println!("{} -> {:?}", record.id, record.field_str("country"));
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod breaker;
pub mod providers;
pub mod retry;
pub mod service;

pub use breaker::{BreakerStats, CircuitBreaker, CircuitState};
pub use providers::{IpApiCoProvider, IpApiProvider, RdapProvider, ReverseDnsProvider};
pub use retry::call_with_retry;
pub use service::{LookupOptions, LookupService, LookupServiceBuilder, ServiceStats};
