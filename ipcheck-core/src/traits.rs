//! Common traits for IPCHECK.
//!
//! These traits define the seams where external systems plug in, so the
//! lookup service can be tested against fakes.

use std::net::IpAddr;

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{LookupFields, LookupKind};

// ═══════════════════════════════════════════════════════════════════════════════
// PROVIDER TRAIT
// ═══════════════════════════════════════════════════════════════════════════════

/// A definitive answer from a provider.
///
/// Transient trouble (network, timeouts, 5xx, rate limits) is reported as an
/// `Err` instead, so the caller can tell "ask again later" from "there is
/// nothing to find".
#[derive(Clone, Debug, PartialEq)]
pub enum ProviderOutcome {
    /// Data was found for the address.
    Found(LookupFields),
    /// The provider has no data for the address.
    NotFound(String),
}

/// Interface for an external geolocation / WHOIS source.
///
/// Implementations might use:
/// - HTTP JSON APIs (ip-api.com, ipapi.co)
/// - RDAP registries
/// - Local databases (MaxMind)
#[async_trait]
pub trait LookupProvider: Send + Sync {
    /// Stable provider name, used in logs, records and breaker stats.
    fn name(&self) -> &str;

    /// Which kind of lookup this provider answers.
    fn kind(&self) -> LookupKind;

    /// Looks up one address.
    ///
    /// Must return `ProviderTransient`/`ProviderTimeout` for errors worth
    /// retrying and `Ok(ProviderOutcome::NotFound)` for definitive misses.
    async fn lookup(&self, ip: IpAddr) -> Result<ProviderOutcome>;
}
