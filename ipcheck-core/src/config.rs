//! Service configuration.
//!
//! Every recognized option lives in [`ServiceConfig`] with its default. The
//! configuration is read from the environment once at startup and validated
//! before any component is built.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::*;
use crate::error::{IpCheckError, Result};

/// Memory tier settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Maximum number of entries
    pub max_entries: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_entries: DEFAULT_MEMORY_MAX_ENTRIES,
        }
    }
}

/// Disk tier settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DiskConfig {
    /// Whether to run a disk tier at all
    pub enabled: bool,
    /// Directory holding the index and blobs
    pub dir: PathBuf,
    /// Byte budget for blobs
    pub max_bytes: u64,
}

impl Default for DiskConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: PathBuf::from(DEFAULT_CACHE_DIR),
            max_bytes: DEFAULT_DISK_MAX_MB * 1024 * 1024,
        }
    }
}

impl DiskConfig {
    /// Disk tier in `dir` with the given byte budget.
    pub fn new(dir: impl Into<PathBuf>, max_bytes: u64) -> Self {
        Self {
            enabled: true,
            dir: dir.into(),
            max_bytes,
        }
    }
}

/// How the two tiers share TTLs.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TieringConfig {
    /// Memory TTL used when a write does not specify one: `min(ttl, ceiling)`
    pub memory_ttl_ceiling: Duration,
    /// Memory TTL of entries promoted from disk: `min(remaining, ceiling)`
    pub promotion_ceiling: Duration,
    /// Period of the background memory sweep
    pub maintenance_interval: Duration,
}

impl Default for TieringConfig {
    fn default() -> Self {
        Self {
            memory_ttl_ceiling: Duration::from_secs(DEFAULT_MEMORY_TTL_CEILING_SECS),
            promotion_ceiling: Duration::from_secs(DEFAULT_PROMOTION_CEILING_SECS),
            maintenance_interval: Duration::from_secs(DEFAULT_MAINTENANCE_INTERVAL_SECS),
        }
    }
}

/// TTLs applied to lookup outcomes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TtlConfig {
    /// Successful lookups
    pub positive: Duration,
    /// Definitive not-found answers
    pub negative: Duration,
    /// Transient failures and open circuits
    pub error: Duration,
}

impl Default for TtlConfig {
    fn default() -> Self {
        Self {
            positive: Duration::from_secs(DEFAULT_POSITIVE_TTL_SECS),
            negative: Duration::from_secs(DEFAULT_NEGATIVE_TTL_SECS),
            error: Duration::from_secs(DEFAULT_ERROR_TTL_SECS),
        }
    }
}

/// Circuit breaker settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Consecutive failures that open the circuit
    pub failure_threshold: u32,
    /// How long the circuit stays open before probing
    pub recovery_timeout: Duration,
    /// Probes admitted, and successes required to close, while half-open
    pub half_open_max_probes: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            recovery_timeout: Duration::from_secs(DEFAULT_RECOVERY_TIMEOUT_SECS),
            half_open_max_probes: DEFAULT_HALF_OPEN_MAX_PROBES,
        }
    }
}

/// Per-call timeout and retry policy for provider calls.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Deadline of a single attempt
    pub timeout: Duration,
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry; doubles on each further retry
    pub backoff_base: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_PROVIDER_TIMEOUT_SECS),
            max_retries: DEFAULT_MAX_RETRIES,
            backoff_base: Duration::from_millis(DEFAULT_BACKOFF_BASE_MS),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (0-based): `backoff_base * 2^retry`.
    pub fn backoff(&self, retry: u32) -> Duration {
        self.backoff_base.saturating_mul(1u32 << retry.min(16))
    }
}

/// Bulk lookup limits.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BulkConfig {
    /// Concurrent lookups
    pub workers: usize,
    /// Maximum distinct ids processed per request
    pub limit: usize,
}

impl Default for BulkConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_BULK_WORKERS,
            limit: DEFAULT_BULK_LIMIT,
        }
    }
}

/// Provider endpoint templates; `{ip}` is substituted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProviderEndpoints {
    /// ip-api.com
    pub ip_api_url: String,
    /// ipapi.co
    pub ipapi_co_url: String,
    /// RDAP
    pub rdap_url: String,
}

impl Default for ProviderEndpoints {
    fn default() -> Self {
        Self {
            ip_api_url: DEFAULT_IP_API_URL.into(),
            ipapi_co_url: DEFAULT_IPAPI_CO_URL.into(),
            rdap_url: DEFAULT_RDAP_URL.into(),
        }
    }
}

/// Complete configuration of the lookup service.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Memory tier
    pub memory: MemoryConfig,
    /// Disk tier
    pub disk: DiskConfig,
    /// Tier TTL sharing
    pub tiering: TieringConfig,
    /// Outcome TTLs
    pub ttl: TtlConfig,
    /// Circuit breakers (one per provider)
    pub breaker: BreakerConfig,
    /// Provider call policy
    pub retry: RetryPolicy,
    /// Bulk lookups
    pub bulk: BulkConfig,
    /// Provider endpoints
    pub endpoints: ProviderEndpoints,
}

impl ServiceConfig {
    /// Reads the configuration from the process environment (and `.env`),
    /// then validates it.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the configuration from an arbitrary variable source, then
    /// validates it. Missing variables keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let secs = |name: &str| parse_var::<u64, _>(&lookup, name).map(|v| v.map(Duration::from_secs));

        if let Some(v) = parse_var(&lookup, "CACHE_MAX_SIZE")? {
            config.memory.max_entries = v;
        }
        if let Some(v) = lookup("CACHE_DIR") {
            config.disk.dir = PathBuf::from(v);
        }
        if let Some(v) = parse_bool(&lookup, "CACHE_DISK_ENABLED")? {
            config.disk.enabled = v;
        }
        if let Some(mb) = parse_var::<u64, _>(&lookup, "CACHE_DISK_MAX_MB")? {
            config.disk.max_bytes = mb.saturating_mul(1024 * 1024);
        }

        if let Some(v) = secs("CACHE_MEMORY_TTL_CEILING")? {
            config.tiering.memory_ttl_ceiling = v;
        }
        if let Some(v) = secs("CACHE_PROMOTION_CEILING")? {
            config.tiering.promotion_ceiling = v;
        }
        if let Some(v) = secs("CACHE_MAINTENANCE_INTERVAL")? {
            config.tiering.maintenance_interval = v;
        }

        if let Some(v) = secs("GEO_CACHE_TTL")? {
            config.ttl.positive = v;
        }
        if let Some(v) = secs("GEO_NEGATIVE_TTL")? {
            config.ttl.negative = v;
        }
        if let Some(v) = secs("GEO_ERROR_TTL")? {
            config.ttl.error = v;
        }

        if let Some(v) = parse_var(&lookup, "CIRCUIT_FAILURE_THRESHOLD")? {
            config.breaker.failure_threshold = v;
        }
        if let Some(v) = secs("CIRCUIT_RECOVERY_TIMEOUT")? {
            config.breaker.recovery_timeout = v;
        }
        if let Some(v) = parse_var(&lookup, "CIRCUIT_HALF_OPEN_PROBES")? {
            config.breaker.half_open_max_probes = v;
        }

        if let Some(v) = secs("GEO_TIMEOUT")? {
            config.retry.timeout = v;
        }
        if let Some(v) = parse_var(&lookup, "GEO_MAX_RETRIES")? {
            config.retry.max_retries = v;
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, "GEO_BACKOFF_MS")? {
            config.retry.backoff_base = Duration::from_millis(ms);
        }

        if let Some(v) = parse_var(&lookup, "GEO_BULK_WORKERS")? {
            config.bulk.workers = v;
        }
        if let Some(v) = parse_var(&lookup, "GEO_LOOKUP_LIMIT")? {
            config.bulk.limit = v;
        }

        if let Some(v) = lookup("GEO_API_URL") {
            config.endpoints.ip_api_url = v;
        }
        if let Some(v) = lookup("IPAPI_CO_URL") {
            config.endpoints.ipapi_co_url = v;
        }
        if let Some(v) = lookup("RDAP_URL") {
            config.endpoints.rdap_url = v;
        }

        config.validate()?;
        Ok(config)
    }

    /// Checks cross-field constraints.
    pub fn validate(&self) -> Result<()> {
        if self.memory.max_entries == 0 {
            return Err(IpCheckError::Config("memory.max_entries must be at least 1".into()));
        }
        if self.disk.enabled && self.disk.max_bytes == 0 {
            return Err(IpCheckError::Config("disk.max_bytes must be at least 1".into()));
        }
        if self.ttl.positive.is_zero() {
            return Err(IpCheckError::Config("ttl.positive must be non-zero".into()));
        }
        if self.ttl.negative.is_zero() || self.ttl.negative >= self.ttl.positive {
            return Err(IpCheckError::Config(
                "ttl.negative must be non-zero and shorter than ttl.positive".into(),
            ));
        }
        if self.ttl.error.is_zero() || self.ttl.error >= self.ttl.positive {
            return Err(IpCheckError::Config(
                "ttl.error must be non-zero and shorter than ttl.positive".into(),
            ));
        }
        if self.tiering.maintenance_interval.is_zero() {
            return Err(IpCheckError::Config("tiering.maintenance_interval must be non-zero".into()));
        }
        if self.breaker.failure_threshold == 0 {
            return Err(IpCheckError::Config("breaker.failure_threshold must be at least 1".into()));
        }
        if self.breaker.half_open_max_probes == 0 {
            return Err(IpCheckError::Config("breaker.half_open_max_probes must be at least 1".into()));
        }
        if self.retry.timeout.is_zero() {
            return Err(IpCheckError::Config("retry.timeout must be non-zero".into()));
        }
        if self.bulk.workers == 0 {
            return Err(IpCheckError::Config("bulk.workers must be at least 1".into()));
        }
        for (name, url) in [
            ("GEO_API_URL", &self.endpoints.ip_api_url),
            ("IPAPI_CO_URL", &self.endpoints.ipapi_co_url),
            ("RDAP_URL", &self.endpoints.rdap_url),
        ] {
            if !url.contains("{ip}") {
                return Err(IpCheckError::Config(format!("{} must contain an {{ip}} placeholder", name)));
            }
        }
        Ok(())
    }
}

fn parse_var<T, F>(lookup: &F, name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| IpCheckError::Config(format!("{}={:?}: {}", name, raw, e))),
    }
}

fn parse_bool<F>(lookup: &F, name: &str) -> Result<Option<bool>>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(name).map(|v| v.trim().to_lowercase()) {
        None => Ok(None),
        Some(v) if matches!(v.as_str(), "1" | "true" | "yes" | "on") => Ok(Some(true)),
        Some(v) if matches!(v.as_str(), "0" | "false" | "no" | "off") => Ok(Some(false)),
        Some(v) => Err(IpCheckError::Config(format!("{}={:?}: expected a boolean", name, v))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = ServiceConfig::default();
        config.validate().unwrap();
        assert!(config.ttl.negative < config.ttl.positive);
        assert!(config.ttl.error < config.ttl.positive);
    }

    #[test]
    fn test_from_lookup_overrides() {
        let config = ServiceConfig::from_lookup(lookup_from(&[
            ("CACHE_MAX_SIZE", "42"),
            ("CACHE_DIR", "/tmp/ipcheck"),
            ("CACHE_DISK_MAX_MB", "2"),
            ("CACHE_DISK_ENABLED", "off"),
            ("GEO_CACHE_TTL", "7200"),
            ("CIRCUIT_FAILURE_THRESHOLD", "2"),
            ("CIRCUIT_RECOVERY_TIMEOUT", "10"),
            ("GEO_BACKOFF_MS", "100"),
        ]))
        .unwrap();

        assert_eq!(config.memory.max_entries, 42);
        assert_eq!(config.disk.dir, PathBuf::from("/tmp/ipcheck"));
        assert_eq!(config.disk.max_bytes, 2 * 1024 * 1024);
        assert!(!config.disk.enabled);
        assert_eq!(config.ttl.positive, Duration::from_secs(7200));
        assert_eq!(config.breaker.failure_threshold, 2);
        assert_eq!(config.breaker.recovery_timeout, Duration::from_secs(10));
        assert_eq!(config.retry.backoff_base, Duration::from_millis(100));
    }

    #[test]
    fn test_unparsable_value_is_an_error() {
        let err = ServiceConfig::from_lookup(lookup_from(&[("CACHE_MAX_SIZE", "lots")])).unwrap_err();
        assert!(matches!(err, IpCheckError::Config(_)));
        assert!(err.to_string().contains("CACHE_MAX_SIZE"));
    }

    #[test]
    fn test_negative_ttl_must_be_shorter() {
        let err = ServiceConfig::from_lookup(lookup_from(&[
            ("GEO_CACHE_TTL", "60"),
            ("GEO_NEGATIVE_TTL", "60"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("ttl.negative"));
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let mut config = ServiceConfig::default();
        config.memory.max_entries = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_endpoint_needs_placeholder() {
        let err = ServiceConfig::from_lookup(lookup_from(&[("RDAP_URL", "https://rdap.org/ip/")])).unwrap_err();
        assert!(err.to_string().contains("RDAP_URL"));
    }

    #[test]
    fn test_backoff_doubles() {
        let policy = RetryPolicy {
            backoff_base: Duration::from_millis(100),
            ..Default::default()
        };
        assert_eq!(policy.backoff(0), Duration::from_millis(100));
        assert_eq!(policy.backoff(1), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(800));
    }
}
