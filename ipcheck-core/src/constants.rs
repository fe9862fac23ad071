//! Defaults and limits for IPCHECK.
//!
//! Values mirror what the dashboard shipped with; every one of them can be
//! overridden through [`ServiceConfig`](crate::config::ServiceConfig).

// ═══════════════════════════════════════════════════════════════════════════════
// MEMORY TIER
// ═══════════════════════════════════════════════════════════════════════════════

/// Default maximum number of entries held in memory.
pub const DEFAULT_MEMORY_MAX_ENTRIES: usize = 10_000;

/// Upper bound on the memory TTL when the caller does not pass one (seconds).
pub const DEFAULT_MEMORY_TTL_CEILING_SECS: u64 = 300;

/// Upper bound on the TTL of an entry promoted from disk into memory (seconds).
pub const DEFAULT_PROMOTION_CEILING_SECS: u64 = 60;

/// Interval of the background sweep of expired memory entries (seconds).
pub const DEFAULT_MAINTENANCE_INTERVAL_SECS: u64 = 300;

// ═══════════════════════════════════════════════════════════════════════════════
// DISK TIER
// ═══════════════════════════════════════════════════════════════════════════════

/// Default cache directory.
pub const DEFAULT_CACHE_DIR: &str = "./cache";

/// Default disk budget in megabytes.
pub const DEFAULT_DISK_MAX_MB: u64 = 100;

/// Eviction starts once the indexed size exceeds this share of the budget.
pub const DISK_HIGH_WATERMARK: f64 = 0.8;

/// Eviction stops once the indexed size is at or below this share of the budget.
pub const DISK_LOW_WATERMARK: f64 = 0.6;

// ═══════════════════════════════════════════════════════════════════════════════
// TTLS
// ═══════════════════════════════════════════════════════════════════════════════

/// TTL of a successful lookup (seconds).
pub const DEFAULT_POSITIVE_TTL_SECS: u64 = 3600;

/// TTL of a definitive not-found answer (seconds).
pub const DEFAULT_NEGATIVE_TTL_SECS: u64 = 300;

/// TTL of a transient failure or circuit-open result (seconds).
pub const DEFAULT_ERROR_TTL_SECS: u64 = 30;

// ═══════════════════════════════════════════════════════════════════════════════
// CIRCUIT BREAKER
// ═══════════════════════════════════════════════════════════════════════════════

/// Consecutive failures that open the circuit.
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;

/// Time the circuit stays open before probing (seconds).
pub const DEFAULT_RECOVERY_TIMEOUT_SECS: u64 = 30;

/// Probes admitted (and successes required) while half-open.
pub const DEFAULT_HALF_OPEN_MAX_PROBES: u32 = 1;

// ═══════════════════════════════════════════════════════════════════════════════
// PROVIDER CALLS
// ═══════════════════════════════════════════════════════════════════════════════

/// Per-attempt provider timeout (seconds).
pub const DEFAULT_PROVIDER_TIMEOUT_SECS: u64 = 5;

/// Retries after the first attempt for transient provider errors.
pub const DEFAULT_MAX_RETRIES: u32 = 2;

/// Base delay of the exponential backoff (milliseconds).
pub const DEFAULT_BACKOFF_BASE_MS: u64 = 250;

/// Concurrent lookups during a bulk request.
pub const DEFAULT_BULK_WORKERS: usize = 5;

/// Maximum ids processed by one bulk request.
pub const DEFAULT_BULK_LIMIT: usize = 50;

/// Longest textual IP address accepted (full IPv6 with embedded IPv4).
pub const MAX_IP_LENGTH: usize = 45;

// ═══════════════════════════════════════════════════════════════════════════════
// PROVIDER ENDPOINTS
// ═══════════════════════════════════════════════════════════════════════════════

/// ip-api.com endpoint; `{ip}` is substituted.
pub const DEFAULT_IP_API_URL: &str = "http://ip-api.com/json/{ip}?fields=status,message,continent,country,countryCode,regionName,city,zip,lat,lon,timezone,isp,org,as,query";

/// ipapi.co endpoint; `{ip}` is substituted.
pub const DEFAULT_IPAPI_CO_URL: &str = "https://ipapi.co/{ip}/json/";

/// RDAP bootstrap endpoint used for WHOIS data; `{ip}` is substituted.
pub const DEFAULT_RDAP_URL: &str = "https://rdap.org/ip/{ip}";

/// User agent sent to providers.
pub const USER_AGENT: &str = concat!("ipcheck/", env!("CARGO_PKG_VERSION"));
