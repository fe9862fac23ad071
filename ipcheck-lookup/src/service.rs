//! Lookup orchestration.
//!
//! Validation, cache lookup, breaker-guarded provider fallback and
//! asymmetric outcome caching. The service never returns an error: every
//! path ends in a [`LookupRecord`].

use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use ipcheck_cache::{DiskTier, MemoryTier, ReconcileReport, TieredCache, TieredStats};
use ipcheck_core::clock::{SharedClock, SystemClock};
use ipcheck_core::config::{BulkConfig, RetryPolicy, ServiceConfig, TtlConfig};
use ipcheck_core::error::Result;
use ipcheck_core::traits::{LookupProvider, ProviderOutcome};
use ipcheck_core::types::{parse_ip, CacheKey, LookupKind, LookupRecord};

use crate::breaker::{BreakerStats, CircuitBreaker, CircuitState};
use crate::providers::{IpApiCoProvider, IpApiProvider, RdapProvider, ReverseDnsProvider};
use crate::retry::call_with_retry;

/// Per-call options.
#[derive(Clone, Copy, Debug, Default)]
pub struct LookupOptions {
    /// Ignore cached records and ask the providers (the result is still cached)
    pub skip_cache: bool,
}

impl LookupOptions {
    /// Options that bypass the cache read.
    pub fn fresh() -> Self {
        Self { skip_cache: true }
    }
}

/// Service counters and component snapshots.
#[derive(Clone, Debug, Serialize)]
pub struct ServiceStats {
    /// Cache tiers
    pub cache: TieredStats,
    /// Worst state across all breakers
    pub circuit_state: CircuitState,
    /// Per-provider breakers
    pub breakers: Vec<BreakerStats>,
    /// Lookups requested (bulk overflow excluded)
    pub requests: u64,
    /// Lookups answered from cache
    pub cache_hits: u64,
    /// Lookups that had to ask providers
    pub cache_misses: u64,
    /// Provider calls that failed after retries
    pub provider_errors: u64,
    /// Provider calls skipped by an open breaker
    pub circuit_rejections: u64,
}

#[derive(Default)]
struct Counters {
    requests: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    provider_errors: AtomicU64,
    circuit_rejections: AtomicU64,
}

struct ProviderSlot {
    provider: Arc<dyn LookupProvider>,
    breaker: Arc<CircuitBreaker>,
}

/// Builds a [`LookupService`] with custom providers or clock.
pub struct LookupServiceBuilder {
    config: ServiceConfig,
    clock: SharedClock,
    providers: Vec<Arc<dyn LookupProvider>>,
    maintenance: bool,
}

impl LookupServiceBuilder {
    /// Starts from `config` with the system clock and no providers.
    pub fn new(config: ServiceConfig) -> Self {
        Self {
            config,
            clock: SystemClock::shared(),
            providers: Vec::new(),
            maintenance: true,
        }
    }

    /// Uses `clock` for every component.
    pub fn clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    /// Appends a provider. Providers of a kind are tried in the order added.
    pub fn provider(mut self, provider: Arc<dyn LookupProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    /// Appends the standard providers: ipapi.co then ip-api.com for
    /// geolocation, RDAP for WHOIS and the system resolver for reverse DNS.
    ///
    /// A missing resolver configuration only disables reverse DNS.
    pub fn default_providers(self) -> Result<Self> {
        let endpoints = self.config.endpoints.clone();
        let builder = self
            .provider(Arc::new(IpApiCoProvider::new(endpoints.ipapi_co_url)?))
            .provider(Arc::new(IpApiProvider::new(endpoints.ip_api_url)?))
            .provider(Arc::new(RdapProvider::new(endpoints.rdap_url)?));
        match ReverseDnsProvider::from_system_conf() {
            Ok(provider) => Ok(builder.provider(Arc::new(provider))),
            Err(e) => {
                warn!(error = %e, "Reverse DNS disabled");
                Ok(builder)
            }
        }
    }

    /// Disables the background memory sweep.
    pub fn without_maintenance(mut self) -> Self {
        self.maintenance = false;
        self
    }

    /// Validates the configuration and builds the service.
    ///
    /// An unusable cache directory is not fatal: the service logs it and
    /// runs with the memory tier only.
    pub async fn build(self) -> Result<LookupService> {
        let config = self.config;
        config.validate()?;

        let memory = MemoryTier::new(config.memory.max_entries, self.clock.clone());
        let disk = if config.disk.enabled {
            match DiskTier::open(&config.disk, self.clock.clone()).await {
                Ok(disk) => Some(disk),
                Err(e) => {
                    warn!(error = %e, "Disk cache unavailable, running memory-only");
                    None
                }
            }
        } else {
            None
        };
        let cache = Arc::new(TieredCache::new(memory, disk, config.tiering.clone()));
        let maintenance = self.maintenance.then(|| cache.spawn_maintenance());

        let providers: Vec<ProviderSlot> = self
            .providers
            .into_iter()
            .map(|provider| ProviderSlot {
                breaker: Arc::new(CircuitBreaker::new(
                    provider.name(),
                    config.breaker.clone(),
                    self.clock.clone(),
                )),
                provider,
            })
            .collect();

        info!(
            providers = providers.len(),
            disk = cache.has_disk(),
            "Lookup service ready"
        );

        // Error records expire within the open window so cached lookups
        // still reach the half-open breaker.
        let mut ttl = config.ttl;
        ttl.error = ttl.error.min(config.breaker.recovery_timeout);

        Ok(LookupService {
            cache,
            providers,
            ttl,
            retry: config.retry,
            bulk: config.bulk,
            clock: self.clock,
            counters: Counters::default(),
            maintenance,
        })
    }
}

/// Geolocation and WHOIS lookups with caching and circuit breaking.
///
/// Construct once at startup and share through an `Arc`.
pub struct LookupService {
    cache: Arc<TieredCache<LookupRecord>>,
    providers: Vec<ProviderSlot>,
    ttl: TtlConfig,
    retry: RetryPolicy,
    bulk: BulkConfig,
    clock: SharedClock,
    counters: Counters,
    maintenance: Option<JoinHandle<()>>,
}

impl LookupService {
    /// Builds the service with the default HTTP providers.
    pub async fn from_config(config: ServiceConfig) -> Result<Self> {
        LookupServiceBuilder::new(config).default_providers()?.build().await
    }

    /// Starts a builder.
    pub fn builder(config: ServiceConfig) -> LookupServiceBuilder {
        LookupServiceBuilder::new(config)
    }

    /// Looks up `id`.
    ///
    /// Invalid ids produce an `Error` record without touching the cache or
    /// the network. Cached records come back with `cached = true`.
    #[instrument(skip(self, opts), fields(kind = %kind))]
    pub async fn lookup(&self, kind: LookupKind, id: &str, opts: LookupOptions) -> LookupRecord {
        self.counters.requests.fetch_add(1, Ordering::Relaxed);

        let ip = match parse_ip(id) {
            Ok(ip) => ip,
            Err(e) => {
                debug!(error = %e, "rejected lookup id");
                return LookupRecord::error(id.trim(), kind, e.to_string(), self.clock.now());
            }
        };
        let key = CacheKey::lookup(kind, ip);

        if !opts.skip_cache {
            if let Some(record) = self.cache.get(key.as_str()).await {
                self.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
                debug!(key = %key, status = %record.status, "cache hit");
                return record.into_cached();
            }
            self.counters.cache_misses.fetch_add(1, Ordering::Relaxed);
            debug!(key = %key, "cache miss");
        }

        let (record, ttl) = self.fetch(kind, ip).await;
        self.cache.set(key.as_str(), record.clone(), ttl, None).await;
        record
    }

    /// Geolocation lookup.
    pub async fn get_location(&self, id: &str, opts: LookupOptions) -> LookupRecord {
        self.lookup(LookupKind::Geo, id, opts).await
    }

    /// WHOIS lookup.
    pub async fn get_whois(&self, id: &str, opts: LookupOptions) -> LookupRecord {
        self.lookup(LookupKind::Whois, id, opts).await
    }

    /// Reverse DNS hostname for one address.
    pub async fn get_reverse_dns(&self, id: &str, opts: LookupOptions) -> LookupRecord {
        self.lookup(LookupKind::ReverseDns, id, opts).await
    }

    /// Looks up many ids concurrently.
    ///
    /// Duplicates (after normalization) are dropped, keeping the first
    /// occurrence. Only the first `bulk.limit` distinct ids are looked up;
    /// the rest get an `Error` record. At most `bulk.workers` lookups run at
    /// once and results follow input order.
    #[instrument(skip(self, ids, opts), fields(kind = %kind, count = ids.len()))]
    pub async fn bulk_lookup<S: AsRef<str>>(
        &self,
        kind: LookupKind,
        ids: &[S],
        opts: LookupOptions,
    ) -> Vec<LookupRecord> {
        let mut seen = HashSet::new();
        let unique: Vec<&str> = ids
            .iter()
            .map(|id| id.as_ref().trim())
            .filter(|id| {
                let normalized = parse_ip(id).map(|ip| ip.to_string()).unwrap_or_else(|_| id.to_string());
                seen.insert(normalized)
            })
            .collect();

        let limit = self.bulk.limit.min(unique.len());
        let (within, overflow) = unique.split_at(limit);
        if !overflow.is_empty() {
            warn!(limit = self.bulk.limit, skipped = overflow.len(), "Bulk lookup truncated");
        }

        let mut results: Vec<LookupRecord> = stream::iter(within.iter().map(|id| self.lookup(kind, id, opts)))
            .buffered(self.bulk.workers.max(1))
            .collect()
            .await;

        let now = self.clock.now();
        results.extend(overflow.iter().map(|id| {
            LookupRecord::error(
                *id,
                kind,
                format!("Bulk limit of {} ids exceeded", self.bulk.limit),
                now,
            )
        }));
        results
    }

    /// Geolocation for many ids.
    pub async fn bulk_get_location<S: AsRef<str>>(&self, ids: &[S], opts: LookupOptions) -> Vec<LookupRecord> {
        self.bulk_lookup(LookupKind::Geo, ids, opts).await
    }

    /// Returns counters and component snapshots.
    pub async fn stats(&self) -> ServiceStats {
        let breakers: Vec<BreakerStats> = self.providers.iter().map(|s| s.breaker.stats()).collect();
        let circuit_state = breakers
            .iter()
            .map(|b| b.state)
            .max()
            .unwrap_or(CircuitState::Closed);

        ServiceStats {
            cache: self.cache.stats().await,
            circuit_state,
            breakers,
            requests: self.counters.requests.load(Ordering::Relaxed),
            cache_hits: self.counters.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.counters.cache_misses.load(Ordering::Relaxed),
            provider_errors: self.counters.provider_errors.load(Ordering::Relaxed),
            circuit_rejections: self.counters.circuit_rejections.load(Ordering::Relaxed),
        }
    }

    /// Empties both cache tiers.
    pub async fn clear(&self) {
        self.cache.clear().await;
        info!("Lookup cache cleared");
    }

    /// Reconciles the disk tier with its directory, if there is one.
    pub async fn reconcile(&self) -> Result<Option<ReconcileReport>> {
        self.cache.reconcile().await
    }

    /// Asks the providers of `kind` in order and picks the TTL for the outcome.
    async fn fetch(&self, kind: LookupKind, ip: IpAddr) -> (LookupRecord, Duration) {
        let id = ip.to_string();
        let mut not_found: Option<(String, String)> = None;
        let mut last_error: Option<String> = None;
        let mut candidates = 0;

        for slot in self.providers.iter().filter(|s| s.provider.kind() == kind) {
            candidates += 1;
            let name = slot.provider.name();
            let provider = &slot.provider;

            let result = slot
                .breaker
                .execute(|| call_with_retry(name, &self.retry, || provider.lookup(ip)))
                .await;

            match result {
                Ok(ProviderOutcome::Found(fields)) => {
                    debug!(provider = name, "provider answered");
                    let record = LookupRecord::success(id, kind, name, fields, self.clock.now());
                    return (record, self.ttl.positive);
                }
                Ok(ProviderOutcome::NotFound(message)) => {
                    debug!(provider = name, %message, "provider has no data");
                    not_found.get_or_insert((name.to_string(), message));
                }
                Err(e) if e.is_circuit_open() => {
                    self.counters.circuit_rejections.fetch_add(1, Ordering::Relaxed);
                    debug!(provider = name, "circuit open, skipping provider");
                }
                Err(e) => {
                    self.counters.provider_errors.fetch_add(1, Ordering::Relaxed);
                    warn!(provider = name, error = %e, "Provider lookup failed");
                    last_error = Some(e.to_string());
                }
            }
        }

        let now = self.clock.now();
        if let Some((provider, message)) = not_found {
            return (
                LookupRecord::not_found(id, kind, provider, message, now),
                self.ttl.negative,
            );
        }

        let message = match last_error {
            Some(e) => format!("Lookup failed: {}", e),
            None if candidates == 0 => format!("No {} provider configured", kind),
            None => "Service temporarily unavailable (circuit breaker open)".to_string(),
        };
        (LookupRecord::error(id, kind, message, now), self.ttl.error)
    }
}

impl Drop for LookupService {
    fn drop(&mut self) {
        if let Some(handle) = self.maintenance.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use ipcheck_core::clock::ManualClock;
    use ipcheck_core::config::DiskConfig;
    use ipcheck_core::error::IpCheckError;
    use ipcheck_core::types::{LookupFields, LookupStatus};
    use serde_json::json;
    use std::sync::atomic::AtomicU32;
    use test_case::test_case;

    type Script = Box<dyn Fn(IpAddr) -> Result<ProviderOutcome> + Send + Sync>;

    struct FakeProvider {
        name: &'static str,
        kind: LookupKind,
        script: Script,
        calls: AtomicU32,
    }

    impl FakeProvider {
        fn new(
            name: &'static str,
            kind: LookupKind,
            script: impl Fn(IpAddr) -> Result<ProviderOutcome> + Send + Sync + 'static,
        ) -> Arc<Self> {
            Arc::new(Self {
                name,
                kind,
                script: Box::new(script),
                calls: AtomicU32::new(0),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl LookupProvider for FakeProvider {
        fn name(&self) -> &str {
            self.name
        }

        fn kind(&self) -> LookupKind {
            self.kind
        }

        async fn lookup(&self, ip: IpAddr) -> Result<ProviderOutcome> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            (self.script)(ip)
        }
    }

    fn country(code: &str) -> Result<ProviderOutcome> {
        let mut fields = LookupFields::new();
        fields.insert("country".into(), json!(code));
        Ok(ProviderOutcome::Found(fields))
    }

    fn outage(name: &str) -> Result<ProviderOutcome> {
        Err(IpCheckError::transient(name, "HTTP 503"))
    }

    fn test_config() -> ServiceConfig {
        let mut config = ServiceConfig::default();
        config.disk.enabled = false;
        config.breaker.failure_threshold = 2;
        config.breaker.recovery_timeout = Duration::from_secs(10);
        config.retry.max_retries = 0;
        config.retry.backoff_base = Duration::from_millis(1);
        config
    }

    async fn service_with(
        config: ServiceConfig,
        providers: &[Arc<FakeProvider>],
    ) -> (LookupService, Arc<ManualClock>) {
        let clock = ManualClock::starting_now();
        let mut builder = LookupService::builder(config)
            .clock(clock.clone())
            .without_maintenance();
        for p in providers {
            builder = builder.provider(p.clone());
        }
        (builder.build().await.unwrap(), clock)
    }

    #[tokio::test]
    async fn test_success_is_cached() {
        let geo = FakeProvider::new("geo", LookupKind::Geo, |_| country("US"));
        let (service, _) = service_with(test_config(), &[geo.clone()]).await;

        let first = service.get_location("8.8.8.8", LookupOptions::default()).await;
        assert_eq!(first.status, LookupStatus::Success);
        assert!(!first.cached);
        assert_eq!(first.provider.as_deref(), Some("geo"));

        let second = service.get_location("8.8.8.8", LookupOptions::default()).await;
        assert!(second.cached);
        assert_eq!(second.field_str("country"), Some("US"));
        assert_eq!(second.looked_up_at, first.looked_up_at);
        assert_eq!(geo.calls(), 1);

        let stats = service.stats().await;
        assert_eq!(stats.cache_hits, 1);
        assert_eq!(stats.cache_misses, 1);
    }

    #[tokio::test]
    async fn test_breaker_scenario() {
        let geo = FakeProvider::new("geo", LookupKind::Geo, |_| outage("geo"));
        let (service, clock) = service_with(test_config(), &[geo.clone()]).await;

        for _ in 0..2 {
            let record = service.get_location("10.0.0.1", LookupOptions::fresh()).await;
            assert_eq!(record.status, LookupStatus::Error);
        }
        assert_eq!(geo.calls(), 2);
        assert_eq!(service.stats().await.circuit_state, CircuitState::Open);

        clock.advance(Duration::from_secs(1));
        let cached = service.get_location("10.0.0.1", LookupOptions::default()).await;
        assert_eq!(cached.status, LookupStatus::Error);
        assert!(cached.cached);

        let rejected = service.get_location("10.0.0.1", LookupOptions::fresh()).await;
        assert_eq!(rejected.status, LookupStatus::Error);
        assert!(rejected.message.unwrap().contains("temporarily unavailable"));
        assert_eq!(geo.calls(), 2);

        clock.advance(Duration::from_secs(10));
        service.get_location("10.0.0.1", LookupOptions::default()).await;
        assert_eq!(geo.calls(), 3);
    }

    #[tokio::test]
    async fn test_cached_error_expires_with_recovery_timeout() {
        let geo = FakeProvider::new("geo", LookupKind::Geo, |_| outage("geo"));
        let config = test_config();
        assert!(config.ttl.error > config.breaker.recovery_timeout);
        let (service, clock) = service_with(config, &[geo.clone()]).await;

        service.get_location("10.0.0.1", LookupOptions::default()).await;
        let cached = service.get_location("10.0.0.1", LookupOptions::default()).await;
        assert!(cached.cached);
        assert_eq!(geo.calls(), 1);

        clock.advance(Duration::from_secs(11));
        let record = service.get_location("10.0.0.1", LookupOptions::default()).await;
        assert!(!record.cached);
        assert_eq!(geo.calls(), 2);
    }

    #[tokio::test]
    async fn test_negative_ttl_shorter_than_positive() {
        let geo = FakeProvider::new("geo", LookupKind::Geo, |ip| {
            if ip.to_string() == "10.0.0.1" {
                Ok(ProviderOutcome::NotFound("private range".into()))
            } else {
                country("US")
            }
        });
        let config = test_config();
        let negative = config.ttl.negative;
        let (service, clock) = service_with(config, &[geo.clone()]).await;

        let miss = service.get_location("10.0.0.1", LookupOptions::default()).await;
        assert_eq!(miss.status, LookupStatus::NotFound);
        service.get_location("8.8.8.8", LookupOptions::default()).await;
        assert_eq!(geo.calls(), 2);

        clock.advance(negative);
        assert!(!service.get_location("10.0.0.1", LookupOptions::default()).await.cached);
        assert!(service.get_location("8.8.8.8", LookupOptions::default()).await.cached);
        assert_eq!(geo.calls(), 3);
    }

    #[tokio::test]
    async fn test_fallback_to_next_provider_on_failure() {
        let primary = FakeProvider::new("primary", LookupKind::Geo, |_| outage("primary"));
        let backup = FakeProvider::new("backup", LookupKind::Geo, |_| country("DE"));
        let (service, _) = service_with(test_config(), &[primary.clone(), backup.clone()]).await;

        let record = service.get_location("1.1.1.1", LookupOptions::default()).await;
        assert_eq!(record.status, LookupStatus::Success);
        assert_eq!(record.provider.as_deref(), Some("backup"));
        assert_eq!(service.stats().await.provider_errors, 1);
    }

    #[tokio::test]
    async fn test_not_found_tries_next_then_reports_first() {
        let primary = FakeProvider::new("primary", LookupKind::Geo, |_| {
            Ok(ProviderOutcome::NotFound("reserved range".into()))
        });
        let backup = FakeProvider::new("backup", LookupKind::Geo, |_| outage("backup"));
        let (service, _) = service_with(test_config(), &[primary.clone(), backup.clone()]).await;

        let record = service.get_location("192.0.2.1", LookupOptions::default()).await;
        assert_eq!(record.status, LookupStatus::NotFound);
        assert_eq!(record.provider.as_deref(), Some("primary"));
        assert_eq!(record.message.as_deref(), Some("reserved range"));
        assert_eq!(backup.calls(), 1);
    }

    #[tokio::test]
    async fn test_open_primary_is_skipped() {
        let primary = FakeProvider::new("primary", LookupKind::Geo, |_| outage("primary"));
        let backup = FakeProvider::new("backup", LookupKind::Geo, |_| country("FR"));
        let (service, _) = service_with(test_config(), &[primary.clone(), backup.clone()]).await;

        for ip in ["1.0.0.1", "1.0.0.2", "1.0.0.3"] {
            let record = service.get_location(ip, LookupOptions::default()).await;
            assert_eq!(record.status, LookupStatus::Success);
        }
        assert_eq!(primary.calls(), 2);
        assert_eq!(backup.calls(), 3);

        let stats = service.stats().await;
        assert_eq!(stats.circuit_rejections, 1);
        assert_eq!(stats.circuit_state, CircuitState::Open);
    }

    #[test_case("" ; "empty")]
    #[test_case("not-an-ip" ; "garbage")]
    #[test_case("0.0.0.0" ; "unspecified")]
    #[test_case("224.0.0.1" ; "multicast")]
    #[tokio::test]
    async fn test_invalid_id_never_cached(id: &str) {
        let geo = FakeProvider::new("geo", LookupKind::Geo, |_| country("US"));
        let (service, _) = service_with(test_config(), &[geo.clone()]).await;

        let record = service.get_location(id, LookupOptions::default()).await;
        assert_eq!(record.status, LookupStatus::Error);
        assert_eq!(geo.calls(), 0);
        assert_eq!(service.stats().await.cache.memory.size, 0);
    }

    #[tokio::test]
    async fn test_whois_uses_whois_providers() {
        let geo = FakeProvider::new("geo", LookupKind::Geo, |_| country("US"));
        let rdap = FakeProvider::new("rdap", LookupKind::Whois, |_| {
            let mut fields = LookupFields::new();
            fields.insert("name".into(), json!("GOGL"));
            Ok(ProviderOutcome::Found(fields))
        });
        let (service, _) = service_with(test_config(), &[geo.clone(), rdap.clone()]).await;

        let whois = service.get_whois("8.8.8.8", LookupOptions::default()).await;
        assert_eq!(whois.kind, LookupKind::Whois);
        assert_eq!(whois.field_str("name"), Some("GOGL"));
        assert_eq!(geo.calls(), 0);

        // Geo and WHOIS records for one address are cached separately.
        let geo_record = service.get_location("8.8.8.8", LookupOptions::default()).await;
        assert!(!geo_record.cached);
    }

    #[tokio::test]
    async fn test_reverse_dns_routed_and_cached() {
        let geo = FakeProvider::new("geo", LookupKind::Geo, |_| country("US"));
        let rdns = FakeProvider::new("reverse-dns", LookupKind::ReverseDns, |ip| {
            if ip.to_string() == "8.8.8.8" {
                let mut fields = LookupFields::new();
                fields.insert("hostname".into(), json!("dns.google"));
                Ok(ProviderOutcome::Found(fields))
            } else {
                Ok(ProviderOutcome::NotFound("no PTR record".into()))
            }
        });
        let (service, _) = service_with(test_config(), &[geo.clone(), rdns.clone()]).await;

        let record = service.get_reverse_dns("8.8.8.8", LookupOptions::default()).await;
        assert_eq!(record.kind, LookupKind::ReverseDns);
        assert_eq!(record.field_str("hostname"), Some("dns.google"));
        assert!(service.get_reverse_dns("8.8.8.8", LookupOptions::default()).await.cached);

        let missing = service.get_reverse_dns("203.0.113.9", LookupOptions::default()).await;
        assert_eq!(missing.status, LookupStatus::NotFound);
        assert!(service.get_reverse_dns("203.0.113.9", LookupOptions::default()).await.cached);

        assert_eq!(rdns.calls(), 2);
        assert_eq!(geo.calls(), 0);
        assert!(service.stats().await.breakers.iter().any(|b| b.provider == "reverse-dns"));
    }

    #[tokio::test]
    async fn test_no_provider_for_kind() {
        let geo = FakeProvider::new("geo", LookupKind::Geo, |_| country("US"));
        let (service, _) = service_with(test_config(), &[geo]).await;

        let record = service.get_whois("8.8.8.8", LookupOptions::default()).await;
        assert_eq!(record.status, LookupStatus::Error);
        assert!(record.message.unwrap().contains("No whois provider"));
    }

    #[tokio::test]
    async fn test_bulk_dedupes_limits_and_keeps_order() {
        let geo = FakeProvider::new("geo", LookupKind::Geo, |_| country("US"));
        let mut config = test_config();
        config.bulk.limit = 3;
        config.bulk.workers = 2;
        let (service, _) = service_with(config, &[geo.clone()]).await;

        let ids = ["8.8.8.8", "1.1.1.1", " 8.8.8.8 ", "bogus", "9.9.9.9"];
        let results = service.bulk_get_location(&ids, LookupOptions::default()).await;

        let returned: Vec<&str> = results.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(returned, ["8.8.8.8", "1.1.1.1", "bogus", "9.9.9.9"]);
        assert_eq!(results[0].status, LookupStatus::Success);
        assert_eq!(results[2].status, LookupStatus::Error);
        assert!(results[3].message.as_deref().unwrap().contains("Bulk limit"));
        assert_eq!(geo.calls(), 2);
    }

    #[tokio::test]
    async fn test_bulk_normalizes_ipv6_duplicates() {
        let geo = FakeProvider::new("geo", LookupKind::Geo, |_| country("US"));
        let (service, _) = service_with(test_config(), &[geo.clone()]).await;

        let ids = vec!["2001:4860:4860::8888".to_string(), "2001:4860:4860:0:0:0:0:8888".to_string()];
        let results = service.bulk_get_location(&ids, LookupOptions::default()).await;

        assert_eq!(results.len(), 1);
        assert_eq!(geo.calls(), 1);
    }

    #[tokio::test]
    async fn test_clear_forgets_records() {
        let geo = FakeProvider::new("geo", LookupKind::Geo, |_| country("US"));
        let (service, _) = service_with(test_config(), &[geo.clone()]).await;

        service.get_location("8.8.8.8", LookupOptions::default()).await;
        service.clear().await;
        let record = service.get_location("8.8.8.8", LookupOptions::default()).await;

        assert!(!record.cached);
        assert_eq!(geo.calls(), 2);
    }

    #[tokio::test]
    async fn test_records_survive_restart_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config();
        config.disk = DiskConfig::new(dir.path(), 1 << 20);
        let geo = FakeProvider::new("geo", LookupKind::Geo, |_| country("JP"));

        {
            let (service, _) = service_with(config.clone(), &[geo.clone()]).await;
            service.get_location("8.8.4.4", LookupOptions::default()).await;
        }

        let (service, _) = service_with(config, &[geo.clone()]).await;
        let record = service.get_location("8.8.4.4", LookupOptions::default()).await;

        assert!(record.cached);
        assert_eq!(record.field_str("country"), Some("JP"));
        assert_eq!(geo.calls(), 1);
        assert_eq!(service.stats().await.cache.disk.unwrap().hits, 1);
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let mut config = test_config();
        config.ttl.negative = config.ttl.positive;
        assert!(LookupService::builder(config).build().await.is_err());
    }
}
