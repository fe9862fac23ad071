//! PTR lookups through the system resolver.

use std::net::IpAddr;

use async_trait::async_trait;
use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::error::{ResolveError, ResolveErrorKind};
use hickory_resolver::proto::op::ResponseCode;
use hickory_resolver::TokioAsyncResolver;
use serde_json::json;
use tracing::{debug, instrument};

use ipcheck_core::error::{IpCheckError, Result};
use ipcheck_core::traits::{LookupProvider, ProviderOutcome};
use ipcheck_core::types::{LookupFields, LookupKind};

/// Reverse DNS (PTR) lookups.
///
/// The resolver's own answer cache is disabled and it makes a single
/// attempt per query, since the lookup service caches and retries.
pub struct ReverseDnsProvider {
    resolver: TokioAsyncResolver,
}

impl ReverseDnsProvider {
    /// Provider name.
    pub const NAME: &'static str = "reverse-dns";

    /// Creates a provider using the nameservers from the system configuration.
    pub fn from_system_conf() -> Result<Self> {
        let (config, opts) = hickory_resolver::system_conf::read_system_conf()
            .map_err(|e| IpCheckError::Config(format!("Failed to read resolver configuration: {}", e)))?;
        Ok(Self::new(config, opts))
    }

    /// Creates a provider for explicit nameservers.
    pub fn new(config: ResolverConfig, mut opts: ResolverOpts) -> Self {
        opts.cache_size = 0;
        opts.attempts = 1;
        Self {
            resolver: TokioAsyncResolver::tokio(config, opts),
        }
    }
}

#[async_trait]
impl LookupProvider for ReverseDnsProvider {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn kind(&self) -> LookupKind {
        LookupKind::ReverseDns
    }

    #[instrument(skip(self), fields(provider = "reverse-dns"))]
    async fn lookup(&self, ip: IpAddr) -> Result<ProviderOutcome> {
        match self.resolver.reverse_lookup(ip).await {
            Ok(lookup) => Ok(ptr_outcome(lookup.iter().map(|name| name.to_string()))),
            Err(e) => {
                let outcome = error_outcome(&e);
                if let Ok(ProviderOutcome::NotFound(_)) = outcome {
                    debug!(%ip, "no PTR record");
                }
                outcome
            }
        }
    }
}

/// Maps PTR names to fields: the first name is the `hostname`, any others
/// are `aliases`. An answer with no usable names is a miss.
fn ptr_outcome(names: impl IntoIterator<Item = String>) -> ProviderOutcome {
    let mut names: Vec<String> = names
        .into_iter()
        .map(|n| n.trim_end_matches('.').to_string())
        .filter(|n| !n.is_empty())
        .collect();
    if names.is_empty() {
        return ProviderOutcome::NotFound("no PTR record".into());
    }

    let hostname = names.remove(0);
    let mut fields = LookupFields::new();
    fields.insert("hostname".into(), json!(hostname));
    if !names.is_empty() {
        fields.insert("aliases".into(), json!(names));
    }
    ProviderOutcome::Found(fields)
}

fn error_outcome(err: &ResolveError) -> Result<ProviderOutcome> {
    match err.kind() {
        ResolveErrorKind::NoRecordsFound { response_code, .. } => no_records_outcome(*response_code),
        ResolveErrorKind::Timeout => Err(IpCheckError::transient(ReverseDnsProvider::NAME, "DNS query timed out")),
        _ => Err(IpCheckError::transient(ReverseDnsProvider::NAME, err)),
    }
}

/// NXDOMAIN and an empty NOERROR answer are definitive; SERVFAIL, REFUSED
/// and the rest say nothing about the address.
fn no_records_outcome(code: ResponseCode) -> Result<ProviderOutcome> {
    match code {
        ResponseCode::NXDomain | ResponseCode::NoError => Ok(ProviderOutcome::NotFound("no PTR record".into())),
        other => Err(IpCheckError::transient(ReverseDnsProvider::NAME, format!("DNS {}", other))),
    }
}
