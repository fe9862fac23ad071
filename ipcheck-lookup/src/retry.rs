//! Deadline and retry policy for provider calls.
//!
//! Retries handle a blip on a single call; the circuit breaker handles a
//! sustained outage. A whole retry sequence runs inside one breaker permit,
//! so an exhausted sequence counts as a single breaker failure.

use std::future::Future;

use tracing::debug;

use ipcheck_core::config::RetryPolicy;
use ipcheck_core::error::{IpCheckError, Result};

/// Runs `op` under `policy`.
///
/// Each attempt is bounded by `policy.timeout`; an attempt that runs over
/// becomes `ProviderTimeout`. Recoverable errors are retried up to
/// `policy.max_retries` times, sleeping `policy.backoff(n)` before retry
/// `n`. Other errors are returned immediately.
pub async fn call_with_retry<T, F, Fut>(provider: &str, policy: &RetryPolicy, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut retry = 0;
    loop {
        let result = match tokio::time::timeout(policy.timeout, op()).await {
            Ok(result) => result,
            Err(_) => Err(IpCheckError::ProviderTimeout {
                provider: provider.to_string(),
                seconds: policy.timeout.as_secs(),
            }),
        };

        match result {
            Err(e) if e.is_recoverable() && retry < policy.max_retries => {
                let delay = policy.backoff(retry);
                debug!(provider, retry, ?delay, error = %e, "retrying provider call");
                tokio::time::sleep(delay).await;
                retry += 1;
            }
            result => return result,
        }
    }
}
