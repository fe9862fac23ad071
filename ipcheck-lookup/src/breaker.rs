//! Per-provider circuit breaker.
//!
//! ```text
//!            failures >= threshold
//!   Closed ─────────────────────────▶ Open
//!     ▲                                │ recovery timeout elapsed
//!     │ probe successes == max probes  ▼
//!     └──────────────────────────── HalfOpen ──▶ Open (any probe failure)
//! ```
//!
//! Every transition bumps a generation counter. A call carries the
//! generation it was admitted under, and its outcome is ignored if the
//! breaker has moved on since, so a slow call from before an outage cannot
//! close a circuit that later opened.

use std::fmt;
use std::future::Future;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use ipcheck_core::clock::{saturating_elapsed, SharedClock};
use ipcheck_core::config::BreakerConfig;
use ipcheck_core::error::{IpCheckError, Result};

/// Breaker state. Ordered by severity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Calls pass through.
    Closed,
    /// A limited number of probe calls are admitted.
    HalfOpen,
    /// Calls are rejected.
    Open,
}

impl CircuitState {
    /// Returns the lowercase state label.
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::HalfOpen => "half_open",
            CircuitState::Open => "open",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of a breaker.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct BreakerStats {
    /// Provider guarded by the breaker
    pub provider: String,
    /// Current state
    pub state: CircuitState,
    /// Failures since the last success while closed
    pub consecutive_failures: u32,
    /// Time of the failure that last opened (or kept open) the circuit
    pub last_failure: Option<DateTime<Utc>>,
    /// Calls admitted
    pub admitted: u64,
    /// Calls rejected without being attempted
    pub rejected: u64,
    /// Admitted calls that succeeded
    pub successes: u64,
    /// Admitted calls that failed
    pub failures: u64,
    /// Times the circuit opened
    pub times_opened: u64,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    last_failure: Option<DateTime<Utc>>,
    probes_admitted: u32,
    probe_successes: u32,
    generation: u64,
    admitted: u64,
    rejected: u64,
    successes: u64,
    failures: u64,
    times_opened: u64,
}

impl BreakerInner {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            last_failure: None,
            probes_admitted: 0,
            probe_successes: 0,
            generation: 0,
            admitted: 0,
            rejected: 0,
            successes: 0,
            failures: 0,
            times_opened: 0,
        }
    }

    fn transition(&mut self, to: CircuitState) {
        self.state = to;
        self.generation += 1;
        self.probes_admitted = 0;
        self.probe_successes = 0;
        if to == CircuitState::Open {
            self.times_opened += 1;
        }
    }
}

/// Ticket for one admitted call.
#[derive(Clone, Copy, Debug)]
struct Permit {
    generation: u64,
    probe: bool,
}

/// Records a failed probe if the call is dropped before it finishes.
struct ProbeGuard<'a> {
    breaker: &'a CircuitBreaker,
    permit: Permit,
    armed: bool,
}

impl Drop for ProbeGuard<'_> {
    fn drop(&mut self) {
        if self.armed && self.permit.probe {
            debug!(provider = %self.breaker.provider, "probe cancelled");
            self.breaker.record(self.permit, false);
        }
    }
}

/// Circuit breaker guarding one provider.
///
/// Shared between concurrent callers through an `Arc`. State checks and
/// bookkeeping happen under an internal mutex; the guarded operation runs
/// with no lock held.
#[derive(Debug)]
pub struct CircuitBreaker {
    provider: String,
    config: BreakerConfig,
    clock: SharedClock,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    /// Creates a closed breaker for `provider`.
    pub fn new(provider: impl Into<String>, config: BreakerConfig, clock: SharedClock) -> Self {
        Self {
            provider: provider.into(),
            config,
            clock,
            inner: Mutex::new(BreakerInner::new()),
        }
    }

    /// Returns the guarded provider's name.
    pub fn provider(&self) -> &str {
        &self.provider
    }

    /// Runs `op` if the circuit admits it.
    ///
    /// Returns `CircuitOpen` without calling `op` when the circuit is open,
    /// or half-open with all probe slots taken. Any error from `op` counts as
    /// a failure.
    pub async fn execute<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let permit = self.admit()?;
        let mut guard = ProbeGuard {
            breaker: self,
            permit,
            armed: true,
        };

        let result = op().await;

        guard.armed = false;
        self.record(permit, result.is_ok());
        result
    }

    /// Returns the current state.
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Forces the breaker closed and clears failure bookkeeping.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.transition(CircuitState::Closed);
        inner.consecutive_failures = 0;
        inner.last_failure = None;
        info!(provider = %self.provider, "Circuit breaker reset");
    }

    /// Returns a snapshot of the breaker.
    pub fn stats(&self) -> BreakerStats {
        let inner = self.inner.lock();
        BreakerStats {
            provider: self.provider.clone(),
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            last_failure: inner.last_failure,
            admitted: inner.admitted,
            rejected: inner.rejected,
            successes: inner.successes,
            failures: inner.failures,
            times_opened: inner.times_opened,
        }
    }

    fn admit(&self) -> Result<Permit> {
        let now = self.clock.now();
        let mut inner = self.inner.lock();

        if inner.state == CircuitState::Open {
            let last = inner.last_failure.unwrap_or(now);
            if now < last {
                // Clock went backwards; restart the wait from here.
                inner.last_failure = Some(now);
            } else if saturating_elapsed(now, last) >= self.config.recovery_timeout {
                inner.transition(CircuitState::HalfOpen);
                info!(provider = %self.provider, "Circuit half-open, probing provider");
            }
        }

        let probe = match inner.state {
            CircuitState::Closed => false,
            CircuitState::HalfOpen if inner.probes_admitted < self.config.half_open_max_probes => {
                inner.probes_admitted += 1;
                true
            }
            CircuitState::HalfOpen | CircuitState::Open => {
                inner.rejected += 1;
                return Err(IpCheckError::CircuitOpen {
                    provider: self.provider.clone(),
                });
            }
        };

        inner.admitted += 1;
        Ok(Permit {
            generation: inner.generation,
            probe,
        })
    }

    fn record(&self, permit: Permit, success: bool) {
        let now = self.clock.now();
        let mut inner = self.inner.lock();

        if success {
            inner.successes += 1;
        } else {
            inner.failures += 1;
        }

        if permit.generation != inner.generation {
            return;
        }

        match (inner.state, success) {
            (CircuitState::Closed, true) => inner.consecutive_failures = 0,
            (CircuitState::Closed, false) => {
                inner.consecutive_failures += 1;
                inner.last_failure = Some(now);
                if inner.consecutive_failures >= self.config.failure_threshold {
                    inner.transition(CircuitState::Open);
                    warn!(
                        provider = %self.provider,
                        failures = inner.consecutive_failures,
                        "Circuit opened"
                    );
                }
            }
            (CircuitState::HalfOpen, true) => {
                inner.probe_successes += 1;
                if inner.probe_successes >= self.config.half_open_max_probes {
                    inner.transition(CircuitState::Closed);
                    inner.consecutive_failures = 0;
                    info!(provider = %self.provider, "Circuit closed");
                }
            }
            (CircuitState::HalfOpen, false) => {
                inner.last_failure = Some(now);
                inner.transition(CircuitState::Open);
                warn!(provider = %self.provider, "Probe failed, circuit re-opened");
            }
            (CircuitState::Open, _) => {}
        }
    }
}
