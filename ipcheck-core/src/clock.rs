//! Wall-clock abstraction.
//!
//! Cache entries persist across restarts, so expiry is tracked in wall-clock
//! time rather than `Instant`. Everything that reads the time goes through a
//! [`Clock`] so tests can move time forwards and backwards deterministically.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;

/// Source of the current time.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Returns the current wall-clock time.
    fn now(&self) -> DateTime<Utc>;
}

/// Shared handle to a clock.
pub type SharedClock = Arc<dyn Clock>;

/// The system clock.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl SystemClock {
    /// Returns the system clock as a shared handle.
    pub fn shared() -> SharedClock {
        Arc::new(SystemClock)
    }
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    /// Creates a clock frozen at `start`.
    pub fn new(start: DateTime<Utc>) -> Arc<Self> {
        Arc::new(Self {
            now: Mutex::new(start),
        })
    }

    /// Creates a clock frozen at the current system time.
    pub fn starting_now() -> Arc<Self> {
        Self::new(Utc::now())
    }

    /// Moves the clock forwards.
    pub fn advance(&self, by: std::time::Duration) {
        let mut now = self.now.lock();
        *now = add_duration(*now, by);
    }

    /// Moves the clock backwards.
    pub fn rewind(&self, by: std::time::Duration) {
        let mut now = self.now.lock();
        *now = Duration::from_std(by)
            .ok()
            .and_then(|d| now.checked_sub_signed(d))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
    }

    /// Sets the clock to an absolute time.
    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock() = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

/// Adds a std duration to a timestamp, saturating at the representable maximum.
pub fn add_duration(at: DateTime<Utc>, ttl: std::time::Duration) -> DateTime<Utc> {
    Duration::from_std(ttl)
        .ok()
        .and_then(|d| at.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Returns `later - earlier` as a std duration, or zero if `later` is not later.
pub fn saturating_elapsed(later: DateTime<Utc>, earlier: DateTime<Utc>) -> std::time::Duration {
    (later - earlier).to_std().unwrap_or_default()
}
