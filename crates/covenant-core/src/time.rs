//! Wall-clock abstraction.
//!
//! Machines never read the system clock themselves: every transition is
//! handed a `Timestamp` by the caller, and timeout transitions are driven by
//! the runner's ticker. That keeps transitions pure and lets tests run a
//! manually advanced clock.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Seconds since the Unix epoch.
///
/// All arithmetic saturates; a deadline can never wrap around into the past.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Create from raw Unix seconds.
    pub fn from_unix_secs(secs: u64) -> Self {
        Self(secs)
    }

    /// Raw Unix seconds.
    pub fn as_unix_secs(&self) -> u64 {
        self.0
    }

    /// This timestamp moved `secs` into the future.
    pub fn saturating_add_secs(&self, secs: u64) -> Self {
        Self(self.0.saturating_add(secs))
    }

    /// True if `self` is strictly before `other`.
    pub fn is_before(&self, other: Timestamp) -> bool {
        self.0 < other.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Source of "now" for the runner.
pub trait Clock: Send + Sync {
    /// Current time.
    fn now(&self) -> Timestamp;
}

/// Production clock backed by [`SystemTime`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        Timestamp(secs)
    }
}

/// Manually advanced clock for deterministic tests.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicU64>,
}

impl ManualClock {
    /// Start the clock at the given time.
    pub fn starting_at(now: Timestamp) -> Self {
        Self {
            now: Arc::new(AtomicU64::new(now.as_unix_secs())),
        }
    }

    /// Move the clock forward.
    pub fn advance_secs(&self, secs: u64) {
        self.now.fetch_add(secs, Ordering::SeqCst);
    }

    /// Jump the clock to an absolute time.
    pub fn set(&self, now: Timestamp) {
        self.now.store(now.as_unix_secs(), Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        Timestamp(self.now.load(Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn saturating_deadline_never_wraps() {
        let t = Timestamp::from_unix_secs(u64::MAX - 1);
        assert_eq!(t.saturating_add_secs(100), Timestamp::from_unix_secs(u64::MAX));
    }

    #[test]
    fn manual_clock_advances() {
        let clock = ManualClock::starting_at(Timestamp::from_unix_secs(10));
        assert_eq!(clock.now(), Timestamp::from_unix_secs(10));
        clock.advance_secs(5);
        assert_eq!(clock.now(), Timestamp::from_unix_secs(15));
        clock.set(Timestamp::from_unix_secs(100));
        assert_eq!(clock.now(), Timestamp::from_unix_secs(100));
    }

    #[test]
    fn ordering_is_chronological() {
        let early = Timestamp::from_unix_secs(1);
        let late = Timestamp::from_unix_secs(2);
        assert!(early.is_before(late));
        assert!(!late.is_before(early));
        assert!(!early.is_before(early));
    }
}
