//! Clock abstractions used by the token bucket math.
//!
//! Bucket timestamps are persisted in a shared store and compared across processes, so the
//! production clock is wall-clock milliseconds since the Unix epoch rather than `Instant`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Clock abstraction so timing can be faked in tests.
pub trait Clock: Send + Sync + std::fmt::Debug {
    fn now_millis(&self) -> u64;
}

/// Wall clock backed by `SystemTime::now()`.
///
/// Notes: not monotonic. The limiter clamps negative elapsed time to zero, so a clock stepping
/// backwards only delays refill instead of draining tokens.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        let since_epoch = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
        u64::try_from(since_epoch.as_millis()).unwrap_or(u64::MAX)
    }
}

/// Manually driven clock. Clones share the same time source.
#[derive(Debug, Default, Clone)]
pub struct ManualClock {
    now: Arc<AtomicU64>,
}

impl ManualClock {
    /// Create a clock frozen at `millis`.
    pub fn new(millis: u64) -> Self {
        Self { now: Arc::new(AtomicU64::new(millis)) }
    }

    /// Jump to an absolute time. Moving backwards is allowed (simulates clock skew).
    pub fn set(&self, millis: u64) {
        self.now.store(millis, Ordering::SeqCst);
    }

    pub fn advance(&self, by: Duration) {
        let by = u64::try_from(by.as_millis()).unwrap_or(u64::MAX);
        self.now.fetch_add(by, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_clones_share_time() {
        let clock = ManualClock::new(1_000);
        let other = clock.clone();
        clock.advance(Duration::from_millis(500));
        assert_eq!(other.now_millis(), 1_500);
        other.set(10);
        assert_eq!(clock.now_millis(), 10);
    }

    #[test]
    fn system_clock_is_past_2020() {
        // 2020-01-01T00:00:00Z
        assert!(SystemClock.now_millis() > 1_577_836_800_000);
    }
}
