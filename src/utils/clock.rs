//! Injectable clock for instance timestamps.

use chrono::{DateTime, TimeZone, Utc};
use std::sync::atomic::{AtomicI64, Ordering};

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually advanced clock for tests and reproducible runs.
///
/// ```rust
/// use steploom::utils::clock::{Clock, MockClock};
///
/// let clock = MockClock::new(1_000);
/// clock.advance_secs(30);
/// assert_eq!(clock.now().timestamp(), 1_030);
/// ```
#[derive(Debug, Default)]
pub struct MockClock {
    current: AtomicI64,
}

impl MockClock {
    #[must_use]
    pub fn new(start_secs: i64) -> Self {
        Self {
            current: AtomicI64::new(start_secs),
        }
    }

    pub fn advance_secs(&self, seconds: i64) {
        self.current.fetch_add(seconds, Ordering::SeqCst);
    }

    pub fn set_secs(&self, seconds: i64) {
        self.current.store(seconds, Ordering::SeqCst);
    }
}

impl Clock for MockClock {
    fn now(&self) -> DateTime<Utc> {
        let secs = self.current.load(Ordering::SeqCst);
        Utc.timestamp_opt(secs, 0).single().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_clock_moves_only_when_told() {
        let clock = MockClock::new(100);
        assert_eq!(clock.now().timestamp(), 100);
        assert_eq!(clock.now().timestamp(), 100);
        clock.advance_secs(20);
        assert_eq!(clock.now().timestamp(), 120);
        clock.set_secs(5);
        assert_eq!(clock.now().timestamp(), 5);
    }

    #[test]
    fn system_clock_is_monotone_enough() {
        let a = SystemClock.now();
        let b = SystemClock.now();
        assert!(b >= a);
    }
}
