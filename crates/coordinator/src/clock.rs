//! Injectable time source.
//!
//! Lease expiry and the `CLAIM-`/`SUB-` identifier scheme both depend on the
//! current time; injecting the clock keeps them testable.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};

/// Time source used by the workflow engine and both store backends.
pub trait Clock: Send + Sync {
    /// Current wall-clock time.
    fn now(&self) -> DateTime<Utc>;

    /// Strictly increasing nanosecond counter.
    ///
    /// Two calls never return the same value, even when the wall clock does
    /// not advance between them; claim and submission identifiers rely on
    /// this for total ordering.
    fn monotonic_ns(&self) -> u64;
}

/// System clock backed by `Utc::now`, with a watermark that forces the
/// nanosecond counter forward when the wall clock stalls or steps back.
pub struct SystemClock {
    watermark: AtomicU64,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            watermark: AtomicU64::new(0),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn monotonic_ns(&self) -> u64 {
        let wall = Utc::now()
            .timestamp_nanos_opt()
            .unwrap_or(i64::MAX)
            .max(0) as u64;
        let mut prev = self.watermark.load(Ordering::Relaxed);
        loop {
            let next = wall.max(prev + 1);
            match self.watermark.compare_exchange_weak(
                prev,
                next,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return next,
                Err(actual) => prev = actual,
            }
        }
    }
}

/// Manually advanced clock for tests.
pub struct ManualClock {
    now_ns: AtomicU64,
    counter: AtomicU64,
}

impl ManualClock {
    /// Start the clock at the given wall-clock time.
    pub fn starting_at(now: DateTime<Utc>) -> Arc<Self> {
        let ns = now.timestamp_nanos_opt().unwrap_or(0).max(0) as u64;
        Arc::new(Self {
            now_ns: AtomicU64::new(ns),
            counter: AtomicU64::new(0),
        })
    }

    /// Advance the wall clock by `millis` milliseconds.
    pub fn advance_millis(&self, millis: u64) {
        self.now_ns.fetch_add(millis * 1_000_000, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        let ns = self.now_ns.load(Ordering::SeqCst);
        DateTime::<Utc>::from_timestamp_nanos(ns as i64)
    }

    fn monotonic_ns(&self) -> u64 {
        let base = self.now_ns.load(Ordering::SeqCst);
        base + self.counter.fetch_add(1, Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_clock_monotonic_ns_strictly_increases() {
        let clock = SystemClock::new();
        let mut last = 0;
        for _ in 0..1000 {
            let ns = clock.monotonic_ns();
            assert!(ns > last);
            last = ns;
        }
    }

    #[test]
    fn test_manual_clock_advance() {
        let clock = ManualClock::starting_at(Utc::now());
        let before = clock.now();
        clock.advance_millis(250);
        let after = clock.now();
        assert_eq!((after - before).num_milliseconds(), 250);
    }

    #[test]
    fn test_manual_clock_ids_distinct() {
        let clock = ManualClock::starting_at(Utc::now());
        let a = clock.monotonic_ns();
        let b = clock.monotonic_ns();
        assert_ne!(a, b);
    }
}
