use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Process-wide data clock: the maximum timestamp observed across all ingested
/// samples so far.
///
/// Updated synchronously on sample arrival, before any buffering or chunking,
/// so any observer sees a value at least as fresh as anything rendered.
/// Monotonically non-decreasing.
///
/// Encoded internally as `timestamp + 1` with `0` meaning "nothing observed
/// yet", which keeps the merge a single lock-free `fetch_max`.
#[derive(Debug, Default)]
pub struct DataClock(AtomicU64);

impl DataClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge one observed sample timestamp into the clock.
    pub fn observe(&self, time_ms: u64) {
        let encoded = time_ms.saturating_add(1);
        self.0.fetch_max(encoded, Ordering::AcqRel);
    }

    /// Latest observed timestamp, or `None` before the first sample.
    pub fn latest_ms(&self) -> Option<u64> {
        match self.0.load(Ordering::Acquire) {
            0 => None,
            encoded => Some(encoded - 1),
        }
    }
}

/// Pipeline counters, all saturating and monotonically increasing.
///
/// Every absorbed failure category of the pipeline increments a counter here
/// instead of surfacing an error, so degraded fidelity stays observable.
#[derive(Debug, Default)]
pub struct Counters {
    /// Samples accepted by `push`, including those later dropped.
    pub ingested: AtomicU64,
    /// Samples evicted from the ingestion buffer by the overflow policy.
    pub overflow_dropped: AtomicU64,
    /// Samples discarded because the layout does not assign their series.
    pub discarded: AtomicU64,
    /// Samples parked on the deferred-retry set at least once.
    pub deferred: AtomicU64,
    /// Deferred samples dropped by eviction or retry-budget exhaustion.
    pub deferred_dropped: AtomicU64,
    /// Samples skipped because their payload lacked the required fields.
    pub malformed: AtomicU64,
    /// Data points appended to series buffers.
    pub appended: AtomicU64,
    /// Rendering surface calls that failed and were skipped.
    pub surface_errors: AtomicU64,
}

impl Counters {
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> Stats {
        Stats {
            ingested: self.ingested.load(Ordering::Relaxed),
            overflow_dropped: self.overflow_dropped.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
            deferred: self.deferred.load(Ordering::Relaxed),
            deferred_dropped: self.deferred_dropped.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            appended: self.appended.load(Ordering::Relaxed),
            surface_errors: self.surface_errors.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time snapshot of the pipeline [`Counters`].
#[derive(Copy, Clone, Eq, PartialEq, Debug, Default, Serialize)]
pub struct Stats {
    pub ingested: u64,
    pub overflow_dropped: u64,
    pub discarded: u64,
    pub deferred: u64,
    pub deferred_dropped: u64,
    pub malformed: u64,
    pub appended: u64,
    pub surface_errors: u64,
}

/// Shared state created once per chart-view instance and handed to every
/// component constructor; torn down on view disposal.
#[derive(Debug, Default)]
pub struct Context {
    pub clock: DataClock,
    pub counters: Counters,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_clock_monotonic_max_merge() {
        struct TestCase {
            input: Vec<u64>,
            expected: Option<u64>,
        }

        let tests = vec![
            TestCase {
                // TC0: no observations
                input: vec![],
                expected: None,
            },
            TestCase {
                // TC1: zero is a valid observed timestamp
                input: vec![0],
                expected: Some(0),
            },
            TestCase {
                // TC2: out-of-order observations keep the max
                input: vec![100, 200, 150],
                expected: Some(200),
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let clock = DataClock::new();
            for time_ms in test.input {
                clock.observe(time_ms);
            }
            assert_eq!(clock.latest_ms(), test.expected, "TC{} failed", index);
        }
    }
}
