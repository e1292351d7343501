use crate::sample::{Batch, SeriesKind};
use itertools::{Itertools, MinMaxResult};
use serde::{Deserialize, Serialize};

/// Inclusive time extent of one series' data.
#[derive(
    Copy, Clone, Eq, PartialEq, Debug, Deserialize, Serialize, derive_more::Constructor,
)]
pub struct TimeExtent {
    pub min_ms: u64,
    pub max_ms: u64,
}

impl TimeExtent {
    /// Union of two extents.
    pub fn merge(self, other: TimeExtent) -> TimeExtent {
        TimeExtent {
            min_ms: self.min_ms.min(other.min_ms),
            max_ms: self.max_ms.max(other.max_ms),
        }
    }

    pub fn width_ms(&self) -> u64 {
        self.max_ms.saturating_sub(self.min_ms)
    }
}

/// Append-only, capacity-bounded columnar store backing one visual series.
///
/// Arrival order is preserved verbatim - timestamps are assumed non-decreasing
/// within a series but violations are tolerated, not corrected. When an append
/// would exceed `capacity`, the oldest rows are evicted: liveness over
/// completeness, same policy as the ingestion buffer.
///
/// Exclusively owned by the [`SeriesRegistry`](crate::registry::SeriesRegistry);
/// everything else reads only metadata (length, extent).
#[derive(Clone, PartialEq, Debug)]
pub struct SeriesBuffer {
    kind: SeriesKind,
    capacity: usize,
    data: Batch,
}

impl SeriesBuffer {
    pub fn new(kind: SeriesKind, capacity: usize) -> Self {
        Self {
            kind,
            capacity,
            data: Batch::empty(kind),
        }
    }

    pub fn kind(&self) -> SeriesKind {
        self.kind
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn times(&self) -> &[u64] {
        self.data.times()
    }

    /// Snapshot of the full contents as one columnar batch, used to replay
    /// retained data into a freshly created display binding.
    pub fn as_batch(&self) -> &Batch {
        &self.data
    }

    /// Append one columnar batch, evicting the oldest rows beyond capacity.
    ///
    /// The batch shape must match this buffer's kind; the registry guarantees
    /// that by constructing batches from the buffer's own kind.
    pub fn append(&mut self, batch: &Batch) {
        match (&mut self.data, batch) {
            (
                Batch::Values { time_ms, value },
                Batch::Values {
                    time_ms: src_time,
                    value: src_value,
                },
            ) => {
                time_ms.extend_from_slice(src_time);
                value.extend_from_slice(src_value);
            }
            (
                Batch::Candles {
                    time_ms,
                    open,
                    high,
                    low,
                    close,
                },
                Batch::Candles {
                    time_ms: src_time,
                    open: src_open,
                    high: src_high,
                    low: src_low,
                    close: src_close,
                },
            ) => {
                time_ms.extend_from_slice(src_time);
                open.extend_from_slice(src_open);
                high.extend_from_slice(src_high);
                low.extend_from_slice(src_low);
                close.extend_from_slice(src_close);
            }
            _ => {
                debug_assert!(false, "batch shape mismatch for series buffer");
                return;
            }
        }
        self.evict_overflow();
    }

    fn evict_overflow(&mut self) {
        let len = self.data.len();
        if len <= self.capacity {
            return;
        }
        let excess = len - self.capacity;
        match &mut self.data {
            Batch::Values { time_ms, value } => {
                time_ms.drain(..excess);
                value.drain(..excess);
            }
            Batch::Candles {
                time_ms,
                open,
                high,
                low,
                close,
            } => {
                time_ms.drain(..excess);
                open.drain(..excess);
                high.drain(..excess);
                low.drain(..excess);
                close.drain(..excess);
            }
        }
    }

    /// Time extent of the stored data. O(n) because arrival order is not
    /// guaranteed monotonic.
    pub fn extent(&self) -> Option<TimeExtent> {
        match self.data.times().iter().minmax() {
            MinMaxResult::NoElements => None,
            MinMaxResult::OneElement(&only) => Some(TimeExtent::new(only, only)),
            MinMaxResult::MinMax(&min, &max) => Some(TimeExtent::new(min, max)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::Sample;

    fn values_batch(points: &[(u64, f64)]) -> Batch {
        let mut batch = Batch::empty(SeriesKind::Line);
        for &(time_ms, value) in points {
            batch.push_sample(&Sample::point("a", time_ms, value));
        }
        batch
    }

    #[test]
    fn test_append_preserves_arrival_order() {
        let mut buffer = SeriesBuffer::new(SeriesKind::Line, 16);
        buffer.append(&values_batch(&[(100, 1.0), (200, 2.0), (150, 3.0)]));
        assert_eq!(buffer.times(), &[100, 200, 150]);
    }

    #[test]
    fn test_capacity_evicts_oldest_rows() {
        let mut buffer = SeriesBuffer::new(SeriesKind::Line, 3);
        buffer.append(&values_batch(&[(1, 1.0), (2, 2.0)]));
        buffer.append(&values_batch(&[(3, 3.0), (4, 4.0)]));
        assert_eq!(buffer.len(), 3);
        assert_eq!(buffer.times(), &[2, 3, 4]);
    }

    #[test]
    fn test_extent_handles_non_monotonic_times() {
        struct TestCase {
            input: Vec<(u64, f64)>,
            expected: Option<TimeExtent>,
        }

        let tests = vec![
            TestCase {
                // TC0: empty buffer has no extent
                input: vec![],
                expected: None,
            },
            TestCase {
                // TC1: single point
                input: vec![(42, 1.0)],
                expected: Some(TimeExtent::new(42, 42)),
            },
            TestCase {
                // TC2: out-of-order arrivals still produce the true extent
                input: vec![(300, 1.0), (100, 2.0), (200, 3.0)],
                expected: Some(TimeExtent::new(100, 300)),
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let mut buffer = SeriesBuffer::new(SeriesKind::Line, 16);
            buffer.append(&values_batch(&test.input));
            assert_eq!(buffer.extent(), test.expected, "TC{} failed", index);
        }
    }
}
