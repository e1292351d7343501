use crate::{clock::Context, sample::Sample};
use parking_lot::Mutex;
use std::{collections::VecDeque, sync::Arc};
use tracing::debug;

/// Capacity-capped queue of incoming samples, the only structure in the
/// pipeline with multiple potential writers.
///
/// `push` never fails and never blocks on processing: the chunk processor
/// drains into its own work queue and never reads the live buffer mid-chunk.
/// When the bound would be exceeded the oldest excess samples are dropped,
/// never the newest - liveness over completeness.
///
/// The data clock is advanced synchronously for every pushed sample, before
/// buffering, independent of whether the sample is later drained or dropped.
#[derive(Debug)]
pub struct IngestBuffer {
    ctx: Arc<Context>,
    bound: usize,
    queue: Mutex<VecDeque<Sample>>,
}

impl IngestBuffer {
    pub fn new(ctx: Arc<Context>, bound: usize) -> Self {
        Self {
            ctx,
            bound,
            queue: Mutex::new(VecDeque::new()),
        }
    }

    /// Append a burst of samples. Infallible; overflow is a silent,
    /// policy-defined drop.
    pub fn push<I: IntoIterator<Item = Sample>>(&self, samples: I) {
        let mut queue = self.queue.lock();
        for sample in samples {
            self.ctx.clock.observe(sample.time_ms);
            crate::clock::Counters::incr(&self.ctx.counters.ingested);
            queue.push_back(sample);
        }

        if queue.len() > self.bound {
            let excess = queue.len() - self.bound;
            queue.drain(..excess);
            crate::clock::Counters::add(&self.ctx.counters.overflow_dropped, excess as u64);
            debug!(dropped = excess, bound = self.bound, "ingest buffer overflow");
        }
    }

    /// Empty the buffer and return its contents in arrival order. Called only
    /// by the chunk processor; no other accessor exists.
    pub fn drain_all(&self) -> Vec<Sample> {
        let mut queue = self.queue.lock();
        queue.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }
}
