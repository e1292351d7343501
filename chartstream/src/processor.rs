use crate::{
    clock::{Context, Counters},
    ingest::IngestBuffer,
    registry::{BufferId, Resolution, SeriesRegistry},
    sample::{Batch, Sample},
    stage::StageTracker,
    surface::{RenderingSurface, SuspendGuard},
    view::ViewController,
};
use indexmap::IndexMap;
use std::{collections::VecDeque, sync::Arc};
use tracing::debug;

/// One sample in flight through the processor, with its deferred-retry count.
#[derive(Clone, PartialEq, Debug)]
struct WorkItem {
    sample: Sample,
    attempts: u32,
}

/// Result of one cooperative tick.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct TickOutcome {
    /// Samples routed this tick (including discarded and deferred ones).
    pub processed: usize,
    /// Work remains; the host should schedule another tick on the next
    /// cooperative slot instead of idling.
    pub more_work: bool,
}

/// Drains the ingestion buffer in bounded chunks on a cooperative schedule.
///
/// A tick moves everything pending into an internal work queue (so `push`
/// never blocks on processing), routes up to `chunk_size` samples, and applies
/// all resulting appends plus the window update under a single suspend/resume
/// bracket - a chunk is atomic with respect to rendering. Chunks never run
/// concurrently; everything downstream of `drain_all` is single-writer.
#[derive(Debug)]
pub struct ChunkProcessor {
    ctx: Arc<Context>,
    chunk_size: usize,
    work: VecDeque<WorkItem>,
}

impl ChunkProcessor {
    pub fn new(ctx: Arc<Context>, chunk_size: usize) -> Self {
        Self {
            ctx,
            chunk_size,
            work: VecDeque::new(),
        }
    }

    pub fn work_len(&self) -> usize {
        self.work.len()
    }

    /// Move retry-armed deferred samples and pending ingestion-buffer samples
    /// into the work queue.
    ///
    /// Deferred entries were drained in an earlier tick, so they predate
    /// everything still queued or in the ingestion buffer; they re-enter at
    /// the front to keep per-series arrival order intact.
    pub(crate) fn absorb_pending(&mut self, ingest: &IngestBuffer, registry: &mut SeriesRegistry) {
        for deferred in registry.take_deferred().into_iter().rev() {
            self.work.push_front(WorkItem {
                sample: deferred.sample,
                attempts: deferred.attempts,
            });
        }
        for sample in ingest.drain_all() {
            self.work.push_back(WorkItem {
                sample,
                attempts: 0,
            });
        }
    }

    /// Route one chunk: group samples per destination buffer and apply one
    /// batched append per distinct destination. The caller owns the
    /// suspend/resume bracket.
    pub(crate) fn process_one_chunk<S: RenderingSurface + ?Sized>(
        &mut self,
        registry: &mut SeriesRegistry,
        surface: &mut S,
    ) -> usize {
        let take = self.work.len().min(self.chunk_size);
        if take == 0 {
            return 0;
        }

        // insertion order keeps appends deterministic across destinations
        let mut batches: IndexMap<BufferId, Batch> = IndexMap::new();
        for item in self.work.drain(..take) {
            match registry.resolve(&item.sample.series, surface) {
                Resolution::Ready(id) => {
                    let batch = batches
                        .entry(id)
                        .or_insert_with(|| Batch::empty(registry.kind_of(id)));
                    if !batch.push_sample(&item.sample) {
                        Counters::incr(&self.ctx.counters.malformed);
                        debug!(series = %item.sample.series, "payload missing required fields");
                    }
                }
                Resolution::NotReady => {
                    // parked, not reprocessed immediately: retrying within the
                    // same tick would hot-spin while a pane is mid-creation
                    registry.defer(item.sample, item.attempts);
                }
                Resolution::Discard => {}
            }
        }

        for (id, batch) in &batches {
            if !batch.is_empty() {
                registry.append(*id, batch, surface);
            }
        }
        take
    }

    /// One cooperative tick, as invoked by the host scheduler.
    pub fn tick<S: RenderingSurface + ?Sized>(
        &mut self,
        ingest: &IngestBuffer,
        registry: &mut SeriesRegistry,
        tracker: &mut StageTracker,
        view: &mut ViewController,
        surface: &mut S,
    ) -> TickOutcome {
        view.begin_tick();
        self.absorb_pending(ingest, registry);

        let processed = {
            let mut guard = SuspendGuard::new(surface);
            let processed = self.process_one_chunk(registry, &mut *guard);
            view.after_chunk(tracker, registry, &mut *guard);
            processed
        };

        TickOutcome {
            processed,
            more_work: !self.work.is_empty(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::Config,
        layout::{Layout, LayoutEvent, PaneId},
        sample::SeriesKind,
        surface::RecordingSurface,
    };

    struct Rig {
        ctx: Arc<Context>,
        ingest: IngestBuffer,
        registry: SeriesRegistry,
        tracker: StageTracker,
        view: ViewController,
        processor: ChunkProcessor,
        surface: RecordingSurface,
    }

    impl Rig {
        fn tick(&mut self) -> TickOutcome {
            self.processor.tick(
                &self.ingest,
                &mut self.registry,
                &mut self.tracker,
                &mut self.view,
                &mut self.surface,
            )
        }
    }

    fn rig(layout: Layout, chunk_size: usize) -> Rig {
        let ctx = Arc::new(Context::new());
        let config = Config::default();
        let mut registry = SeriesRegistry::new(Arc::clone(&ctx), layout, 1_000, 100, 5);
        let mut surface = RecordingSurface::new();
        registry.apply_event(LayoutEvent::PaneCreated(PaneId::from("p1")), &mut surface);
        Rig {
            ingest: IngestBuffer::new(Arc::clone(&ctx), 10_000),
            registry,
            tracker: StageTracker::new(config.retry_budget),
            view: ViewController::new(Arc::clone(&ctx), config),
            processor: ChunkProcessor::new(Arc::clone(&ctx), chunk_size),
            surface,
            ctx,
        }
    }

    fn single_line_layout() -> Layout {
        Layout::new().assign("a", "p1", SeriesKind::Line)
    }

    #[test]
    fn test_arrival_order_preserved_per_series() {
        // Scenario: timestamps [100, 200, 150] stay in arrival order even
        // though not monotonic.
        let mut rig = rig(single_line_layout(), 100);
        rig.ingest.push([
            Sample::point("a", 100, 1.0),
            Sample::point("a", 200, 2.0),
            Sample::point("a", 150, 3.0),
        ]);
        rig.tick();

        let (_, series) = rig.surface.live_series().next().unwrap();
        assert_eq!(series.data.times(), &[100, 200, 150]);
    }

    #[test]
    fn test_one_append_call_per_destination() {
        let layout = Layout::new()
            .assign("a", "p1", SeriesKind::Line)
            .assign("b", "p1", SeriesKind::Line);
        let mut rig = rig(layout, 100);

        rig.ingest.push((0..40).map(|i| {
            let series = if i % 2 == 0 { "a" } else { "b" };
            Sample::point(series, i, i as f64)
        }));
        rig.tick();

        // 40 samples, 2 destinations, 1 batched append each
        for (_, series) in rig.surface.live_series() {
            assert_eq!(series.append_calls, 1);
            assert_eq!(series.data.len(), 20);
        }
    }

    #[test]
    fn test_chunking_reschedules_until_drained() {
        let mut rig = rig(single_line_layout(), 10);
        rig.ingest.push((0..25).map(|i| Sample::point("a", i, 0.0)));

        let first = rig.tick();
        assert_eq!(first.processed, 10);
        assert!(first.more_work);

        let second = rig.tick();
        assert!(second.more_work);
        let third = rig.tick();
        assert!(!third.more_work);

        let (_, series) = rig.surface.live_series().next().unwrap();
        assert_eq!(series.data.len(), 25);
    }

    #[test]
    fn test_chunk_is_one_suspend_bracket() {
        let mut rig = rig(single_line_layout(), 100);
        let before = rig.surface.brackets_completed();
        rig.ingest.push([Sample::point("a", 1, 1.0)]);
        rig.tick();
        assert_eq!(rig.surface.brackets_completed(), before + 1);
        assert!(!rig.surface.is_suspended());
    }

    #[test]
    fn test_not_ready_samples_deferred_not_spun() {
        let layout = Layout::new().assign("a", "p9", SeriesKind::Line);
        let mut rig = rig(layout, 100);
        rig.ingest.push([Sample::point("a", 1, 1.0)]);

        let outcome = rig.tick();
        assert_eq!(outcome.processed, 1);
        // parked on the deferred set, not kept in the work queue
        assert!(!outcome.more_work);
        assert_eq!(rig.registry.deferred_len(), 1);

        // pane appears: deferred sample is reclaimed and routed
        rig.registry.apply_event(
            LayoutEvent::PaneCreated(PaneId::from("p9")),
            &mut rig.surface,
        );
        rig.tick();
        assert_eq!(rig.registry.deferred_len(), 0);
        let appended: usize = rig
            .surface
            .live_series()
            .map(|(_, series)| series.data.len())
            .sum();
        assert_eq!(appended, 1);
    }

    #[test]
    fn test_deferred_sample_rejoins_ahead_of_newer_arrivals() {
        // a parked sample predates anything still in the ingestion buffer, so
        // it must re-enter the work queue first
        let layout = Layout::new().assign("a", "p9", SeriesKind::Line);
        let mut rig = rig(layout, 100);
        rig.ingest.push([Sample::point("a", 100, 1.0)]);
        rig.tick();
        assert_eq!(rig.registry.deferred_len(), 1);

        rig.registry.apply_event(
            LayoutEvent::PaneCreated(PaneId::from("p9")),
            &mut rig.surface,
        );
        rig.ingest.push([
            Sample::point("a", 200, 2.0),
            Sample::point("a", 300, 3.0),
        ]);
        rig.tick();

        let (_, series) = rig.surface.live_series().next().unwrap();
        assert_eq!(series.data.times(), &[100, 200, 300]);
    }

    #[test]
    fn test_malformed_payload_counted_and_skipped() {
        let layout = Layout::new().assign("a", "p1", SeriesKind::Candle);
        let mut rig = rig(layout, 100);
        rig.ingest.push([
            Sample::candle("a", 1, (1.0, 2.0, 0.5, 1.5)),
            // single value cannot fill an OHLC row
            Sample::point("a", 2, 9.0),
        ]);
        rig.tick();

        assert_eq!(rig.ctx.counters.snapshot().malformed, 1);
        let (_, series) = rig.surface.live_series().next().unwrap();
        assert_eq!(series.data.len(), 1);
    }

    #[test]
    fn test_push_during_processing_lands_next_tick() {
        // push() writes the live ingestion buffer; the processor only reads
        // its own work queue mid-tick, so a burst between ticks is simply
        // picked up by the next one.
        let mut rig = rig(single_line_layout(), 100);
        rig.ingest.push([Sample::point("a", 1, 1.0)]);
        rig.tick();
        rig.ingest.push([Sample::point("a", 2, 2.0)]);
        let outcome = rig.tick();
        assert_eq!(outcome.processed, 1);

        let (_, series) = rig.surface.live_series().next().unwrap();
        assert_eq!(series.data.times(), &[1, 2]);
    }
}
