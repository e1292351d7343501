use crate::{
    clock::{Context, Stats},
    config::Config,
    error::PipelineError,
    ingest::IngestBuffer,
    layout::{Layout, LayoutEvent},
    processor::{ChunkProcessor, TickOutcome},
    registry::SeriesRegistry,
    sample::Sample,
    stage::{FeedStage, StageTracker},
    surface::{RenderingSurface, SuspendGuard},
    view::{ViewController, ViewMode, VisibleWindow},
};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info};

/// Latest out-of-band feed stage signal, written by producers and drained at
/// the top of each tick.
#[derive(Debug, Default)]
struct StageSignal(Mutex<Option<FeedStage>>);

/// Cheap cloneable producer handle: sample bursts plus the out-of-band feed
/// stage signal. Safe to use from any producer context, including while a
/// chunk is being processed.
#[derive(Clone, Debug)]
pub struct FeedHandle {
    ingest: Arc<IngestBuffer>,
    signal: Arc<StageSignal>,
}

impl FeedHandle {
    /// Fire-and-forget burst append; never fails, never blocks on processing.
    pub fn push<I: IntoIterator<Item = Sample>>(&self, samples: I) {
        self.ingest.push(samples);
    }

    pub fn set_feed_stage(&self, stage: FeedStage) {
        *self.signal.0.lock() = Some(stage);
    }
}

/// The assembled ingestion, routing and view-synchronization pipeline for one
/// chart view.
///
/// Single-threaded and cooperative: the host invokes [`tick`](Self::tick) once
/// per display refresh (or runs [`drive`](Self::drive) on a timer when the
/// display is not refreshing). All host-facing operations are fire-and-forget;
/// effects are observed via the rendering surface.
#[derive(Debug)]
pub struct ChartPipeline<S: RenderingSurface> {
    surface: S,
    ctx: Arc<Context>,
    config: Config,
    ingest: Arc<IngestBuffer>,
    signal: Arc<StageSignal>,
    registry: SeriesRegistry,
    processor: ChunkProcessor,
    tracker: StageTracker,
    view: ViewController,
    /// False while the host is hidden; ticks become no-ops and the backlog is
    /// caught up atomically on resume.
    visible: bool,
}

impl<S: RenderingSurface> ChartPipeline<S> {
    pub fn new(surface: S, layout: Layout, config: Config) -> Result<Self, PipelineError> {
        config.validate()?;
        let ctx = Arc::new(Context::new());
        Ok(Self {
            surface,
            registry: SeriesRegistry::new(
                Arc::clone(&ctx),
                layout,
                config.series_capacity,
                config.deferred_capacity,
                config.retry_budget,
            ),
            processor: ChunkProcessor::new(Arc::clone(&ctx), config.chunk_size),
            tracker: StageTracker::new(config.retry_budget),
            view: ViewController::new(Arc::clone(&ctx), config),
            ingest: Arc::new(IngestBuffer::new(
                Arc::clone(&ctx),
                config.background_buffer_size,
            )),
            signal: Arc::new(StageSignal::default()),
            ctx,
            config,
            visible: true,
        })
    }

    /// Producer-side handle; clone freely.
    pub fn handle(&self) -> FeedHandle {
        FeedHandle {
            ingest: Arc::clone(&self.ingest),
            signal: Arc::clone(&self.signal),
        }
    }

    /// Append a burst of samples from the host side.
    pub fn append_samples<I: IntoIterator<Item = Sample>>(&self, samples: I) {
        self.ingest.push(samples);
    }

    pub fn set_feed_stage(&mut self, stage: FeedStage) {
        self.tracker.advance(stage);
    }

    /// Forward a pane lifecycle event from the layout provider.
    pub fn apply_layout_event(&mut self, event: LayoutEvent) {
        self.registry.apply_event(event, &mut self.surface);
    }

    /// Swap in a replacement layout and reconcile all series bindings.
    pub fn apply_layout(&mut self, layout: Layout) {
        self.registry.apply_layout(layout, &mut self.surface);
    }

    /// One cooperative tick. Returns whether more work remains so the host
    /// can reschedule on the next slot instead of idling.
    pub fn tick(&mut self) -> TickOutcome {
        if let Some(stage) = self.signal.0.lock().take() {
            self.tracker.advance(stage);
        }
        if !self.visible {
            // processing is suspended; the backlog waits for resume()
            return TickOutcome {
                processed: 0,
                more_work: false,
            };
        }
        self.processor.tick(
            &self.ingest,
            &mut self.registry,
            &mut self.tracker,
            &mut self.view,
            &mut self.surface,
        )
    }

    /// `true` enables live tailing, `false` drops to free navigation.
    pub fn set_live_mode(&mut self, live: bool) {
        if live {
            self.jump_to_live();
        } else {
            self.view.on_user_interaction();
        }
    }

    pub fn jump_to_live(&mut self) {
        self.tracker.cancel_reset();
        self.view.jump_to_live(&self.registry, &mut self.surface);
    }

    /// Pin a fixed-width tailing window, e.g. "last 15 minutes".
    pub fn set_time_window(&mut self, width_minutes: u64) {
        self.tracker.cancel_reset();
        self.view
            .set_pinned(width_minutes * 60_000, &self.registry, &mut self.surface);
    }

    /// One-shot fit of all data across every detail viewport.
    pub fn zoom_extents(&mut self) {
        self.view.zoom_extents(&self.registry, &mut self.surface);
    }

    /// Pan/zoom/drag observed on a detail viewport.
    pub fn notify_user_interaction(&mut self) {
        self.view.on_user_interaction();
    }

    /// Selection-region event from the summary viewport.
    pub fn notify_summary_selection(&mut self, window: VisibleWindow) {
        self.view
            .on_summary_selection(window, &self.registry, &mut self.surface);
    }

    /// Pin or release the summary viewport's own visible range.
    pub fn set_summary_range(&mut self, range: Option<VisibleWindow>) {
        self.view.set_summary_range(range);
    }

    /// Host visibility change. Hiding suspends processing; showing performs
    /// one atomic catch-up via [`resume`](Self::resume).
    pub fn set_visible(&mut self, visible: bool) {
        if visible {
            self.resume();
        } else if self.visible {
            debug!("host hidden, suspending processing");
            self.visible = false;
        }
    }

    /// Catch up on everything deferred while hidden in one atomic step: drain
    /// the backlog, then compute and apply the final window once, all inside
    /// a single suspend/resume bracket - no animating through intermediate
    /// windows.
    pub fn resume(&mut self) {
        let was_hidden = !self.visible;
        self.visible = true;
        if let Some(stage) = self.signal.0.lock().take() {
            self.tracker.advance(stage);
        }

        self.view.begin_tick();
        let mut guard = SuspendGuard::new(&mut self.surface);
        loop {
            self.processor.absorb_pending(&self.ingest, &mut self.registry);
            if self.processor.process_one_chunk(&mut self.registry, &mut *guard) == 0 {
                break;
            }
        }
        self.view
            .after_chunk(&mut self.tracker, &self.registry, &mut *guard);
        drop(guard);

        if was_hidden {
            info!(stats = ?self.ctx.counters.snapshot(), "resumed from hidden state");
        }
    }

    /// Run the cooperative schedule on a timer until `shutdown` resolves.
    /// Substitutes for a display-refresh callback in headless hosts; chunk
    /// atomicity and no-concurrent-chunk execution hold regardless.
    pub async fn drive(
        &mut self,
        period: std::time::Duration,
        mut shutdown: tokio::sync::oneshot::Receiver<()>,
    ) {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = interval.tick() => {
                    self.tick();
                }
            }
        }
    }

    pub fn stats(&self) -> Stats {
        self.ctx.counters.snapshot()
    }

    pub fn data_clock_ms(&self) -> Option<u64> {
        self.ctx.clock.latest_ms()
    }

    pub fn view_mode(&self) -> ViewMode {
        self.view.mode()
    }

    pub fn detail_window(&self) -> Option<VisibleWindow> {
        self.view.detail_window()
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }
}
