use crate::{
    clock::{Context, Counters},
    config::Config,
    layout::PaneId,
    registry::SeriesRegistry,
    series::TimeExtent,
    stage::{StageTracker, WindowPolicy},
    surface::{RenderingSurface, ViewportId},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

/// Half-open visible time window of one viewport.
///
/// Endpoints are signed: a live window whose width exceeds the data extent
/// legitimately starts before timestamp zero.
#[derive(
    Copy, Clone, Eq, PartialEq, Debug, Deserialize, Serialize, derive_more::Constructor,
)]
pub struct VisibleWindow {
    pub start_ms: i64,
    pub end_ms: i64,
}

impl VisibleWindow {
    pub fn width_ms(&self) -> i64 {
        self.end_ms - self.start_ms
    }

    fn from_extent(extent: TimeExtent, right_pad_ms: u64) -> Self {
        Self {
            start_ms: extent.min_ms as i64,
            end_ms: extent.max_ms as i64 + right_pad_ms as i64,
        }
    }
}

/// Window-follow behaviour of the linked detail viewports. Exactly one mode is
/// active at a time.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Deserialize, Serialize)]
pub enum ViewMode {
    /// Tail the data clock with the default live width.
    Live { width_ms: u64 },
    /// Tail the data clock with a user-chosen width ("last 15 minutes").
    Pinned { width_ms: u64 },
    /// Manual navigation; all automatic window updates are suspended.
    Free,
}

/// Computes and applies the visible time window to all linked detail
/// viewports and the summary viewport.
///
/// All detail windows are kept width-and-position identical. The summary
/// viewport shows the full data extent (or a user-dragged sub-range) and its
/// selection region mirrors the detail window; a guard flag distinguishes
/// those programmatic selection pushes from user drags so the two update
/// paths can never feed back into each other.
#[derive(Debug)]
pub struct ViewController {
    ctx: Arc<Context>,
    config: Config,
    mode: ViewMode,
    /// True once any pan/zoom/drag signal was observed.
    user_interacted: bool,
    /// Set when the controller pushes the detail range into the summary
    /// selection; checked and cleared before any inbound selection event,
    /// and expired at the start of the next tick.
    summary_guard: bool,
    /// User-dragged summary sub-range; `None` keeps the summary at full
    /// extent. Never forced to match the detail width.
    summary_range: Option<VisibleWindow>,
    detail_window: Option<VisibleWindow>,
}

impl ViewController {
    pub fn new(ctx: Arc<Context>, config: Config) -> Self {
        Self {
            ctx,
            config,
            mode: ViewMode::Live {
                width_ms: config.default_live_width_ms,
            },
            user_interacted: false,
            summary_guard: false,
            summary_range: None,
            detail_window: None,
        }
    }

    pub fn mode(&self) -> ViewMode {
        self.mode
    }

    /// Latest window applied to the detail viewports.
    pub fn detail_window(&self) -> Option<VisibleWindow> {
        self.detail_window
    }

    /// Called at the top of every processor tick: a guard set in a previous
    /// tick has expired and must not swallow a genuine user drag.
    pub fn begin_tick(&mut self) {
        self.summary_guard = false;
    }

    /// Recompute windows after a processed chunk, honouring the feed stage's
    /// policy and any pending live-entry reset.
    pub fn after_chunk<S: RenderingSurface + ?Sized>(
        &mut self,
        tracker: &mut StageTracker,
        registry: &SeriesRegistry,
        surface: &mut S,
    ) {
        let extent = registry.data_extent();
        let panes: Vec<PaneId> = registry.materialized_panes().cloned().collect();

        // a reset applied this tick is the window update; tailing resumes on
        // the next chunk
        let did_reset = if tracker.reset_due() {
            self.live_entry_reset(tracker, extent, &panes, surface)
        } else {
            false
        };

        match tracker.window_policy() {
            WindowPolicy::Hold => {}
            WindowPolicy::FitAll => {
                // expanding right edge during backfill; manual navigation wins
                if self.mode != ViewMode::Free
                    && let Some(extent) = extent
                {
                    let window =
                        VisibleWindow::from_extent(extent, self.config.live_padding_ms);
                    self.apply_detail(window, &panes, surface);
                }
            }
            WindowPolicy::Tail => {
                let width_ms = match self.mode {
                    ViewMode::Live { width_ms } | ViewMode::Pinned { width_ms } => Some(width_ms),
                    ViewMode::Free => None,
                };
                if !did_reset
                    && let (Some(width_ms), Some(clock_ms)) = (width_ms, self.ctx.clock.latest_ms())
                {
                    let window = self.tail_window(clock_ms, width_ms);
                    self.apply_detail(window, &panes, surface);
                }
            }
        }

        if let Some(extent) = extent {
            self.apply_summary(extent, surface);
        }
    }

    /// One-time window reset owed on entering the live stage: snap every
    /// detail viewport from its (possibly historical) window to the live tail.
    fn live_entry_reset<S: RenderingSurface + ?Sized>(
        &mut self,
        tracker: &mut StageTracker,
        extent: Option<TimeExtent>,
        panes: &[PaneId],
        surface: &mut S,
    ) -> bool {
        if self.user_interacted && self.mode == ViewMode::Free {
            // manual navigation survives the stage transition
            tracker.reset_done();
            return false;
        }
        let Some(clock_ms) = self.ctx.clock.latest_ms() else {
            tracker.reset_failed();
            return false;
        };
        let Some(extent) = extent else {
            // no buffer has data yet; retry with backoff
            tracker.reset_failed();
            return false;
        };

        if !matches!(self.mode, ViewMode::Pinned { .. }) {
            self.mode = ViewMode::Live {
                width_ms: self.config.default_live_width_ms,
            };
        }
        let width_ms = match self.mode {
            ViewMode::Live { width_ms } | ViewMode::Pinned { width_ms } => width_ms,
            ViewMode::Free => self.config.default_live_width_ms,
        };

        let mut window = self.tail_window(clock_ms, width_ms);
        // clip to the actual data extent when the extent is narrower
        window.start_ms = window.start_ms.max(extent.min_ms as i64);

        debug!(start_ms = window.start_ms, end_ms = window.end_ms, "live-entry window reset");
        self.apply_detail(window, panes, surface);
        tracker.reset_done();
        true
    }

    fn tail_window(&self, clock_ms: u64, width_ms: u64) -> VisibleWindow {
        VisibleWindow {
            start_ms: clock_ms as i64 - width_ms as i64,
            end_ms: clock_ms as i64 + self.config.live_padding_ms as i64,
        }
    }

    /// Apply one window to every detail viewport and mirror it into the
    /// summary selection region under the synchronization guard.
    fn apply_detail<S: RenderingSurface + ?Sized>(
        &mut self,
        window: VisibleWindow,
        panes: &[PaneId],
        surface: &mut S,
    ) {
        for pane in panes {
            if let Err(error) =
                surface.set_visible_window(&ViewportId::Detail(pane.clone()), window)
            {
                Counters::incr(&self.ctx.counters.surface_errors);
                warn!(%error, %pane, "detail window update skipped");
            }
        }
        self.detail_window = Some(window);

        self.summary_guard = true;
        if let Err(error) = surface.set_selection(&ViewportId::Summary, window) {
            Counters::incr(&self.ctx.counters.surface_errors);
            warn!(%error, "summary selection update skipped");
        }
    }

    fn apply_summary<S: RenderingSurface + ?Sized>(
        &mut self,
        extent: TimeExtent,
        surface: &mut S,
    ) {
        let window = self
            .summary_range
            .unwrap_or_else(|| VisibleWindow::from_extent(extent, 0));
        if let Err(error) = surface.set_visible_window(&ViewportId::Summary, window) {
            Counters::incr(&self.ctx.counters.surface_errors);
            warn!(%error, "summary window update skipped");
        }
    }

    /// Inbound selection event from the summary viewport.
    ///
    /// A selection the controller itself pushed this tick is identified by
    /// the guard flag and ignored; everything else is a user drag, which
    /// applies the range to all detail viewports and drops to free
    /// navigation.
    pub fn on_summary_selection<S: RenderingSurface + ?Sized>(
        &mut self,
        window: VisibleWindow,
        registry: &SeriesRegistry,
        surface: &mut S,
    ) {
        if self.summary_guard {
            self.summary_guard = false;
            return;
        }
        self.user_interacted = true;
        self.mode = ViewMode::Free;
        let panes: Vec<PaneId> = registry.materialized_panes().cloned().collect();
        self.apply_detail(window, &panes, surface);
    }

    /// Pan/zoom/drag observed on a detail viewport: suspend automatic window
    /// updates until live or pinned mode is explicitly re-requested.
    pub fn on_user_interaction(&mut self) {
        self.user_interacted = true;
        if self.mode != ViewMode::Free {
            debug!("user interaction, dropping to free navigation");
            self.mode = ViewMode::Free;
        }
    }

    /// Explicit "jump to live": resume tailing at the default width.
    pub fn jump_to_live<S: RenderingSurface + ?Sized>(
        &mut self,
        registry: &SeriesRegistry,
        surface: &mut S,
    ) {
        self.mode = ViewMode::Live {
            width_ms: self.config.default_live_width_ms,
        };
        self.retail(registry, surface);
    }

    /// Explicit fixed-width window that keeps tailing the data clock.
    pub fn set_pinned<S: RenderingSurface + ?Sized>(
        &mut self,
        width_ms: u64,
        registry: &SeriesRegistry,
        surface: &mut S,
    ) {
        self.mode = ViewMode::Pinned { width_ms };
        self.retail(registry, surface);
    }

    fn retail<S: RenderingSurface + ?Sized>(
        &mut self,
        registry: &SeriesRegistry,
        surface: &mut S,
    ) {
        let width_ms = match self.mode {
            ViewMode::Live { width_ms } | ViewMode::Pinned { width_ms } => width_ms,
            ViewMode::Free => return,
        };
        if let Some(clock_ms) = self.ctx.clock.latest_ms() {
            let window = self.tail_window(clock_ms, width_ms);
            let panes: Vec<PaneId> = registry.materialized_panes().cloned().collect();
            self.apply_detail(window, &panes, surface);
        }
    }

    /// One-shot fit of all data; does not keep following.
    pub fn zoom_extents<S: RenderingSurface + ?Sized>(
        &mut self,
        registry: &SeriesRegistry,
        surface: &mut S,
    ) {
        self.mode = ViewMode::Free;
        self.user_interacted = true;
        if let Some(extent) = registry.data_extent() {
            let window = VisibleWindow::from_extent(extent, self.config.live_padding_ms);
            let panes: Vec<PaneId> = registry.materialized_panes().cloned().collect();
            self.apply_detail(window, &panes, surface);
        }
    }

    /// Pin or release the summary viewport's own visible range.
    pub fn set_summary_range(&mut self, range: Option<VisibleWindow>) {
        self.summary_range = range;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        layout::{Layout, LayoutEvent},
        sample::{Batch, Sample, SeriesKind},
        stage::FeedStage,
        surface::RecordingSurface,
    };

    struct Fixture {
        ctx: Arc<Context>,
        registry: SeriesRegistry,
        tracker: StageTracker,
        view: ViewController,
        surface: RecordingSurface,
    }

    fn fixture(config: Config) -> Fixture {
        let ctx = Arc::new(Context::new());
        let layout = Layout::new().assign("btc.price", "p1", SeriesKind::Line);
        let mut registry = SeriesRegistry::new(Arc::clone(&ctx), layout, 1_000, 100, 5);
        let mut surface = RecordingSurface::new();
        registry.apply_event(LayoutEvent::PaneCreated(PaneId::from("p1")), &mut surface);
        Fixture {
            view: ViewController::new(Arc::clone(&ctx), config),
            tracker: StageTracker::new(config.retry_budget),
            ctx,
            registry,
            surface,
        }
    }

    fn ingest(fixture: &mut Fixture, points: &[(u64, f64)]) {
        let id = match fixture
            .registry
            .resolve(&crate::sample::SeriesId::from("btc.price"), &mut fixture.surface)
        {
            crate::registry::Resolution::Ready(id) => id,
            other => panic!("unexpected resolution {other:?}"),
        };
        let mut batch = Batch::empty(SeriesKind::Line);
        for &(time_ms, value) in points {
            fixture.ctx.clock.observe(time_ms);
            batch.push_sample(&Sample::point("btc.price", time_ms, value));
        }
        fixture.registry.append(id, &batch, &mut fixture.surface);
    }

    fn detail_viewport() -> ViewportId {
        ViewportId::Detail(PaneId::from("p1"))
    }

    #[test]
    fn test_live_entry_reset_clips_to_extent() {
        // Scenario: history -> live with clock 10_000 and width 120_000; the
        // unclipped start would be -110_000, the data extent narrows it to 0.
        let config = Config {
            default_live_width_ms: 120_000,
            live_padding_ms: 500,
            ..Config::default()
        };
        let mut f = fixture(config);
        ingest(&mut f, &[(0, 1.0), (10_000, 2.0)]);

        f.tracker.advance(FeedStage::History);
        f.tracker.advance(FeedStage::Live);
        f.view.begin_tick();
        f.view
            .after_chunk(&mut f.tracker, &f.registry, &mut f.surface);

        assert_eq!(
            f.surface.window_of(&detail_viewport()),
            Some(VisibleWindow::new(0, 10_500))
        );
    }

    #[test]
    fn test_live_entry_reset_unclipped_when_extent_is_wider() {
        let config = Config {
            default_live_width_ms: 120_000,
            live_padding_ms: 500,
            ..Config::default()
        };
        let mut f = fixture(config);
        ingest(&mut f, &[(200_000, 1.0), (330_000, 2.0)]);

        f.tracker.advance(FeedStage::Live);
        f.view.begin_tick();
        f.view
            .after_chunk(&mut f.tracker, &f.registry, &mut f.surface);

        assert_eq!(
            f.surface.window_of(&detail_viewport()),
            Some(VisibleWindow::new(210_000, 330_500))
        );
    }

    #[test]
    fn test_live_entry_reset_retries_until_data_exists() {
        let mut f = fixture(Config::default());
        f.tracker.advance(FeedStage::Live);

        f.view.begin_tick();
        f.view
            .after_chunk(&mut f.tracker, &f.registry, &mut f.surface);
        // no data yet: nothing applied, reset still owed
        assert_eq!(f.surface.window_of(&detail_viewport()), None);

        ingest(&mut f, &[(1_000, 1.0)]);
        // cooldown of one tick after the first failure
        f.view.begin_tick();
        f.view
            .after_chunk(&mut f.tracker, &f.registry, &mut f.surface);
        f.view.begin_tick();
        f.view
            .after_chunk(&mut f.tracker, &f.registry, &mut f.surface);
        assert!(f.surface.window_of(&detail_viewport()).is_some());
    }

    #[test]
    fn test_pinned_window_tails_preserving_width() {
        // Scenario: pinned 300_000; advancing the clock by 5_000 advances
        // both edges by 5_000 and preserves the width exactly.
        let config = Config {
            live_padding_ms: 0,
            ..Config::default()
        };
        let mut f = fixture(config);
        ingest(&mut f, &[(400_000, 1.0)]);
        f.tracker.advance(FeedStage::Live);

        // consume the live-entry reset, then pin
        f.view.begin_tick();
        f.view
            .after_chunk(&mut f.tracker, &f.registry, &mut f.surface);
        f.view.set_pinned(300_000, &f.registry, &mut f.surface);
        let first = f.surface.window_of(&detail_viewport()).unwrap();
        assert_eq!(first.width_ms(), 300_000);

        ingest(&mut f, &[(405_000, 2.0)]);
        f.view.begin_tick();
        f.view
            .after_chunk(&mut f.tracker, &f.registry, &mut f.surface);
        let second = f.surface.window_of(&detail_viewport()).unwrap();
        assert_eq!(second.start_ms - first.start_ms, 5_000);
        assert_eq!(second.end_ms - first.end_ms, 5_000);
        assert_eq!(second.width_ms(), 300_000);
    }

    #[test]
    fn test_backfill_fits_all_data_with_expanding_right_edge() {
        let config = Config {
            live_padding_ms: 100,
            ..Config::default()
        };
        let mut f = fixture(config);
        f.tracker.advance(FeedStage::History);

        ingest(&mut f, &[(1_000, 1.0), (2_000, 2.0)]);
        f.view.begin_tick();
        f.view
            .after_chunk(&mut f.tracker, &f.registry, &mut f.surface);
        assert_eq!(
            f.surface.window_of(&detail_viewport()),
            Some(VisibleWindow::new(1_000, 2_100))
        );

        ingest(&mut f, &[(9_000, 3.0)]);
        f.view.begin_tick();
        f.view
            .after_chunk(&mut f.tracker, &f.registry, &mut f.surface);
        assert_eq!(
            f.surface.window_of(&detail_viewport()),
            Some(VisibleWindow::new(1_000, 9_100))
        );
    }

    #[test]
    fn test_free_mode_suspends_automatic_updates() {
        let mut f = fixture(Config::default());
        ingest(&mut f, &[(1_000, 1.0)]);
        f.tracker.advance(FeedStage::History);
        f.view.on_user_interaction();
        assert_eq!(f.view.mode(), ViewMode::Free);

        f.view.begin_tick();
        f.view
            .after_chunk(&mut f.tracker, &f.registry, &mut f.surface);
        assert_eq!(f.surface.window_of(&detail_viewport()), None);
    }

    #[test]
    fn test_guard_breaks_selection_feedback_loop() {
        let mut f = fixture(Config::default());
        ingest(&mut f, &[(200_000, 1.0)]);
        f.tracker.advance(FeedStage::Live);

        f.view.begin_tick();
        f.view
            .after_chunk(&mut f.tracker, &f.registry, &mut f.surface);
        let pushed = *f.surface.selection_history().last().unwrap();

        // the surface echoes the programmatic selection push back within the
        // same tick: it must not be re-interpreted as a user drag
        f.view
            .on_summary_selection(pushed, &f.registry, &mut f.surface);
        assert!(matches!(f.view.mode(), ViewMode::Live { .. }));

        // next tick, the same range arriving is a genuine user drag
        f.view.begin_tick();
        f.view
            .on_summary_selection(pushed, &f.registry, &mut f.surface);
        assert_eq!(f.view.mode(), ViewMode::Free);
        assert_eq!(f.surface.window_of(&detail_viewport()), Some(pushed));
    }

    #[test]
    fn test_summary_viewport_shows_full_extent_or_user_range() {
        let mut f = fixture(Config::default());
        ingest(&mut f, &[(1_000, 1.0), (50_000, 2.0)]);
        f.tracker.advance(FeedStage::History);

        f.view.begin_tick();
        f.view
            .after_chunk(&mut f.tracker, &f.registry, &mut f.surface);
        assert_eq!(
            f.surface.window_of(&ViewportId::Summary),
            Some(VisibleWindow::new(1_000, 50_000))
        );

        // user drags the summary's own range; it is never forced back
        f.view
            .set_summary_range(Some(VisibleWindow::new(10_000, 20_000)));
        f.view.begin_tick();
        f.view
            .after_chunk(&mut f.tracker, &f.registry, &mut f.surface);
        assert_eq!(
            f.surface.window_of(&ViewportId::Summary),
            Some(VisibleWindow::new(10_000, 20_000))
        );
    }

    #[test]
    fn test_jump_to_live_resumes_tailing_after_free() {
        let mut f = fixture(Config {
            live_padding_ms: 0,
            default_live_width_ms: 60_000,
            ..Config::default()
        });
        ingest(&mut f, &[(500_000, 1.0)]);
        f.tracker.advance(FeedStage::Live);
        f.view.on_user_interaction();

        f.view.jump_to_live(&f.registry, &mut f.surface);
        assert_eq!(
            f.view.mode(),
            ViewMode::Live { width_ms: 60_000 }
        );
        assert_eq!(
            f.surface.window_of(&detail_viewport()),
            Some(VisibleWindow::new(440_000, 500_000))
        );
    }
}
