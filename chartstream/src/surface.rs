use crate::{
    error::SurfaceError,
    layout::PaneId,
    sample::{Batch, SeriesKind},
    series::TimeExtent,
    view::VisibleWindow,
};
use fnv::FnvHashMap;
use indexmap::IndexMap;
use itertools::{Itertools, MinMaxResult};
use serde::{Deserialize, Serialize};

/// Opaque identifier of one display series created on a surface.
#[derive(
    Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Deserialize, Serialize,
    derive_more::Display,
)]
pub struct SeriesHandle(pub u64);

/// Identifies one viewport on the surface: either a linked detail pane or the
/// single summary (overview) viewport.
#[derive(Clone, Eq, PartialEq, Hash, Debug, Deserialize, Serialize)]
pub enum ViewportId {
    Detail(PaneId),
    Summary,
}

impl std::fmt::Display for ViewportId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ViewportId::Detail(pane) => write!(f, "pane:{pane}"),
            ViewportId::Summary => write!(f, "summary"),
        }
    }
}

/// Display/rasterization collaborator consumed by the pipeline.
///
/// The pipeline owns all series data; a surface holds only display bindings.
/// `suspend_updates`/`resume_updates` must nest safely - the processor
/// brackets every chunk with one suspension so intermediate states are never
/// drawn.
pub trait RenderingSurface {
    /// Create a display series on the given viewport, preallocated for
    /// `capacity` points.
    fn create_series(
        &mut self,
        viewport: &ViewportId,
        kind: SeriesKind,
        capacity: usize,
    ) -> Result<SeriesHandle, SurfaceError>;

    /// Destroy a display series. Buffer data outlives the binding.
    fn remove_series(&mut self, handle: SeriesHandle) -> Result<(), SurfaceError>;

    /// Append one columnar batch to a display series.
    fn append_batch(&mut self, handle: SeriesHandle, batch: &Batch) -> Result<(), SurfaceError>;

    fn suspend_updates(&mut self);

    fn resume_updates(&mut self);

    fn set_visible_window(
        &mut self,
        viewport: &ViewportId,
        window: VisibleWindow,
    ) -> Result<(), SurfaceError>;

    /// Move the summary viewport's selection region (the brush representing
    /// the detail window). Only meaningful for [`ViewportId::Summary`].
    fn set_selection(
        &mut self,
        viewport: &ViewportId,
        window: VisibleWindow,
    ) -> Result<(), SurfaceError>;

    /// Time extent of the data currently displayed for `handle`.
    fn data_extent(&self, handle: SeriesHandle) -> Option<TimeExtent>;
}

/// RAII suspend/resume bracket over a surface.
///
/// Nesting is delegated to the surface's own depth tracking, so brackets may
/// be stacked freely.
pub struct SuspendGuard<'a, S: RenderingSurface + ?Sized>(&'a mut S);

impl<'a, S: RenderingSurface + ?Sized> SuspendGuard<'a, S> {
    pub fn new(surface: &'a mut S) -> Self {
        surface.suspend_updates();
        Self(surface)
    }
}

impl<S: RenderingSurface + ?Sized> std::ops::Deref for SuspendGuard<'_, S> {
    type Target = S;

    fn deref(&self) -> &S {
        self.0
    }
}

impl<S: RenderingSurface + ?Sized> std::ops::DerefMut for SuspendGuard<'_, S> {
    fn deref_mut(&mut self) -> &mut S {
        self.0
    }
}

impl<S: RenderingSurface + ?Sized> Drop for SuspendGuard<'_, S> {
    fn drop(&mut self) {
        self.0.resume_updates();
    }
}

/// One display series retained by the [`RecordingSurface`].
#[derive(Clone, PartialEq, Debug)]
pub struct RecordedSeries {
    pub viewport: ViewportId,
    pub kind: SeriesKind,
    pub capacity: usize,
    pub data: Batch,
    /// Number of `append_batch` calls received, batching visible.
    pub append_calls: usize,
    pub destroyed: bool,
}

/// In-memory [`RenderingSurface`] retaining everything appended to it.
///
/// Doubles as the sink of the replay harness and the test double for the
/// pipeline's own tests: window and selection histories stay inspectable, and
/// appends against destroyed handles fail the way a real backend would.
#[derive(Debug, Default)]
pub struct RecordingSurface {
    next_handle: u64,
    series: FnvHashMap<SeriesHandle, RecordedSeries>,
    windows: IndexMap<ViewportId, Vec<VisibleWindow>>,
    selections: Vec<VisibleWindow>,
    suspend_depth: u32,
    brackets_completed: u64,
}

impl RecordingSurface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn series(&self, handle: SeriesHandle) -> Option<&RecordedSeries> {
        self.series.get(&handle)
    }

    pub fn live_series(&self) -> impl Iterator<Item = (SeriesHandle, &RecordedSeries)> {
        self.series
            .iter()
            .filter(|(_, series)| !series.destroyed)
            .map(|(handle, series)| (*handle, series))
    }

    /// Latest visible window applied to `viewport`, if any.
    pub fn window_of(&self, viewport: &ViewportId) -> Option<VisibleWindow> {
        self.windows.get(viewport).and_then(|history| history.last().copied())
    }

    pub fn window_history(&self, viewport: &ViewportId) -> &[VisibleWindow] {
        self.windows.get(viewport).map_or(&[], Vec::as_slice)
    }

    pub fn selection_history(&self) -> &[VisibleWindow] {
        &self.selections
    }

    /// Number of completed suspend/resume brackets.
    pub fn brackets_completed(&self) -> u64 {
        self.brackets_completed
    }

    pub fn is_suspended(&self) -> bool {
        self.suspend_depth > 0
    }
}

impl RenderingSurface for RecordingSurface {
    fn create_series(
        &mut self,
        viewport: &ViewportId,
        kind: SeriesKind,
        capacity: usize,
    ) -> Result<SeriesHandle, SurfaceError> {
        let handle = SeriesHandle(self.next_handle);
        self.next_handle += 1;
        self.series.insert(
            handle,
            RecordedSeries {
                viewport: viewport.clone(),
                kind,
                capacity,
                data: Batch::empty(kind),
                append_calls: 0,
                destroyed: false,
            },
        );
        Ok(handle)
    }

    fn remove_series(&mut self, handle: SeriesHandle) -> Result<(), SurfaceError> {
        match self.series.get_mut(&handle) {
            Some(series) if !series.destroyed => {
                series.destroyed = true;
                Ok(())
            }
            _ => Err(SurfaceError::UnknownHandle(handle)),
        }
    }

    fn append_batch(&mut self, handle: SeriesHandle, batch: &Batch) -> Result<(), SurfaceError> {
        let series = self
            .series
            .get_mut(&handle)
            .filter(|series| !series.destroyed)
            .ok_or(SurfaceError::UnknownHandle(handle))?;
        series.append_calls += 1;

        match (&mut series.data, batch) {
            (
                Batch::Values { time_ms, value },
                Batch::Values {
                    time_ms: src_time,
                    value: src_value,
                },
            ) => {
                time_ms.extend_from_slice(src_time);
                value.extend_from_slice(src_value);
                Ok(())
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
                Ok(())
            }
            _ => Err(SurfaceError::KindMismatch(handle)),
        }
    }

    fn suspend_updates(&mut self) {
        self.suspend_depth += 1;
    }

    fn resume_updates(&mut self) {
        debug_assert!(self.suspend_depth > 0, "unbalanced resume_updates");
        self.suspend_depth = self.suspend_depth.saturating_sub(1);
        if self.suspend_depth == 0 {
            self.brackets_completed += 1;
        }
    }

    fn set_visible_window(
        &mut self,
        viewport: &ViewportId,
        window: VisibleWindow,
    ) -> Result<(), SurfaceError> {
        self.windows
            .entry(viewport.clone())
            .or_default()
            .push(window);
        Ok(())
    }

    fn set_selection(
        &mut self,
        viewport: &ViewportId,
        window: VisibleWindow,
    ) -> Result<(), SurfaceError> {
        if *viewport != ViewportId::Summary {
            return Err(SurfaceError::UnknownViewport(viewport.clone()));
        }
        self.selections.push(window);
        Ok(())
    }

    fn data_extent(&self, handle: SeriesHandle) -> Option<TimeExtent> {
        let series = self.series.get(&handle).filter(|series| !series.destroyed)?;
        match series.data.times().iter().minmax() {
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

    fn pane(id: &str) -> ViewportId {
        ViewportId::Detail(PaneId::from(id))
    }

    #[test]
    fn test_suspend_guard_nests() {
        let mut surface = RecordingSurface::new();
        {
            let mut outer = SuspendGuard::new(&mut surface);
            assert!(outer.is_suspended());
            {
                let inner = SuspendGuard::new(&mut *outer);
                assert!(inner.is_suspended());
            }
            // still suspended until the outer bracket closes
            assert!(outer.is_suspended());
        }
        assert!(!surface.is_suspended());
        assert_eq!(surface.brackets_completed(), 1);
    }

    #[test]
    fn test_append_after_remove_fails_with_unknown_handle() {
        let mut surface = RecordingSurface::new();
        let handle = surface
            .create_series(&pane("p1"), SeriesKind::Line, 16)
            .unwrap();
        surface.remove_series(handle).unwrap();

        let mut batch = Batch::empty(SeriesKind::Line);
        batch.push_sample(&Sample::point("a", 1, 1.0));
        assert_eq!(
            surface.append_batch(handle, &batch),
            Err(SurfaceError::UnknownHandle(handle))
        );
    }

    #[test]
    fn test_data_extent_tracks_appends() {
        let mut surface = RecordingSurface::new();
        let handle = surface
            .create_series(&pane("p1"), SeriesKind::Line, 16)
            .unwrap();
        assert_eq!(surface.data_extent(handle), None);

        let mut batch = Batch::empty(SeriesKind::Line);
        for (time_ms, value) in [(500, 1.0), (100, 2.0), (300, 3.0)] {
            batch.push_sample(&Sample::point("a", time_ms, value));
        }
        surface.append_batch(handle, &batch).unwrap();
        assert_eq!(surface.data_extent(handle), Some(TimeExtent::new(100, 500)));
    }
}
