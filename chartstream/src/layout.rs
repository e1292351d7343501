use crate::sample::{SeriesId, SeriesKind};
use indexmap::IndexMap;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

/// Identifier of one linked detail pane within the multi-viewport chart.
#[derive(
    Clone,
    Eq,
    PartialEq,
    Ord,
    PartialOrd,
    Hash,
    Debug,
    Deserialize,
    Serialize,
    derive_more::Display,
    derive_more::From,
)]
pub struct PaneId(pub SmolStr);

impl From<&str> for PaneId {
    fn from(value: &str) -> Self {
        Self(SmolStr::new(value))
    }
}

/// Display assignment of one series: the pane it renders on and how.
#[derive(Clone, Eq, PartialEq, Debug, Deserialize, Serialize, derive_more::Constructor)]
pub struct SeriesSpec {
    pub pane: PaneId,
    pub kind: SeriesKind,
}

/// Externally supplied `seriesId -> pane` mapping plus display hints.
///
/// The layout is the sole authority on what gets visualized: samples whose
/// series has no assignment are discarded, invisibly. Read-only input to the
/// registry; swapping it in triggers a reconciliation pass.
#[derive(Clone, Eq, PartialEq, Debug, Default, Deserialize, Serialize)]
pub struct Layout {
    assignments: IndexMap<SeriesId, SeriesSpec>,
}

impl Layout {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn assign<S: Into<SeriesId>, P: Into<PaneId>>(
        mut self,
        series: S,
        pane: P,
        kind: SeriesKind,
    ) -> Self {
        self.assignments
            .insert(series.into(), SeriesSpec::new(pane.into(), kind));
        self
    }

    pub fn spec(&self, series: &SeriesId) -> Option<&SeriesSpec> {
        self.assignments.get(series)
    }

    pub fn assignments(&self) -> impl Iterator<Item = (&SeriesId, &SeriesSpec)> {
        self.assignments.iter()
    }

    /// Panes referenced by at least one assignment, in first-assignment order.
    pub fn panes(&self) -> impl Iterator<Item = &PaneId> {
        self.assignments.values().map(|spec| &spec.pane).unique()
    }

    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }
}

/// Pane lifecycle notifications from the layout provider.
#[derive(Clone, Eq, PartialEq, Debug)]
pub enum LayoutEvent {
    PaneCreated(PaneId),
    PaneRemoved(PaneId),
}
