use crate::{layout::PaneId, sample::SeriesId};
use fnv::FnvHashMap;
use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

/// Key shared by all raw event series consolidated into one rendered series:
/// `instrument:strategy:marker`.
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
)]
pub struct GroupKey(pub SmolStr);

/// Membership bookkeeping for one marker group.
#[derive(Clone, Eq, PartialEq, Debug, Default)]
pub struct GroupInfo {
    /// Raw event series feeding this group, in first-seen order.
    pub members: IndexSet<SeriesId>,
    /// Panes this group renders on, in first-seen order. The first pane owns
    /// the primary buffer; each additional pane gets an independent mirror.
    pub panes: IndexSet<PaneId>,
}

/// Groups raw strategy-event series sharing `(instrument, strategy, kind)`
/// into one logical rendered series.
///
/// Marker series identifiers follow the `instrument:strategy:eventKind`
/// convention; everything that does not parse passes through unconsolidated.
/// Member series' raw data is never displayed directly - all members write
/// into the group's consolidated buffer.
#[derive(Debug, Default)]
pub struct MarkerConsolidator {
    groups: FnvHashMap<GroupKey, GroupInfo>,
}

impl MarkerConsolidator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Derive the consolidation key for a marker series identifier.
    ///
    /// `None` means "not a parseable marker series, pass through". The event
    /// kind component is collapsed to the literal `marker` so entries and
    /// exits of one strategy land in the same group.
    pub fn group_key_for(series: &SeriesId) -> Option<GroupKey> {
        let mut parts = series.as_str().split(':');
        let instrument = parts.next().filter(|part| !part.is_empty())?;
        let strategy = parts.next().filter(|part| !part.is_empty())?;
        let _event_kind = parts.next().filter(|part| !part.is_empty())?;
        if parts.next().is_some() {
            return None;
        }
        Some(GroupKey(SmolStr::new(format!(
            "{instrument}:{strategy}:marker"
        ))))
    }

    /// Record one member series and its assigned pane, returning the group
    /// the member belongs to.
    pub fn note_member(&mut self, series: &SeriesId, pane: &PaneId) -> Option<GroupKey> {
        let key = Self::group_key_for(series)?;
        let info = self.groups.entry(key.clone()).or_default();
        info.members.insert(series.clone());
        info.panes.insert(pane.clone());
        Some(key)
    }

    pub fn group(&self, key: &GroupKey) -> Option<&GroupInfo> {
        self.groups.get(key)
    }

    /// Panes beyond the group's primary one, each of which needs an
    /// independent mirror buffer.
    pub fn mirror_panes(&self, key: &GroupKey) -> impl Iterator<Item = &PaneId> {
        self.groups
            .get(key)
            .into_iter()
            .flat_map(|info| info.panes.iter().skip(1))
    }

    /// Forget pane membership after a pane is removed from the layout, so a
    /// recreated pane starts from a clean mirror slate.
    pub fn forget_pane(&mut self, pane: &PaneId) {
        for info in self.groups.values_mut() {
            info.panes.shift_remove(pane);
        }
    }
}
