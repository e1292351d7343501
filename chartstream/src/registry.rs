use crate::{
    clock::{Context, Counters},
    layout::{Layout, LayoutEvent, PaneId},
    marker::{GroupKey, MarkerConsolidator},
    sample::{Sample, SeriesId, SeriesKind},
    series::{SeriesBuffer, TimeExtent},
    surface::{RenderingSurface, SeriesHandle, ViewportId},
};
use fnv::FnvHashMap;
use indexmap::IndexSet;
use std::{collections::VecDeque, sync::Arc};
use tracing::{debug, warn};

/// Arena handle of one materialized series buffer.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, derive_more::Display)]
pub struct BufferId(usize);

/// Outcome of resolving a sample's series id to a destination buffer.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum Resolution {
    /// Destination exists and has a live display binding.
    Ready(BufferId),
    /// Destination pane is not materialized yet; defer and retry.
    NotReady,
    /// Series unknown to the layout; the sample is invisible, not an error.
    Discard,
}

/// Identity of one arena slot: a plain series or a consolidated marker group.
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
enum SlotKey {
    Series(SeriesId),
    Group(GroupKey),
}

/// Live display binding of a buffer onto a pane.
#[derive(Clone, Eq, PartialEq, Debug)]
struct Binding {
    pane: PaneId,
    handle: SeriesHandle,
}

/// Independent per-pane copy of a consolidated marker buffer.
///
/// Never a second writer to the shared buffer: every mirror owns its own data
/// and receives every future append, trading memory for the absence of
/// shared-mutable-buffer hazards across independently destroyed panes.
#[derive(Debug)]
struct Mirror {
    pane: PaneId,
    buffer: SeriesBuffer,
    handle: Option<SeriesHandle>,
}

#[derive(Debug)]
struct Slot {
    key: SlotKey,
    kind: SeriesKind,
    /// Pane this slot should bind to under the current layout.
    target_pane: PaneId,
    buffer: SeriesBuffer,
    /// `None` = orphaned / pending-recreation; buffer data is retained.
    binding: Option<Binding>,
    mirrors: Vec<Mirror>,
}

/// One parked sample awaiting a resolvable destination.
#[derive(Clone, PartialEq, Debug)]
pub struct Deferred {
    pub sample: Sample,
    pub attempts: u32,
}

/// Maps logical series identifiers to materialized series buffers and their
/// display bindings, driven by the externally supplied [`Layout`].
///
/// The registry is the exclusive owner of every [`SeriesBuffer`] (arena +
/// handle pattern): layout changes only rebind display handles, never
/// reallocate buffers whose series persists across the change. `NotReady`
/// samples land on a bounded deferred-retry set and are re-resolved after the
/// next registry mutation.
#[derive(Debug)]
pub struct SeriesRegistry {
    ctx: Arc<Context>,
    series_capacity: usize,
    deferred_capacity: usize,
    retry_budget: u32,
    layout: Layout,
    /// Panes the layout provider has materialized so far.
    panes: IndexSet<PaneId>,
    consolidator: MarkerConsolidator,
    slots: Vec<Slot>,
    index: FnvHashMap<SlotKey, BufferId>,
    deferred: VecDeque<Deferred>,
    /// Set by any mutation that can make a deferred sample resolvable.
    retry_armed: bool,
}

impl SeriesRegistry {
    pub fn new(
        ctx: Arc<Context>,
        layout: Layout,
        series_capacity: usize,
        deferred_capacity: usize,
        retry_budget: u32,
    ) -> Self {
        Self {
            ctx,
            series_capacity,
            deferred_capacity,
            retry_budget,
            layout,
            panes: IndexSet::new(),
            consolidator: MarkerConsolidator::new(),
            slots: Vec::new(),
            index: FnvHashMap::default(),
            deferred: VecDeque::new(),
            retry_armed: false,
        }
    }

    /// Resolve a series id to its destination buffer, lazily materializing
    /// the buffer and its display binding.
    pub fn resolve<S: RenderingSurface + ?Sized>(
        &mut self,
        series: &SeriesId,
        surface: &mut S,
    ) -> Resolution {
        let Some(spec) = self.layout.spec(series).cloned() else {
            Counters::incr(&self.ctx.counters.discarded);
            return Resolution::Discard;
        };

        let key = if spec.kind == SeriesKind::Marker {
            match self.consolidator.note_member(series, &spec.pane) {
                Some(group) => SlotKey::Group(group),
                // unparseable marker ids pass through unconsolidated
                None => SlotKey::Series(series.clone()),
            }
        } else {
            SlotKey::Series(series.clone())
        };

        let id = match self.index.get(&key).copied() {
            Some(id) => id,
            None => {
                if !self.panes.contains(&spec.pane) {
                    return Resolution::NotReady;
                }
                let id = BufferId(self.slots.len());
                self.slots.push(Slot {
                    key: key.clone(),
                    kind: spec.kind,
                    target_pane: spec.pane.clone(),
                    buffer: SeriesBuffer::new(spec.kind, self.series_capacity),
                    binding: None,
                    mirrors: Vec::new(),
                });
                self.index.insert(key.clone(), id);
                // a fresh buffer is a registry mutation: deferred samples for
                // sibling marker members may now resolve
                self.retry_armed = true;
                id
            }
        };

        self.sync_group_mirrors(id, surface);

        let slot = &mut self.slots[id.0];
        if slot.binding.is_none() {
            if !self.panes.contains(&slot.target_pane) {
                return Resolution::NotReady;
            }
            if !Self::bind_slot(&self.ctx, slot, surface, self.series_capacity) {
                return Resolution::NotReady;
            }
        }
        Resolution::Ready(id)
    }

    /// Create the display binding for an unbound slot, replaying retained
    /// buffer data into the fresh binding.
    fn bind_slot<S: RenderingSurface + ?Sized>(
        ctx: &Context,
        slot: &mut Slot,
        surface: &mut S,
        capacity: usize,
    ) -> bool {
        let viewport = ViewportId::Detail(slot.target_pane.clone());
        match surface.create_series(&viewport, slot.kind, capacity) {
            Ok(handle) => {
                if !slot.buffer.is_empty()
                    && let Err(error) = surface.append_batch(handle, slot.buffer.as_batch())
                {
                    Counters::incr(&ctx.counters.surface_errors);
                    warn!(%error, %viewport, "failed to replay retained data into new binding");
                }
                slot.binding = Some(Binding {
                    pane: slot.target_pane.clone(),
                    handle,
                });
                true
            }
            Err(error) => {
                Counters::incr(&ctx.counters.surface_errors);
                warn!(%error, %viewport, "failed to create display series");
                false
            }
        }
    }

    /// Bring a marker-group slot's mirrors in line with the consolidator's
    /// pane membership: one independent buffer copy per additional pane.
    fn sync_group_mirrors<S: RenderingSurface + ?Sized>(
        &mut self,
        id: BufferId,
        surface: &mut S,
    ) {
        let slot = &mut self.slots[id.0];
        let SlotKey::Group(key) = &slot.key else {
            return;
        };

        let wanted: Vec<PaneId> = self.consolidator.mirror_panes(key).cloned().collect();
        for pane in wanted {
            if pane == slot.target_pane || slot.mirrors.iter().any(|mirror| mirror.pane == pane) {
                continue;
            }
            slot.mirrors.push(Mirror {
                pane: pane.clone(),
                buffer: slot.buffer.clone(),
                handle: None,
            });
        }

        for mirror in &mut slot.mirrors {
            if mirror.handle.is_some() || !self.panes.contains(&mirror.pane) {
                continue;
            }
            let viewport = ViewportId::Detail(mirror.pane.clone());
            match surface.create_series(&viewport, slot.kind, self.series_capacity) {
                Ok(handle) => {
                    if !mirror.buffer.is_empty()
                        && let Err(error) = surface.append_batch(handle, mirror.buffer.as_batch())
                    {
                        Counters::incr(&self.ctx.counters.surface_errors);
                        warn!(%error, %viewport, "failed to replay mirror data");
                    }
                    mirror.handle = Some(handle);
                }
                Err(error) => {
                    Counters::incr(&self.ctx.counters.surface_errors);
                    warn!(%error, %viewport, "failed to create mirror series");
                }
            }
        }
    }

    /// Kind of the buffer behind `id`; the processor shapes batches with it.
    pub fn kind_of(&self, id: BufferId) -> SeriesKind {
        self.slots[id.0].kind
    }

    /// Append one columnar batch to the buffer and its display binding(s).
    ///
    /// Surface failures are counted, logged and skipped; the buffer itself
    /// always receives the data.
    pub fn append<S: RenderingSurface + ?Sized>(
        &mut self,
        id: BufferId,
        batch: &crate::sample::Batch,
        surface: &mut S,
    ) {
        let slot = &mut self.slots[id.0];
        slot.buffer.append(batch);
        Counters::add(&self.ctx.counters.appended, batch.len() as u64);

        if let Some(binding) = &slot.binding
            && let Err(error) = surface.append_batch(binding.handle, batch)
        {
            Counters::incr(&self.ctx.counters.surface_errors);
            warn!(%error, handle = %binding.handle, "append skipped");
        }

        for mirror in &mut slot.mirrors {
            mirror.buffer.append(batch);
            if let Some(handle) = mirror.handle
                && let Err(error) = surface.append_batch(handle, batch)
            {
                Counters::incr(&self.ctx.counters.surface_errors);
                warn!(%error, %handle, "mirror append skipped");
            }
        }
    }

    /// Park a sample whose destination is not materialized yet. Bounded;
    /// oldest entries and budget-exhausted entries are dropped.
    pub fn defer(&mut self, sample: Sample, attempts: u32) {
        if attempts >= self.retry_budget {
            Counters::incr(&self.ctx.counters.deferred_dropped);
            debug!(series = %sample.series, attempts, "deferred sample exhausted retry budget");
            return;
        }
        // re-parked samples were already counted on their first park
        if attempts == 0 {
            Counters::incr(&self.ctx.counters.deferred);
        }
        self.deferred.push_back(Deferred { sample, attempts });
        if self.deferred.len() > self.deferred_capacity {
            self.deferred.pop_front();
            Counters::incr(&self.ctx.counters.deferred_dropped);
        }
    }

    /// Reclaim parked samples for re-resolution, but only after a registry
    /// mutation - retrying on every tick would hot-spin while a pane is
    /// mid-creation.
    pub fn take_deferred(&mut self) -> Vec<Deferred> {
        if !self.retry_armed || self.deferred.is_empty() {
            return Vec::new();
        }
        self.retry_armed = false;
        self.deferred
            .drain(..)
            .map(|entry| Deferred {
                sample: entry.sample,
                attempts: entry.attempts + 1,
            })
            .collect()
    }

    /// Apply a pane lifecycle event from the layout provider.
    pub fn apply_event<S: RenderingSurface + ?Sized>(
        &mut self,
        event: LayoutEvent,
        surface: &mut S,
    ) {
        match event {
            LayoutEvent::PaneCreated(pane) => self.pane_created(pane, surface),
            LayoutEvent::PaneRemoved(pane) => self.pane_removed(&pane, surface),
        }
    }

    fn pane_created<S: RenderingSurface + ?Sized>(&mut self, pane: PaneId, surface: &mut S) {
        if !self.panes.insert(pane.clone()) {
            return;
        }
        debug!(%pane, "pane materialized");
        self.retry_armed = true;

        // Eagerly recreate display bindings for every orphaned slot assigned
        // to the new pane, reusing retained data.
        for slot in &mut self.slots {
            if slot.binding.is_none() && slot.target_pane == pane {
                Self::bind_slot(&self.ctx, slot, surface, self.series_capacity);
            }
        }
        let rebind: Vec<BufferId> = self
            .slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| matches!(slot.key, SlotKey::Group(_)))
            .map(|(index, _)| BufferId(index))
            .collect();
        for id in rebind {
            self.sync_group_mirrors(id, surface);
        }
    }

    fn pane_removed<S: RenderingSurface + ?Sized>(&mut self, pane: &PaneId, surface: &mut S) {
        if !self.panes.shift_remove(pane) {
            return;
        }
        debug!(%pane, "pane removed, orphaning its bindings");

        for slot in &mut self.slots {
            if slot
                .binding
                .as_ref()
                .is_some_and(|binding| binding.pane == *pane)
                && let Some(binding) = slot.binding.take()
                && surface.remove_series(binding.handle).is_err()
            {
                Counters::incr(&self.ctx.counters.surface_errors);
            }
            // mirrors die with their pane; the primary buffer retains data
            slot.mirrors.retain_mut(|mirror| {
                if mirror.pane != *pane {
                    return true;
                }
                if let Some(handle) = mirror.handle.take()
                    && surface.remove_series(handle).is_err()
                {
                    Counters::incr(&self.ctx.counters.surface_errors);
                }
                false
            });
        }
        self.consolidator.forget_pane(pane);
    }

    /// Reconcile the registry against a replacement layout.
    ///
    /// Buffers whose series persists are never deleted - they are orphaned
    /// (display binding detached, data retained) and rebound to their new
    /// pane, so in-flight chunks can never write into a destroyed buffer.
    pub fn apply_layout<S: RenderingSurface + ?Sized>(&mut self, layout: Layout, surface: &mut S) {
        self.layout = layout;
        self.retry_armed = true;

        for slot in &mut self.slots {
            let target = match &slot.key {
                SlotKey::Series(series) => self.layout.spec(series).cloned(),
                // a group follows the first member still assigned anywhere
                SlotKey::Group(key) => self
                    .consolidator
                    .group(key)
                    .and_then(|info| {
                        info.members
                            .iter()
                            .find_map(|member| self.layout.spec(member))
                    })
                    .cloned(),
            };

            let Some(spec) = target else {
                // no longer visualized: orphan, retain data
                Self::orphan(&self.ctx, slot, surface);
                continue;
            };

            if spec.kind != slot.kind {
                // incompatible column shape: start the buffer over
                debug!(?slot.key, old = %slot.kind, new = %spec.kind, "series kind changed, resetting buffer");
                Self::orphan(&self.ctx, slot, surface);
                slot.kind = spec.kind;
                slot.buffer = SeriesBuffer::new(spec.kind, self.series_capacity);
                slot.mirrors.clear();
            } else if slot
                .binding
                .as_ref()
                .is_some_and(|binding| binding.pane != spec.pane)
            {
                // pending-recreation against the new pane
                Self::orphan(&self.ctx, slot, surface);
            }
            slot.target_pane = spec.pane.clone();

            if slot.binding.is_none() && self.panes.contains(&slot.target_pane) {
                Self::bind_slot(&self.ctx, slot, surface, self.series_capacity);
            }
        }
    }

    fn orphan<S: RenderingSurface + ?Sized>(ctx: &Context, slot: &mut Slot, surface: &mut S) {
        if let Some(binding) = slot.binding.take()
            && surface.remove_series(binding.handle).is_err()
        {
            Counters::incr(&ctx.counters.surface_errors);
        }
        for mirror in &mut slot.mirrors {
            if let Some(handle) = mirror.handle.take()
                && surface.remove_series(handle).is_err()
            {
                Counters::incr(&ctx.counters.surface_errors);
            }
        }
    }

    /// Union of data extents across all materialized buffers.
    pub fn data_extent(&self) -> Option<TimeExtent> {
        self.slots
            .iter()
            .filter_map(|slot| slot.buffer.extent())
            .reduce(TimeExtent::merge)
    }

    /// Materialized panes in creation order; the view controller keeps their
    /// windows width-and-position identical.
    pub fn materialized_panes(&self) -> impl Iterator<Item = &PaneId> {
        self.panes.iter()
    }

    pub fn has_data(&self) -> bool {
        self.slots.iter().any(|slot| !slot.buffer.is_empty())
    }

    /// Read access for metadata consumers; never exposes mutation.
    pub fn buffer(&self, id: BufferId) -> &SeriesBuffer {
        &self.slots[id.0].buffer
    }

    pub fn deferred_len(&self) -> usize {
        self.deferred.len()
    }
}
