// Copyright 2026 gridtier Project Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::sync::Arc;

use bitflags::bitflags;
use gridtier_common::{
    crc::{FieldChecksums, MatchTemplate},
    entry::{EntryVersion, GridEntry, TypeCode, Uid},
    layout::EntryLayout,
};
use gridtier_storage::driver::StorePosition;
use parking_lot::Mutex;

use crate::{
    backrefs::{BackRefs, IndexRef},
    bulk::{BulkPhase, BulkUnit},
    context::OperationContext,
    error::Result,
    policy::{hot_cache_action, CacheOperation, HotCacheAction},
    tiered::TierShared,
};

bitflags! {
    /// Placement and lifecycle bits of one residency.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ResidencyFlags: u16 {
        /// The entry is attached to an operation and must keep its resident snapshot.
        const PINNED = 0b0000_0001;
        /// The resident snapshot is newer than the stored value.
        const DIRTY = 0b0000_0010;
        /// The entry is logically removed and invisible to readers.
        const DELETED = 0b0000_0100;
        /// The removal is held back for transaction visibility, no physical remove yet.
        const PHANTOM = 0b0000_1000;
        /// A bulk unit is persisting this entry right now.
        const BULK_FLUSHING = 0b0001_0000;
        /// Index back references must be kept in their expanded form.
        const FULL_BACKREFS_FORCED = 0b0010_0000;
        /// The values matched the hot cache filter at the last evaluation.
        const MATCH_CACHE_FILTER = 0b0100_0000;
        /// The resident snapshot carries the indexed properties only.
        const INDEX_VIEW = 0b1000_0000;
    }
}

/// Result of a version fetch.
#[derive(Debug)]
pub enum FetchOutcome {
    /// The latest snapshot.
    Found(Arc<GridEntry>),
    /// The entry is deleted or the store has no value for it.
    Missing,
    /// The entry belongs to another thread's unflushed bulk unit. The caller must flush or wait
    /// for that unit and retry.
    Busy(Arc<BulkUnit>),
}

/// What a bulk flush has to do for one member.
#[derive(Debug)]
pub(crate) enum BulkMemberOp {
    /// Nothing pending, the member left the unit.
    Clean,
    /// Persist the snapshot, insert when `position` is `None`.
    Write {
        /// Snapshot to persist.
        entry: Arc<GridEntry>,
        /// Position of the previous write, if any.
        position: Option<StorePosition>,
    },
    /// Drop the entry, including the stored value when `position` is `Some`.
    Remove {
        /// Position of the stored value.
        position: Option<StorePosition>,
    },
    /// Deletion held back by a transaction, settle the dirty bit only.
    PhantomRemove,
}

#[derive(Debug)]
struct ResidencyState {
    loaded: Option<Arc<GridEntry>>,
    flags: ResidencyFlags,
    version: EntryVersion,
    checksums: FieldChecksums,
    position: Option<StorePosition>,
    backrefs: BackRefs,
    bulk: Option<Arc<BulkUnit>>,
}

/// Per-entry tiering state.
///
/// Tracks where the latest version of one entry lives: the resident snapshot, the hot cache, or
/// the blob store. All transitions happen under the entry's own mutex; the mutex is never held
/// while waiting on a bulk unit.
///
/// Pin, unpin and dirty marks come in strict pairs. Breaking a pair is a caller bug and panics.
pub struct EntryResidency {
    uid: Uid,
    type_code: TypeCode,
    state: Mutex<ResidencyState>,
}

impl std::fmt::Debug for EntryResidency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntryResidency")
            .field("uid", &self.uid)
            .field("type_code", &self.type_code)
            .finish()
    }
}

impl EntryResidency {
    /// Residency for a freshly written entry. Starts pinned with an unflushed snapshot.
    pub fn new_dirty(entry: &GridEntry) -> Self {
        Self {
            uid: entry.uid().clone(),
            type_code: entry.type_code(),
            state: Mutex::new(ResidencyState {
                loaded: Some(Arc::new(entry.clone())),
                flags: ResidencyFlags::PINNED | ResidencyFlags::DIRTY,
                version: entry.version(),
                checksums: FieldChecksums::from_entry(entry),
                position: None,
                backrefs: BackRefs::default(),
                bulk: None,
            }),
        }
    }

    /// Residency rebuilt from a stored entry. Starts clean and unloaded.
    pub fn recovered(entry: &GridEntry, position: Option<StorePosition>) -> Self {
        Self {
            uid: entry.uid().clone(),
            type_code: entry.type_code(),
            state: Mutex::new(ResidencyState {
                loaded: None,
                flags: ResidencyFlags::empty(),
                version: entry.version(),
                checksums: FieldChecksums::from_entry(entry),
                position,
                backrefs: BackRefs::default(),
                bulk: None,
            }),
        }
    }

    /// Entry uid.
    pub fn uid(&self) -> &Uid {
        &self.uid
    }

    /// Entry type code.
    pub fn type_code(&self) -> TypeCode {
        self.type_code
    }

    /// Current flags.
    pub fn flags(&self) -> ResidencyFlags {
        self.state.lock().flags
    }

    /// Latest version counter.
    pub fn version(&self) -> EntryVersion {
        self.state.lock().version
    }

    /// Where the stored value sits, if the entry was ever flushed.
    pub fn position(&self) -> Option<StorePosition> {
        self.state.lock().position
    }

    /// Whether the resident snapshot is ahead of the store.
    pub fn is_dirty(&self) -> bool {
        self.flags().contains(ResidencyFlags::DIRTY)
    }

    /// Whether a snapshot is resident.
    pub fn is_resident(&self) -> bool {
        self.state.lock().loaded.is_some()
    }

    /// Resolve the latest version of the entry.
    ///
    /// Serves the resident snapshot when one is present, then a context prefetch batch, then the
    /// caller's own last known snapshot, then the hot cache, and only then the blob store. Every
    /// non-resident source is accepted only when its version counter matches the residency.
    ///
    /// With `attach` the returned snapshot also becomes resident and pinned; `only_index_part`
    /// lets the store skip the non-indexed properties. A resident index-only view is refreshed
    /// in place whenever a full value comes through.
    pub(crate) fn latest(
        &self,
        shared: &TierShared,
        ctx: &OperationContext,
        attach: bool,
        last_known: Option<&Arc<GridEntry>>,
        only_index_part: bool,
    ) -> Result<FetchOutcome> {
        let mut state = self.state.lock();

        if state.flags.contains(ResidencyFlags::DELETED) {
            return Ok(FetchOutcome::Missing);
        }

        // An unflushed member of someone else's unit is unreadable until that unit settles.
        // Never wait here: the flusher needs this entry's mutex.
        if state.flags.intersects(ResidencyFlags::DIRTY | ResidencyFlags::BULK_FLUSHING) {
            if let Some(bulk) = &state.bulk {
                if bulk.is_active() && !bulk.is_owner() {
                    return Ok(FetchOutcome::Busy(bulk.clone()));
                }
            }
        }

        if let Some(loaded) = &state.loaded {
            if only_index_part || !state.flags.contains(ResidencyFlags::INDEX_VIEW) {
                return Ok(FetchOutcome::Found(loaded.clone()));
            }
            // The resident view holds the indexed properties only, the full value is below.
        }

        // Past the fast path with a snapshot still resident means the resident view is clipped
        // and the sources below carry the full value: refresh the view in place.
        let upgrade = state.loaded.is_some();

        if !attach {
            if let Some(layout) = ctx.prefetched(self.uid.as_str()) {
                if layout.version.matches(state.version) {
                    let entry = Arc::new(
                        layout
                            .clone()
                            .into_entry(self.uid.clone(), self.type_code)
                            .map_err(gridtier_storage::Error::Serde)?,
                    );
                    if upgrade {
                        self.attach_locked(&mut state, shared, entry.clone(), false);
                    }
                    return Ok(FetchOutcome::Found(entry));
                }
            }
        }

        if let Some(known) = last_known {
            if known.version().matches(state.version) {
                if attach || upgrade {
                    self.attach_locked(&mut state, shared, known.clone(), false);
                }
                return Ok(FetchOutcome::Found(known.clone()));
            }
        }

        if let Some(entry) = shared.hot_cache.get(self.uid.as_str()) {
            if entry.version().matches(state.version) {
                if attach || upgrade {
                    self.attach_locked(&mut state, shared, entry.clone(), false);
                }
                return Ok(FetchOutcome::Found(entry));
            }
        }

        let fetched = shared.storage.get(&self.uid, state.position, self.type_code, only_index_part)?;
        let Some(layout) = fetched else {
            return Ok(FetchOutcome::Missing);
        };
        let entry = Arc::new(
            layout
                .into_entry(self.uid.clone(), self.type_code)
                .map_err(gridtier_storage::Error::Serde)?,
        );
        if attach || upgrade {
            self.attach_locked(&mut state, shared, entry.clone(), only_index_part);
        }
        Ok(FetchOutcome::Found(entry))
    }

    fn attach_locked(
        &self,
        state: &mut ResidencyState,
        shared: &TierShared,
        entry: Arc<GridEntry>,
        index_view: bool,
    ) {
        if !index_view {
            state.checksums = FieldChecksums::from_entry(&entry);
        }
        state.flags.set(ResidencyFlags::INDEX_VIEW, index_view);
        state.flags.insert(ResidencyFlags::PINNED);
        if state.loaded.replace(entry).is_none() {
            shared.metrics.resident_entries.increase(1);
        }
    }

    /// Replace the resident snapshot with a mutated one.
    ///
    /// Assigns the next version counter and marks the entry dirty. The entry must be attached.
    /// Returns the snapshot that became resident.
    pub fn update(&self, entry: GridEntry) -> Arc<GridEntry> {
        let mut state = self.state.lock();
        assert!(
            state.flags.contains(ResidencyFlags::PINNED),
            "update of {} without attaching it first",
            self.uid,
        );
        state.version = state.version.bumped();
        let entry = Arc::new(entry.with_version(state.version));
        state.loaded = Some(entry.clone());
        state.flags.insert(ResidencyFlags::DIRTY);
        state.flags.remove(ResidencyFlags::INDEX_VIEW);
        entry
    }

    /// Mark the entry logically removed. The physical remove happens at the next flush.
    pub fn mark_deleted(&self) {
        let mut state = self.state.lock();
        assert!(
            state.flags.contains(ResidencyFlags::PINNED),
            "delete of {} without attaching it first",
            self.uid,
        );
        state.flags.insert(ResidencyFlags::DELETED | ResidencyFlags::DIRTY);
    }

    /// Hold the deletion back for transaction visibility.
    pub fn mark_phantom(&self) {
        self.state.lock().flags.insert(ResidencyFlags::PHANTOM);
    }

    /// Let a held back deletion proceed. The entry becomes dirty again so the next flush can
    /// settle the physical remove.
    pub fn clear_phantom(&self) {
        let mut state = self.state.lock();
        state.flags.remove(ResidencyFlags::PHANTOM);
        if state.flags.contains(ResidencyFlags::DELETED) {
            state.flags.insert(ResidencyFlags::DIRTY);
        }
    }

    /// Pin the entry. Panics when it is already pinned.
    pub fn pin(&self) {
        let mut state = self.state.lock();
        assert!(
            !state.flags.contains(ResidencyFlags::PINNED),
            "double pin of {}",
            self.uid,
        );
        state.flags.insert(ResidencyFlags::PINNED);
    }

    /// Drop the pin.
    ///
    /// Panics on an unpaired unpin, on a dirty entry, and on a live resident snapshot; dirty
    /// entries flush first and live snapshots go through unload. Returns whether a deleted
    /// entry's snapshot was dropped with the pin.
    pub fn unpin(&self) -> bool {
        let mut state = self.state.lock();
        assert!(
            state.flags.contains(ResidencyFlags::PINNED),
            "unpin of {} without a pin",
            self.uid,
        );
        assert!(!state.flags.contains(ResidencyFlags::DIRTY), "unpin of dirty {}", self.uid);
        assert!(
            state.flags.contains(ResidencyFlags::DELETED) || state.loaded.is_none(),
            "unpin of {} while it is resident",
            self.uid,
        );
        state.flags.remove(ResidencyFlags::PINNED | ResidencyFlags::INDEX_VIEW);
        state.loaded.take().is_some()
    }

    /// Mark the resident snapshot as ahead of the store. Panics when the entry is already dirty
    /// or has no pinned snapshot to be dirty with.
    pub fn set_dirty(&self) {
        let mut state = self.state.lock();
        assert!(
            state.flags.contains(ResidencyFlags::PINNED) && state.loaded.is_some(),
            "dirty mark on {} without a pinned snapshot",
            self.uid,
        );
        assert!(
            !state.flags.contains(ResidencyFlags::DIRTY),
            "redundant dirty mark on {}",
            self.uid,
        );
        state.flags.insert(ResidencyFlags::DIRTY);
    }

    /// Whether the entry could match `template`, without touching the store.
    ///
    /// Resident full snapshots answer exactly. Everything else answers from the recorded field
    /// checksums, which may say yes for a non-match but never no for a match.
    pub fn could_match(&self, template: &MatchTemplate) -> bool {
        if template.type_code() != self.type_code {
            return false;
        }
        let state = self.state.lock();
        if state.flags.contains(ResidencyFlags::DELETED) {
            return false;
        }
        match &state.loaded {
            Some(loaded) if !state.flags.contains(ResidencyFlags::INDEX_VIEW) => template.matches(loaded),
            _ => !state.checksums.rejects(&template.checksums()),
        }
    }

    /// Persist the pending snapshot, if any.
    ///
    /// Clean entries and members of an active bulk unit are a no-op; the unit settles its own
    /// members. `op` drives the hot cache placement of the written values.
    pub(crate) fn flush(&self, shared: &TierShared, op: CacheOperation) -> Result<()> {
        let mut state = self.state.lock();
        self.flush_locked(&mut state, shared, op)
    }

    fn flush_locked(
        &self,
        state: &mut ResidencyState,
        shared: &TierShared,
        op: CacheOperation,
    ) -> Result<()> {
        if !state.flags.contains(ResidencyFlags::DIRTY) {
            return Ok(());
        }
        if state.bulk.as_ref().is_some_and(|bulk| bulk.is_active()) {
            return Ok(());
        }

        if state.flags.contains(ResidencyFlags::DELETED) {
            if state.flags.contains(ResidencyFlags::PHANTOM) {
                state.flags.remove(ResidencyFlags::DIRTY);
                return Ok(());
            }
            if let Some(position) = state.position.take() {
                if let Err(e) = shared.storage.remove(&self.uid, self.type_code, position) {
                    state.position = Some(position);
                    tracing::warn!("[residency]: failed to remove {} from the store: {e}", self.uid);
                    return Err(e.into());
                }
            }
            shared.hot_cache.remove(self.uid.as_str());
            state.flags.remove(ResidencyFlags::DIRTY);
            return Ok(());
        }

        let Some(entry) = state.loaded.clone() else {
            unreachable!("dirty entry {} has no resident snapshot", self.uid);
        };
        let layout = EntryLayout::from_entry(&entry);
        let index_fields = shared.index_fields(self.type_code);
        let position = match state.position {
            None => shared.storage.add(&self.uid, self.type_code, &layout, &index_fields),
            Some(position) => {
                shared
                    .storage
                    .replace(&self.uid, self.type_code, position, &layout, &index_fields)
            }
        };
        match position {
            Ok(position) => state.position = Some(position),
            Err(e) => {
                // The snapshot stays dirty so a later flush can retry.
                tracing::warn!("[residency]: failed to write {} to the store: {e}", self.uid);
                return Err(e.into());
            }
        }
        state.checksums = FieldChecksums::from_entry(&entry);
        state.flags.remove(ResidencyFlags::DIRTY);
        self.apply_cache_policy_locked(state, shared, op, &entry);
        Ok(())
    }

    /// Evict the resident snapshot.
    ///
    /// Dirty entries flush first. Clean detached entries drop their snapshot and shrink their
    /// index back references; deleted entries keep theirs until the final unpin.
    pub(crate) fn unload(&self, shared: &TierShared) -> Result<()> {
        let mut state = self.state.lock();
        if state.flags.contains(ResidencyFlags::DIRTY) {
            let op = if state.position.is_none() { CacheOperation::Write } else { CacheOperation::Update };
            self.flush_locked(&mut state, shared, op)?;
        } else {
            let keep_full = state.flags.contains(ResidencyFlags::FULL_BACKREFS_FORCED);
            state.backrefs.economize(keep_full);
        }
        if state.flags.intersects(ResidencyFlags::DIRTY | ResidencyFlags::DELETED) {
            // Still pending: a bulk unit owns the flush, or the final unpin owns the teardown.
            return Ok(());
        }
        if state.loaded.take().is_some() {
            shared.metrics.resident_entries.decrease(1);
        }
        state.flags.remove(ResidencyFlags::PINNED | ResidencyFlags::INDEX_VIEW);
        Ok(())
    }

    /// Re-evaluate the hot cache placement of `entry` after `op`.
    pub(crate) fn apply_cache_policy(&self, shared: &TierShared, op: CacheOperation, entry: &Arc<GridEntry>) {
        let mut state = self.state.lock();
        self.apply_cache_policy_locked(&mut state, shared, op, entry);
    }

    fn apply_cache_policy_locked(
        &self,
        state: &mut ResidencyState,
        shared: &TierShared,
        op: CacheOperation,
        entry: &Arc<GridEntry>,
    ) {
        let is_hot = shared.hot_cache.matches_filter(entry);
        let was_hot = state.flags.contains(ResidencyFlags::MATCH_CACHE_FILTER);
        let decision = hot_cache_action(op, is_hot, was_hot, shared.hot_cache.is_full());
        match decision.action {
            HotCacheAction::Touch => {
                shared.hot_cache.store_or_touch(entry);
            }
            HotCacheAction::Remove => {
                shared.hot_cache.remove(self.uid.as_str());
            }
            HotCacheAction::None => {}
        }
        state.flags.set(ResidencyFlags::MATCH_CACHE_FILTER, is_hot);
        if decision.count_miss {
            shared.metrics.hot_data_miss.increase(1);
        }
    }

    /// Put the entry under `unit`.
    ///
    /// Fails with the blocking unit when the entry already sits in a different active one, or
    /// when `unit` stopped accepting members; the caller flushes or waits on the returned unit
    /// and retries.
    pub(crate) fn try_join_bulk(
        self: &Arc<Self>,
        unit: &Arc<BulkUnit>,
    ) -> std::result::Result<(), Arc<BulkUnit>> {
        {
            let mut state = self.state.lock();
            match &state.bulk {
                // A unit whose flush already started cannot cover new mutations.
                Some(current) if Arc::ptr_eq(current, unit) => {
                    if unit.phase() == BulkPhase::Open {
                        return Ok(());
                    }
                    return Err(current.clone());
                }
                Some(current) if current.is_active() => return Err(current.clone()),
                _ => state.bulk = Some(unit.clone()),
            }
        }
        // Register outside the entry mutex, the unit's flusher takes member mutexes.
        if unit.register(self.clone()) {
            Ok(())
        } else {
            let mut state = self.state.lock();
            if state.bulk.as_ref().is_some_and(|current| Arc::ptr_eq(current, unit)) {
                state.bulk = None;
            }
            Err(unit.clone())
        }
    }

    /// Snapshot what the bulk flush has to do for this member and fence further readers.
    pub(crate) fn prepare_bulk_op(&self, unit: &Arc<BulkUnit>) -> BulkMemberOp {
        let mut state = self.state.lock();
        if !state.flags.contains(ResidencyFlags::DIRTY) {
            Self::leave_unit(&mut state, unit);
            return BulkMemberOp::Clean;
        }
        state.flags.insert(ResidencyFlags::BULK_FLUSHING);
        if state.flags.contains(ResidencyFlags::DELETED) {
            if state.flags.contains(ResidencyFlags::PHANTOM) {
                return BulkMemberOp::PhantomRemove;
            }
            return BulkMemberOp::Remove { position: state.position };
        }
        let Some(entry) = state.loaded.clone() else {
            unreachable!("dirty entry {} has no resident snapshot", self.uid);
        };
        BulkMemberOp::Write {
            entry,
            position: state.position,
        }
    }

    /// Settle a written member: adopt the store position and clear the dirty bit, unless a newer
    /// mutation arrived while the batch was in flight.
    pub(crate) fn complete_bulk_write(&self, unit: &Arc<BulkUnit>, persisted: EntryVersion, position: StorePosition) {
        let mut state = self.state.lock();
        state.position = Some(position);
        state.flags.remove(ResidencyFlags::BULK_FLUSHING);
        Self::leave_unit(&mut state, unit);
        if state.version == persisted {
            if let Some(loaded) = &state.loaded {
                state.checksums = FieldChecksums::from_entry(loaded);
            }
            state.flags.remove(ResidencyFlags::DIRTY);
        }
    }

    /// Settle a removed member.
    pub(crate) fn complete_bulk_remove(&self, unit: &Arc<BulkUnit>) {
        let mut state = self.state.lock();
        state.position = None;
        state.flags.remove(ResidencyFlags::BULK_FLUSHING | ResidencyFlags::DIRTY);
        Self::leave_unit(&mut state, unit);
    }

    /// Settle a member whose deletion stays phantom. The stored value is kept.
    pub(crate) fn complete_bulk_phantom(&self, unit: &Arc<BulkUnit>) {
        let mut state = self.state.lock();
        state.flags.remove(ResidencyFlags::BULK_FLUSHING | ResidencyFlags::DIRTY);
        Self::leave_unit(&mut state, unit);
    }

    /// Roll a member back after a failed batch. The dirty bit stays so the entry flushes later.
    pub(crate) fn revert_bulk_flush(&self, unit: &Arc<BulkUnit>) {
        let mut state = self.state.lock();
        state.flags.remove(ResidencyFlags::BULK_FLUSHING);
        Self::leave_unit(&mut state, unit);
    }

    /// The member may have joined a newer unit while the batch was in flight, only detach it
    /// from `unit`.
    fn leave_unit(state: &mut ResidencyState, unit: &Arc<BulkUnit>) {
        if state.bulk.as_ref().is_some_and(|current| Arc::ptr_eq(current, unit)) {
            state.bulk = None;
        }
    }

    /// Bulk unit the entry currently belongs to.
    pub fn bulk(&self) -> Option<Arc<BulkUnit>> {
        self.state.lock().bulk.clone()
    }

    /// Record an index back reference.
    pub fn add_backref(&self, backref: IndexRef) {
        self.state.lock().backrefs.add(backref);
    }

    /// Drop an index back reference.
    pub fn remove_backref(&self, backref: IndexRef) {
        self.state.lock().backrefs.remove(&backref);
    }

    /// Recorded back reference count.
    pub fn backref_count(&self) -> usize {
        self.state.lock().backrefs.len()
    }

    /// Keep back references in their expanded form even while the entry is unloaded.
    pub fn force_full_backrefs(&self) {
        self.state.lock().flags.insert(ResidencyFlags::FULL_BACKREFS_FORCED);
    }
}

#[cfg(test)]
mod tests {
    use gridtier_common::entry::PropertyValue;

    use super::*;

    fn entry(uid: &str) -> GridEntry {
        GridEntry::new(
            uid,
            7,
            vec![PropertyValue::Text("alpha".to_string()), PropertyValue::Int(42)],
        )
    }

    #[test]
    fn test_new_dirty_starts_pinned() {
        let residency = EntryResidency::new_dirty(&entry("r-1"));
        assert!(residency.flags().contains(ResidencyFlags::PINNED | ResidencyFlags::DIRTY));
        assert!(residency.is_resident());
        assert_eq!(residency.version(), EntryVersion::INITIAL);
        assert_eq!(residency.position(), None);
    }

    #[test]
    fn test_recovered_starts_clean_and_unloaded() {
        let residency = EntryResidency::recovered(&entry("r-1"), Some(StorePosition::from_raw(3)));
        assert_eq!(residency.flags(), ResidencyFlags::empty());
        assert!(!residency.is_resident());
        assert_eq!(residency.position(), Some(StorePosition::from_raw(3)));
    }

    #[test]
    fn test_update_bumps_version_each_time() {
        let residency = EntryResidency::new_dirty(&entry("r-1"));
        let first = residency.update(entry("r-1"));
        assert_eq!(first.version(), EntryVersion::INITIAL.bumped());
        let second = residency.update(entry("r-1"));
        assert_eq!(second.version(), EntryVersion::INITIAL.bumped().bumped());
        assert_eq!(residency.version(), second.version());
        assert!(residency.is_dirty());
    }

    #[test]
    fn test_pin_unpin_pair() {
        let residency = EntryResidency::recovered(&entry("r-1"), None);
        residency.pin();
        assert!(residency.flags().contains(ResidencyFlags::PINNED));
        assert!(!residency.unpin());
        assert!(!residency.flags().contains(ResidencyFlags::PINNED));
    }

    #[test]
    #[should_panic(expected = "double pin")]
    fn test_double_pin_panics() {
        let residency = EntryResidency::recovered(&entry("r-1"), None);
        residency.pin();
        residency.pin();
    }

    #[test]
    #[should_panic(expected = "without a pin")]
    fn test_unpaired_unpin_panics() {
        let residency = EntryResidency::recovered(&entry("r-1"), None);
        residency.unpin();
    }

    #[test]
    #[should_panic(expected = "unpin of dirty")]
    fn test_unpin_of_dirty_entry_panics() {
        let residency = EntryResidency::new_dirty(&entry("r-1"));
        residency.unpin();
    }

    #[test]
    #[should_panic(expected = "redundant dirty mark")]
    fn test_redundant_dirty_mark_panics() {
        let residency = EntryResidency::new_dirty(&entry("r-1"));
        residency.set_dirty();
    }

    #[test]
    fn test_could_match_answers_from_resident_snapshot() {
        let residency = EntryResidency::new_dirty(&entry("r-1"));
        let hit = MatchTemplate::new(7).with_eq(1, PropertyValue::Int(42));
        let miss = MatchTemplate::new(7).with_eq(1, PropertyValue::Int(43));
        let wrong_type = MatchTemplate::new(8).with_eq(1, PropertyValue::Int(42));
        assert!(residency.could_match(&hit));
        assert!(!residency.could_match(&miss));
        assert!(!residency.could_match(&wrong_type));
    }

    #[test]
    fn test_could_match_never_rejects_a_match_while_unloaded() {
        let residency = EntryResidency::recovered(&entry("r-1"), None);
        let hit = MatchTemplate::new(7).with_eq(0, PropertyValue::Text("alpha".to_string()));
        assert!(residency.could_match(&hit));
    }

    #[test]
    fn test_phantom_holds_the_physical_remove() {
        let residency = EntryResidency::new_dirty(&entry("r-1"));
        let unit = BulkUnit::open(1);
        residency.mark_deleted();
        residency.mark_phantom();
        assert!(matches!(residency.prepare_bulk_op(&unit), BulkMemberOp::PhantomRemove));
        residency.complete_bulk_phantom(&unit);
        assert!(!residency.is_dirty());

        residency.clear_phantom();
        assert!(residency.is_dirty());
    }

    #[test]
    fn test_join_bulk_rejects_a_foreign_active_unit() {
        let residency = Arc::new(EntryResidency::new_dirty(&entry("r-1")));
        let first = BulkUnit::open(1);
        let second = BulkUnit::open(2);

        residency.try_join_bulk(&first).unwrap();
        let blocked = residency.try_join_bulk(&second).unwrap_err();
        assert!(Arc::ptr_eq(&blocked, &first));

        // Settling the first unit frees the entry for the second.
        assert!(matches!(residency.prepare_bulk_op(&first), BulkMemberOp::Write { .. }));
        residency.complete_bulk_write(&first, residency.version(), StorePosition::from_raw(1));
        first.finish();
        residency.try_join_bulk(&second).unwrap();
        assert!(residency.bulk().is_some_and(|unit| Arc::ptr_eq(&unit, &second)));
    }

    #[test]
    fn test_rejoining_a_flushing_unit_conflicts() {
        let residency = Arc::new(EntryResidency::new_dirty(&entry("r-1")));
        let unit = BulkUnit::open(1);
        residency.try_join_bulk(&unit).unwrap();

        let members = unit.try_begin_flush().unwrap();
        assert_eq!(members.len(), 1);
        let blocked = residency.try_join_bulk(&unit).unwrap_err();
        assert!(Arc::ptr_eq(&blocked, &unit));
    }

    #[test]
    fn test_rejoining_the_same_unit_is_idempotent() {
        let residency = Arc::new(EntryResidency::new_dirty(&entry("r-1")));
        let unit = BulkUnit::open(1);
        residency.try_join_bulk(&unit).unwrap();
        residency.try_join_bulk(&unit).unwrap();
        assert_eq!(unit.len(), 1);
    }
}
