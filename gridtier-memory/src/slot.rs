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

use std::sync::{
    atomic::{AtomicU8, Ordering},
    Arc,
};

use bitflags::bitflags;
use gridtier_common::entry::{EntryVersion, GridEntry, Uid};
use intrusive_collections::{intrusive_adapter, LinkedListAtomicLink};
use parking_lot::RwLock;

bitflags! {
    /// Slot status bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SlotStatus: u8 {
        /// An insert or touch holds the slot.
        const PENDING = 0b001;
        /// Logically removed, awaiting physical removal.
        const DELETED = 0b010;
        /// Physically detached from the map and the queue.
        const REMOVED = 0b100;
    }
}

/// Outcome of a logical removal attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// The caller marked the slot deleted and must finish the physical removal.
    Claimed,
    /// The slot was mid-insert or mid-touch. The holder finishes the removal.
    Deferred,
    /// The slot was already deleted or removed.
    AlreadyDying,
}

/// One cached entry.
///
/// The uid never changes. The snapshot is replaceable, newest version wins. All status
/// transitions go through compare-and-swap so no lock covers them.
#[derive(Debug)]
pub struct CacheSlot {
    uid: Uid,
    hash: u64,
    entry: RwLock<Arc<GridEntry>>,
    status: AtomicU8,
    pub(crate) link: LinkedListAtomicLink,
}

intrusive_adapter!(pub SlotAdapter = Arc<CacheSlot>: CacheSlot { link: LinkedListAtomicLink });

impl CacheSlot {
    /// Create a slot holding `entry`, starting in the pending state.
    pub fn new(entry: Arc<GridEntry>, hash: u64) -> Self {
        Self {
            uid: entry.uid().clone(),
            hash,
            entry: RwLock::new(entry),
            status: AtomicU8::new(SlotStatus::PENDING.bits()),
            link: LinkedListAtomicLink::new(),
        }
    }

    /// Uid of the cached entry.
    pub fn uid(&self) -> &Uid {
        &self.uid
    }

    /// Hash the cache derived from the uid.
    pub fn hash(&self) -> u64 {
        self.hash
    }

    /// Clone out the held snapshot.
    pub fn entry(&self) -> Arc<GridEntry> {
        self.entry.read().clone()
    }

    /// Version of the held snapshot.
    pub fn version(&self) -> EntryVersion {
        self.entry.read().version()
    }

    /// Replace the held snapshot if `incoming` carries a newer version.
    pub fn replace_if_newer(&self, incoming: &Arc<GridEntry>) -> bool {
        let mut held = self.entry.write();
        if !is_newer(incoming.version(), held.version()) {
            return false;
        }
        *held = incoming.clone();
        true
    }

    /// Current status.
    pub fn status(&self) -> SlotStatus {
        SlotStatus::from_bits_truncate(self.status.load(Ordering::Acquire))
    }

    /// Whether the slot is deleted or removed.
    pub fn is_dying(&self) -> bool {
        self.status().intersects(SlotStatus::DELETED | SlotStatus::REMOVED)
    }

    /// Claim the slot for a touch. Fails if any status bit is set.
    pub fn try_claim(&self) -> bool {
        self.status
            .compare_exchange(
                SlotStatus::empty().bits(),
                SlotStatus::PENDING.bits(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Claim the slot as an eviction victim. Fails if any status bit is set.
    pub fn try_claim_victim(&self) -> bool {
        self.status
            .compare_exchange(
                SlotStatus::empty().bits(),
                SlotStatus::DELETED.bits(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Drop the pending bit, returning the status left behind.
    ///
    /// A deleted bit in the returned status means a removal was deferred to this caller.
    pub fn clear_pending(&self) -> SlotStatus {
        let prev = self.status.fetch_and(!SlotStatus::PENDING.bits(), Ordering::AcqRel);
        SlotStatus::from_bits_truncate(prev & !SlotStatus::PENDING.bits())
    }

    /// Mark the slot logically deleted.
    pub fn try_mark_deleted(&self) -> DeleteOutcome {
        let mut current = self.status.load(Ordering::Acquire);
        loop {
            let status = SlotStatus::from_bits_truncate(current);
            if status.intersects(SlotStatus::DELETED | SlotStatus::REMOVED) {
                return DeleteOutcome::AlreadyDying;
            }
            match self.status.compare_exchange_weak(
                current,
                current | SlotStatus::DELETED.bits(),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    return if status.contains(SlotStatus::PENDING) {
                        DeleteOutcome::Deferred
                    } else {
                        DeleteOutcome::Claimed
                    };
                }
                Err(now) => current = now,
            }
        }
    }

    /// Take the deleted slot to removed. Only the winner performs the physical removal, which
    /// keeps the size accounting single-writer.
    pub fn try_mark_removed(&self) -> bool {
        self.status
            .compare_exchange(
                SlotStatus::DELETED.bits(),
                (SlotStatus::DELETED | SlotStatus::REMOVED).bits(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }
}

fn is_newer(incoming: EntryVersion, held: EntryVersion) -> bool {
    // Exhausted counters disable the comparison, the freshest snapshot has to win.
    if incoming.is_exhausted() || held.is_exhausted() {
        return true;
    }
    incoming.raw() > held.raw()
}

#[cfg(test)]
mod tests {
    use gridtier_common::entry::PropertyValue;

    use super::*;

    fn slot(version: u16) -> CacheSlot {
        let entry = GridEntry::new("slot-1", 1, vec![PropertyValue::Int(1)])
            .with_version(EntryVersion::from_raw(version));
        CacheSlot::new(Arc::new(entry), 7)
    }

    #[test]
    fn test_status_protocol() {
        let slot = slot(1);
        assert_eq!(slot.status(), SlotStatus::PENDING);
        assert!(!slot.try_claim());

        assert_eq!(slot.clear_pending(), SlotStatus::empty());
        assert!(slot.try_claim());
        assert!(!slot.try_claim_victim());
        slot.clear_pending();

        assert_eq!(slot.try_mark_deleted(), DeleteOutcome::Claimed);
        assert_eq!(slot.try_mark_deleted(), DeleteOutcome::AlreadyDying);
        assert!(slot.is_dying());

        assert!(slot.try_mark_removed());
        assert!(!slot.try_mark_removed());
        assert_eq!(slot.status(), SlotStatus::DELETED | SlotStatus::REMOVED);
    }

    #[test]
    fn test_delete_defers_to_pending_holder() {
        let slot = slot(1);
        slot.clear_pending();

        assert!(slot.try_claim());
        assert_eq!(slot.try_mark_deleted(), DeleteOutcome::Deferred);
        // The holder cannot take the slot to removed while pending is still set.
        assert!(!slot.try_mark_removed());

        let left = slot.clear_pending();
        assert!(left.contains(SlotStatus::DELETED));
        assert!(slot.try_mark_removed());
    }

    #[test]
    fn test_victim_claim_skips_dying_slots() {
        let slot = slot(1);
        slot.clear_pending();
        assert_eq!(slot.try_mark_deleted(), DeleteOutcome::Claimed);
        assert!(!slot.try_claim_victim());
        assert!(!slot.try_claim());
    }

    #[test]
    fn test_replace_only_if_newer() {
        let slot = slot(3);
        let newer = Arc::new(
            GridEntry::new("slot-1", 1, vec![PropertyValue::Int(2)]).with_version(EntryVersion::from_raw(4)),
        );
        let older = Arc::new(
            GridEntry::new("slot-1", 1, vec![PropertyValue::Int(0)]).with_version(EntryVersion::from_raw(2)),
        );
        let same = Arc::new(
            GridEntry::new("slot-1", 1, vec![PropertyValue::Int(9)]).with_version(EntryVersion::from_raw(4)),
        );

        assert!(slot.replace_if_newer(&newer));
        assert_eq!(slot.version(), EntryVersion::from_raw(4));
        assert!(!slot.replace_if_newer(&older));
        assert!(!slot.replace_if_newer(&same));
        assert_eq!(slot.entry().properties()[0], PropertyValue::Int(2));
    }

    #[test]
    fn test_exhausted_version_always_replaces() {
        let slot = slot(5);
        let exhausted = Arc::new(GridEntry::new("slot-1", 1, vec![]).with_version(EntryVersion::EXHAUSTED));
        assert!(slot.replace_if_newer(&exhausted));
        assert!(slot.version().is_exhausted());

        let normal = Arc::new(GridEntry::new("slot-1", 1, vec![]).with_version(EntryVersion::from_raw(6)));
        assert!(slot.replace_if_newer(&normal));
    }
}
