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

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    thread::ThreadId,
};

use parking_lot::{Condvar, Mutex};

use crate::residency::EntryResidency;

/// Lifecycle phase of a bulk unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BulkPhase {
    /// Accepting members.
    Open,
    /// One thread is persisting the members.
    Flushing,
    /// Every member callback ran, waiters are released.
    Completed,
}

#[derive(Debug)]
struct BulkState {
    phase: BulkPhase,
    members: Vec<Arc<EntryResidency>>,
}

/// A batch of entries whose flushes are coalesced into one backend round trip.
///
/// The unit is owned by the thread that opened it. Exactly one thread wins the Open to Flushing
/// transition and becomes responsible for persisting the members and running their completion
/// callbacks; that thread is usually the owner but may be a reader taking the unit over to get at
/// one of its members. Everyone else blocks on [`BulkUnit::wait_completed`].
pub struct BulkUnit {
    id: u64,
    owner: ThreadId,
    state: Mutex<BulkState>,
    completed: Condvar,
}

impl std::fmt::Debug for BulkUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BulkUnit")
            .field("id", &self.id)
            .field("owner", &self.owner)
            .field("phase", &self.phase())
            .finish()
    }
}

impl BulkUnit {
    /// Open a unit owned by the calling thread.
    pub fn open(id: u64) -> Arc<Self> {
        Arc::new(Self {
            id,
            owner: std::thread::current().id(),
            state: Mutex::new(BulkState {
                phase: BulkPhase::Open,
                members: vec![],
            }),
            completed: Condvar::new(),
        })
    }

    /// Unit id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Thread that opened the unit.
    pub fn owner(&self) -> ThreadId {
        self.owner
    }

    /// Whether the calling thread opened the unit.
    pub fn is_owner(&self) -> bool {
        std::thread::current().id() == self.owner
    }

    /// Current phase.
    pub fn phase(&self) -> BulkPhase {
        self.state.lock().phase
    }

    /// Whether the unit still holds its members.
    pub fn is_active(&self) -> bool {
        self.phase() != BulkPhase::Completed
    }

    /// Member count.
    pub fn len(&self) -> usize {
        self.state.lock().members.len()
    }

    /// Whether the unit has no members.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Admit `member` into the unit. Fails once the flush has started.
    pub fn register(&self, member: Arc<EntryResidency>) -> bool {
        let mut state = self.state.lock();
        if state.phase != BulkPhase::Open {
            return false;
        }
        if !state.members.iter().any(|m| m.uid() == member.uid()) {
            state.members.push(member);
        }
        true
    }

    /// Claim the flush. Exactly one caller gets the members.
    pub fn try_begin_flush(&self) -> Option<Vec<Arc<EntryResidency>>> {
        let mut state = self.state.lock();
        if state.phase != BulkPhase::Open {
            return None;
        }
        state.phase = BulkPhase::Flushing;
        Some(state.members.clone())
    }

    /// Mark the flush complete and release every waiter.
    pub fn finish(&self) {
        let mut state = self.state.lock();
        state.phase = BulkPhase::Completed;
        state.members.clear();
        drop(state);
        self.completed.notify_all();
    }

    /// Block until the unit completes. Returns immediately on a completed unit.
    pub fn wait_completed(&self) {
        let mut state = self.state.lock();
        while state.phase != BulkPhase::Completed {
            self.completed.wait(&mut state);
        }
    }
}

/// Mints bulk units with process-unique ids.
#[derive(Debug, Default)]
pub struct BulkCoordinator {
    next_id: AtomicU64,
}

impl BulkCoordinator {
    /// Create a coordinator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a fresh unit owned by the calling thread.
    pub fn begin(&self) -> Arc<BulkUnit> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        tracing::trace!("[bulk]: unit {id} opened");
        BulkUnit::open(id)
    }
}

#[cfg(test)]
mod tests {
    use gridtier_common::entry::{GridEntry, PropertyValue};

    use super::*;

    fn member(uid: &str) -> Arc<EntryResidency> {
        let entry = GridEntry::new(uid, 1, vec![PropertyValue::Int(1)]);
        Arc::new(EntryResidency::new_dirty(&entry))
    }

    #[test]
    fn test_register_deduplicates_and_respects_phase() {
        let unit = BulkUnit::open(1);
        assert!(unit.register(member("b-1")));
        assert!(unit.register(member("b-1")));
        assert!(unit.register(member("b-2")));
        assert_eq!(unit.len(), 2);

        assert!(unit.try_begin_flush().is_some());
        assert!(!unit.register(member("b-3")));
        assert_eq!(unit.len(), 2);
    }

    #[test]
    fn test_exactly_one_flusher_wins() {
        let unit = BulkUnit::open(1);
        unit.register(member("b-1"));

        let members = unit.try_begin_flush().unwrap();
        assert_eq!(members.len(), 1);
        assert!(unit.try_begin_flush().is_none());
        assert_eq!(unit.phase(), BulkPhase::Flushing);

        unit.finish();
        assert!(unit.try_begin_flush().is_none());
        assert_eq!(unit.phase(), BulkPhase::Completed);
        assert!(unit.is_empty());
    }

    #[test_log::test]
    fn test_waiters_block_until_finish() {
        let unit = BulkUnit::open(1);
        unit.register(member("b-1"));
        let _members = unit.try_begin_flush().unwrap();

        let handles = (0..3)
            .map(|_| {
                let unit = unit.clone();
                std::thread::spawn(move || {
                    assert!(!unit.is_owner());
                    unit.wait_completed();
                    assert_eq!(unit.phase(), BulkPhase::Completed);
                })
            })
            .collect::<Vec<_>>();

        std::thread::sleep(std::time::Duration::from_millis(20));
        unit.finish();
        for handle in handles {
            handle.join().unwrap();
        }

        // Completed units release late waiters immediately.
        unit.wait_completed();
    }

    #[test]
    fn test_coordinator_mints_unique_ids() {
        let coordinator = BulkCoordinator::new();
        let a = coordinator.begin();
        let b = coordinator.begin();
        assert_ne!(a.id(), b.id());
        assert!(a.is_owner());
    }
}
