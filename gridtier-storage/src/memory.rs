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
    collections::BTreeMap,
    sync::atomic::{AtomicU64, Ordering},
};

use gridtier_common::entry::{TypeCode, Uid};
use parking_lot::{Mutex, RwLock};

use crate::{
    driver::{BlobStoreDriver, BulkOpResult, BulkStoreOp, DriverItem, DriverIter, DriverStatistics, StorePosition, StoredValue},
    error::{Error, Result},
};

/// Operation kinds a fault can be injected into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultOp {
    /// Fail the next add.
    Add,
    /// Fail the next get.
    Get,
    /// Fail the next replace.
    Replace,
    /// Fail the next remove.
    Remove,
    /// Fail the next bulk execution.
    Bulk,
}

#[derive(Debug, Clone)]
struct MemorySlot {
    type_code: TypeCode,
    position: StorePosition,
    value: StoredValue,
}

/// Heap-backed driver.
///
/// Serves volatile single-partition deployments and doubles as the failure-injecting test double
/// for the revert paths of the residency layer.
#[derive(Debug)]
pub struct MemoryDriver {
    slots: RwLock<BTreeMap<Uid, MemorySlot>>,
    next_position: AtomicU64,
    serializing: bool,
    faults: Mutex<Vec<FaultOp>>,
    adds: AtomicU64,
    gets: AtomicU64,
    replaces: AtomicU64,
    removes: AtomicU64,
    bulks: AtomicU64,
}

impl Default for MemoryDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDriver {
    /// Create a driver that keeps typed layouts.
    pub fn new() -> Self {
        Self {
            slots: RwLock::new(BTreeMap::new()),
            next_position: AtomicU64::new(1),
            serializing: false,
            faults: Mutex::new(vec![]),
            adds: AtomicU64::new(0),
            gets: AtomicU64::new(0),
            replaces: AtomicU64::new(0),
            removes: AtomicU64::new(0),
            bulks: AtomicU64::new(0),
        }
    }

    /// Create a driver that insists on packed payloads, exercising the serialization path.
    pub fn serializing() -> Self {
        Self {
            serializing: true,
            ..Self::new()
        }
    }

    /// Make the next operation of the given kind fail once.
    pub fn inject_fault(&self, op: FaultOp) {
        self.faults.lock().push(op);
    }

    fn take_fault(&self, op: FaultOp) -> bool {
        let mut faults = self.faults.lock();
        match faults.iter().position(|f| *f == op) {
            Some(i) => {
                faults.remove(i);
                true
            }
            None => false,
        }
    }

    fn mint_position(&self) -> StorePosition {
        StorePosition::from_raw(self.next_position.fetch_add(1, Ordering::Relaxed))
    }

    /// Stored entry count.
    pub fn len(&self) -> usize {
        self.slots.read().len()
    }

    /// Whether the driver holds no entries.
    pub fn is_empty(&self) -> bool {
        self.slots.read().is_empty()
    }

    /// Whether a value is stored for `uid`.
    pub fn contains(&self, uid: &str) -> bool {
        self.slots.read().contains_key(uid)
    }

    /// Adds served so far.
    pub fn add_count(&self) -> u64 {
        self.adds.load(Ordering::Relaxed)
    }

    /// Gets served so far.
    pub fn get_count(&self) -> u64 {
        self.gets.load(Ordering::Relaxed)
    }

    /// Replaces served so far.
    pub fn replace_count(&self) -> u64 {
        self.replaces.load(Ordering::Relaxed)
    }

    /// Removes served so far.
    pub fn remove_count(&self) -> u64 {
        self.removes.load(Ordering::Relaxed)
    }

    /// Bulk executions served so far.
    pub fn bulk_count(&self) -> u64 {
        self.bulks.load(Ordering::Relaxed)
    }

    fn apply(&self, slots: &mut BTreeMap<Uid, MemorySlot>, op: BulkStoreOp) -> Result<BulkOpResult> {
        match op {
            BulkStoreOp::Add { uid, type_code, value } => {
                let position = self.mint_position();
                slots.insert(
                    uid.clone(),
                    MemorySlot {
                        type_code,
                        position,
                        value,
                    },
                );
                Ok(BulkOpResult {
                    uid,
                    position: Some(position),
                })
            }
            BulkStoreOp::Replace {
                uid,
                type_code,
                position,
                value,
            } => {
                let slot = slots.get_mut(uid.as_str()).ok_or_else(|| Error::missing(&uid))?;
                debug_assert_eq!(slot.position, position);
                let position = self.mint_position();
                *slot = MemorySlot {
                    type_code,
                    position,
                    value,
                };
                Ok(BulkOpResult {
                    uid,
                    position: Some(position),
                })
            }
            BulkStoreOp::Remove { uid, position, .. } => {
                let slot = slots.remove(uid.as_str()).ok_or_else(|| Error::missing(&uid))?;
                debug_assert_eq!(slot.position, position);
                Ok(BulkOpResult { uid, position: None })
            }
        }
    }
}

impl BlobStoreDriver for MemoryDriver {
    fn needs_serialization(&self) -> bool {
        self.serializing
    }

    fn add(&self, uid: &Uid, type_code: TypeCode, value: StoredValue) -> Result<StorePosition> {
        self.adds.fetch_add(1, Ordering::Relaxed);
        if self.take_fault(FaultOp::Add) {
            return Err(Error::driver(anyhow::anyhow!("injected add fault: {uid}")));
        }
        let position = self.mint_position();
        self.slots.write().insert(
            uid.clone(),
            MemorySlot {
                type_code,
                position,
                value,
            },
        );
        Ok(position)
    }

    fn get(
        &self,
        uid: &Uid,
        _position: Option<StorePosition>,
        _type_code: TypeCode,
        _indexes_only: bool,
    ) -> Result<Option<StoredValue>> {
        self.gets.fetch_add(1, Ordering::Relaxed);
        if self.take_fault(FaultOp::Get) {
            return Err(Error::driver(anyhow::anyhow!("injected get fault: {uid}")));
        }
        Ok(self.slots.read().get(uid.as_str()).map(|slot| slot.value.clone()))
    }

    fn replace(
        &self,
        uid: &Uid,
        type_code: TypeCode,
        position: StorePosition,
        value: StoredValue,
    ) -> Result<StorePosition> {
        self.replaces.fetch_add(1, Ordering::Relaxed);
        if self.take_fault(FaultOp::Replace) {
            return Err(Error::driver(anyhow::anyhow!("injected replace fault: {uid}")));
        }
        let mut slots = self.slots.write();
        let result = self.apply(
            &mut slots,
            BulkStoreOp::Replace {
                uid: uid.clone(),
                type_code,
                position,
                value,
            },
        )?;
        Ok(result.position.unwrap_or(position))
    }

    fn remove(&self, uid: &Uid, type_code: TypeCode, position: StorePosition) -> Result<()> {
        self.removes.fetch_add(1, Ordering::Relaxed);
        if self.take_fault(FaultOp::Remove) {
            return Err(Error::driver(anyhow::anyhow!("injected remove fault: {uid}")));
        }
        let mut slots = self.slots.write();
        self.apply(
            &mut slots,
            BulkStoreOp::Remove {
                uid: uid.clone(),
                type_code,
                position,
            },
        )?;
        Ok(())
    }

    fn remove_if_exists(&self, uid: &Uid, _type_code: TypeCode) -> Result<bool> {
        self.removes.fetch_add(1, Ordering::Relaxed);
        if self.take_fault(FaultOp::Remove) {
            return Err(Error::driver(anyhow::anyhow!("injected remove fault: {uid}")));
        }
        Ok(self.slots.write().remove(uid.as_str()).is_some())
    }

    fn execute_bulk(&self, ops: Vec<BulkStoreOp>, transactional: bool) -> Result<Vec<BulkOpResult>> {
        self.bulks.fetch_add(1, Ordering::Relaxed);
        if self.take_fault(FaultOp::Bulk) {
            return Err(Error::driver(anyhow::anyhow!("injected bulk fault")));
        }
        let mut slots = self.slots.write();
        if transactional {
            // All or nothing: stage on a copy, commit on success.
            let mut staged = slots.clone();
            let mut results = Vec::with_capacity(ops.len());
            for op in ops {
                results.push(self.apply(&mut staged, op)?);
            }
            *slots = staged;
            Ok(results)
        } else {
            ops.into_iter().map(|op| self.apply(&mut slots, op)).collect()
        }
    }

    fn iter(&self, type_code: Option<TypeCode>) -> Result<DriverIter> {
        let items = self
            .slots
            .read()
            .iter()
            .filter(|(_, slot)| type_code.is_none_or(|t| slot.type_code == t))
            .map(|(uid, slot)| {
                Ok(DriverItem {
                    uid: uid.clone(),
                    type_code: slot.type_code,
                    position: Some(slot.position),
                    value: slot.value.clone(),
                })
            })
            .collect::<Vec<_>>();
        Ok(Box::new(items.into_iter()))
    }

    fn initial_load_iter(&self) -> Result<DriverIter> {
        self.iter(None)
    }

    fn statistics(&self) -> DriverStatistics {
        let slots = self.slots.read();
        let bytes = slots.values().map(|slot| slot.value.byte_len() as u64).sum();
        DriverStatistics {
            entries: slots.len() as u64,
            bytes,
        }
    }
}

#[cfg(test)]
mod tests {
    use gridtier_common::{
        entry::{GridEntry, PropertyValue},
        layout::EntryLayout,
    };

    use super::*;

    fn value(marker: i64) -> StoredValue {
        let entry = GridEntry::new(format!("mem-{marker}"), 1, vec![PropertyValue::Int(marker)]);
        StoredValue::Layout(Box::new(EntryLayout::from_entry(&entry)))
    }

    #[test]
    fn test_add_get_replace_remove() {
        let driver = MemoryDriver::new();
        let uid = Uid::from("mem-1");

        let p1 = driver.add(&uid, 1, value(1)).unwrap();
        assert!(driver.get(&uid, Some(p1), 1, false).unwrap().is_some());

        let p2 = driver.replace(&uid, 1, p1, value(2)).unwrap();
        assert_ne!(p1, p2);

        driver.remove(&uid, 1, p2).unwrap();
        assert!(driver.get(&uid, None, 1, false).unwrap().is_none());
        assert!(matches!(driver.remove(&uid, 1, p2), Err(Error::Missing { .. })));
    }

    #[test]
    fn test_transactional_bulk_rolls_back() {
        let driver = MemoryDriver::new();
        let present = Uid::from("mem-present");
        let position = driver.add(&present, 1, value(1)).unwrap();

        let ops = vec![
            BulkStoreOp::Add {
                uid: Uid::from("mem-new"),
                type_code: 1,
                value: value(2),
            },
            BulkStoreOp::Remove {
                uid: Uid::from("mem-absent"),
                type_code: 1,
                position,
            },
        ];
        assert!(driver.execute_bulk(ops, true).is_err());
        // The add staged before the failing remove must not be visible.
        assert!(!driver.contains("mem-new"));
        assert!(driver.contains("mem-present"));
    }

    #[test]
    fn test_injected_fault_fails_once() {
        let driver = MemoryDriver::new();
        let uid = Uid::from("mem-1");
        driver.inject_fault(FaultOp::Add);

        assert!(driver.add(&uid, 1, value(1)).is_err());
        assert!(driver.add(&uid, 1, value(1)).is_ok());
        assert_eq!(driver.add_count(), 2);
    }

    #[test]
    fn test_iter_filters_by_type() {
        let driver = MemoryDriver::new();
        driver.add(&Uid::from("a"), 1, value(1)).unwrap();
        driver.add(&Uid::from("b"), 2, value(2)).unwrap();
        driver.add(&Uid::from("c"), 1, value(3)).unwrap();

        let uids = driver
            .iter(Some(1))
            .unwrap()
            .map(|item| item.unwrap().uid.to_string())
            .collect::<Vec<_>>();
        assert_eq!(uids, vec!["a".to_string(), "c".to_string()]);
        assert_eq!(driver.statistics().entries, 3);
    }
}
