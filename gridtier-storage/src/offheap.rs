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
    alloc::{alloc, dealloc, handle_alloc_error, Layout},
    collections::BTreeMap,
    slice::from_raw_parts,
    sync::atomic::{AtomicU64, AtomicUsize, Ordering},
};

use bytes::Bytes;
use gridtier_common::entry::{TypeCode, Uid};
use parking_lot::RwLock;

use crate::{
    driver::{BlobStoreDriver, BulkOpResult, BulkStoreOp, DriverItem, DriverIter, DriverStatistics, StorePosition, StoredValue},
    error::{Error, Result},
};

/// Handle to one off-heap allocation.
///
/// The handle owns the allocation exclusively and the bytes never change after construction.
/// It must be returned to the pool that minted it with [`OffHeapPool::free`].
#[derive(Debug)]
pub struct OffHeapHandle {
    ptr: *mut u8,
    len: usize,
}

unsafe impl Send for OffHeapHandle {}
unsafe impl Sync for OffHeapHandle {}

impl OffHeapHandle {
    /// View the stored bytes.
    pub fn as_slice(&self) -> &[u8] {
        unsafe { from_raw_parts(self.ptr, self.len) }
    }

    /// Stored byte count.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the allocation holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Capacity-bounded pool of raw allocations outside the managed heap accounting of the grid.
#[derive(Debug)]
pub struct OffHeapPool {
    capacity: usize,
    used: AtomicUsize,
}

impl OffHeapPool {
    /// Create a pool holding at most `capacity` payload bytes.
    pub fn new(capacity: usize) -> Self {
        // Reserved lengths must form valid layouts, so the capacity is clamped to the layout limit.
        Self {
            capacity: capacity.min(isize::MAX as usize),
            used: AtomicUsize::new(0),
        }
    }

    /// Copy `bytes` into a fresh off-heap allocation.
    pub fn allocate(&self, bytes: &[u8]) -> Result<OffHeapHandle> {
        let len = bytes.len();
        self.reserve(len)?;
        let layout = Self::layout(len);
        let ptr = unsafe { alloc(layout) };
        if ptr.is_null() {
            handle_alloc_error(layout);
        }
        unsafe { std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr, len) };
        Ok(OffHeapHandle { ptr, len })
    }

    /// Return an allocation to the pool.
    pub fn free(&self, handle: OffHeapHandle) {
        unsafe { dealloc(handle.ptr, Self::layout(handle.len)) };
        self.used.fetch_sub(handle.len, Ordering::Relaxed);
    }

    /// Payload bytes currently held.
    pub fn used(&self) -> usize {
        self.used.load(Ordering::Relaxed)
    }

    /// Payload byte capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn layout(len: usize) -> Layout {
        // Zero-sized payloads still get a distinct allocation so the handle stays unique.
        unsafe { Layout::from_size_align_unchecked(len.max(1), 1) }
    }

    fn reserve(&self, len: usize) -> Result<()> {
        let mut used = self.used.load(Ordering::Relaxed);
        loop {
            let next = used.saturating_add(len);
            if next > self.capacity {
                return Err(Error::OffHeapExhausted {
                    require: len,
                    capacity: self.capacity,
                });
            }
            match self
                .used
                .compare_exchange_weak(used, next, Ordering::Relaxed, Ordering::Relaxed)
            {
                Ok(_) => return Ok(()),
                Err(current) => used = current,
            }
        }
    }
}

/// Off-heap cache of the index-relevant byte form of stored entries.
///
/// Serves `indexes_only` fetches without touching the driver. Running out of pool capacity is not
/// an error, the fetch falls through to the driver instead.
#[derive(Debug)]
pub struct OffHeapCache {
    pool: OffHeapPool,
    map: RwLock<BTreeMap<Uid, OffHeapHandle>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl OffHeapCache {
    /// Create a cache bounded by `capacity` payload bytes. A zero capacity disables the cache.
    pub fn new(capacity: usize) -> Self {
        Self {
            pool: OffHeapPool::new(capacity),
            map: RwLock::new(BTreeMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Cache the index bytes of `uid`. Returns `false` when the pool cannot fit them.
    pub fn put(&self, uid: &Uid, bytes: &[u8]) -> bool {
        match self.pool.allocate(bytes) {
            Ok(handle) => {
                if let Some(old) = self.map.write().insert(uid.clone(), handle) {
                    self.pool.free(old);
                }
                true
            }
            Err(_) => {
                // Stale index bytes must not outlive the value they were clipped from.
                self.remove(uid.as_str());
                false
            }
        }
    }

    /// Fetch the cached index bytes of `uid`.
    pub fn get(&self, uid: &str) -> Option<Vec<u8>> {
        let map = self.map.read();
        match map.get(uid) {
            Some(handle) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(handle.as_slice().to_vec())
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Drop the cached bytes of `uid` if present.
    pub fn remove(&self, uid: &str) {
        if let Some(handle) = self.map.write().remove(uid) {
            self.pool.free(handle);
        }
    }

    /// Drop everything.
    pub fn clear(&self) {
        let map = std::mem::take(&mut *self.map.write());
        for handle in map.into_values() {
            self.pool.free(handle);
        }
    }

    /// Payload bytes currently cached.
    pub fn used_bytes(&self) -> usize {
        self.pool.used()
    }

    /// Fetches served from the cache.
    pub fn hit_count(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Fetches that fell through to the driver.
    pub fn miss_count(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }
}

impl Drop for OffHeapCache {
    fn drop(&mut self) {
        self.clear();
    }
}

#[derive(Debug)]
struct OffHeapSlot {
    type_code: TypeCode,
    position: StorePosition,
    handle: OffHeapHandle,
}

enum StagedOp {
    Add {
        uid: Uid,
        type_code: TypeCode,
        handle: OffHeapHandle,
    },
    Replace {
        uid: Uid,
        type_code: TypeCode,
        handle: OffHeapHandle,
    },
    Remove {
        uid: Uid,
    },
}

/// Driver keeping packed values in an off-heap pool of this process.
///
/// Volatile like the heap driver, but the stored bytes stay outside the managed heap.
#[derive(Debug)]
pub struct OffHeapDriver {
    pool: OffHeapPool,
    slots: RwLock<BTreeMap<Uid, OffHeapSlot>>,
    next_position: AtomicU64,
}

impl OffHeapDriver {
    /// Create a driver bounded by `capacity` payload bytes.
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::config("off-heap store requires a non-zero capacity"));
        }
        Ok(Self {
            pool: OffHeapPool::new(capacity),
            slots: RwLock::new(BTreeMap::new()),
            next_position: AtomicU64::new(1),
        })
    }

    /// Payload bytes currently stored.
    pub fn used_bytes(&self) -> usize {
        self.pool.used()
    }

    fn mint_position(&self) -> StorePosition {
        StorePosition::from_raw(self.next_position.fetch_add(1, Ordering::Relaxed))
    }

    fn packed(value: &StoredValue) -> Result<&Bytes> {
        match value {
            StoredValue::Packed(bytes) => Ok(bytes),
            StoredValue::Layout(_) => Err(Error::driver(anyhow::anyhow!("off-heap store expects packed values"))),
        }
    }

    fn clear(&self) {
        let slots = std::mem::take(&mut *self.slots.write());
        for slot in slots.into_values() {
            self.pool.free(slot.handle);
        }
    }
}

impl BlobStoreDriver for OffHeapDriver {
    fn needs_serialization(&self) -> bool {
        true
    }

    fn is_off_heap(&self) -> bool {
        true
    }

    fn add(&self, uid: &Uid, type_code: TypeCode, value: StoredValue) -> Result<StorePosition> {
        let handle = self.pool.allocate(Self::packed(&value)?)?;
        let position = self.mint_position();
        let mut slots = self.slots.write();
        if let Some(old) = slots.insert(
            uid.clone(),
            OffHeapSlot {
                type_code,
                position,
                handle,
            },
        ) {
            self.pool.free(old.handle);
        }
        Ok(position)
    }

    fn get(
        &self,
        uid: &Uid,
        _position: Option<StorePosition>,
        _type_code: TypeCode,
        _indexes_only: bool,
    ) -> Result<Option<StoredValue>> {
        let slots = self.slots.read();
        Ok(slots
            .get(uid.as_str())
            .map(|slot| StoredValue::Packed(Bytes::from(slot.handle.as_slice().to_vec()))))
    }

    fn replace(
        &self,
        uid: &Uid,
        type_code: TypeCode,
        _position: StorePosition,
        value: StoredValue,
    ) -> Result<StorePosition> {
        let handle = self.pool.allocate(Self::packed(&value)?)?;
        let position = self.mint_position();
        let mut slots = self.slots.write();
        let Some(slot) = slots.get_mut(uid.as_str()) else {
            drop(slots);
            self.pool.free(handle);
            return Err(Error::missing(uid));
        };
        let old = std::mem::replace(
            slot,
            OffHeapSlot {
                type_code,
                position,
                handle,
            },
        );
        self.pool.free(old.handle);
        Ok(position)
    }

    fn remove(&self, uid: &Uid, _type_code: TypeCode, _position: StorePosition) -> Result<()> {
        let slot = self.slots.write().remove(uid.as_str()).ok_or_else(|| Error::missing(uid))?;
        self.pool.free(slot.handle);
        Ok(())
    }

    fn remove_if_exists(&self, uid: &Uid, _type_code: TypeCode) -> Result<bool> {
        match self.slots.write().remove(uid.as_str()) {
            Some(slot) => {
                self.pool.free(slot.handle);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn execute_bulk(&self, ops: Vec<BulkStoreOp>, _transactional: bool) -> Result<Vec<BulkOpResult>> {
        // Allocations and applicability checks happen before any slot changes, so a failed batch
        // leaves the store untouched regardless of the transactional flag.
        let mut slots = self.slots.write();
        let mut staged = Vec::with_capacity(ops.len());
        let mut failure = None;
        for op in ops {
            let res = match op {
                BulkStoreOp::Add { uid, type_code, value } => Self::packed(&value)
                    .and_then(|bytes| self.pool.allocate(bytes))
                    .map(|handle| StagedOp::Add { uid, type_code, handle }),
                BulkStoreOp::Replace {
                    uid, type_code, value, ..
                } => {
                    if slots.contains_key(uid.as_str()) {
                        Self::packed(&value)
                            .and_then(|bytes| self.pool.allocate(bytes))
                            .map(|handle| StagedOp::Replace { uid, type_code, handle })
                    } else {
                        Err(Error::missing(&uid))
                    }
                }
                BulkStoreOp::Remove { uid, .. } => {
                    if slots.contains_key(uid.as_str()) {
                        Ok(StagedOp::Remove { uid })
                    } else {
                        Err(Error::missing(&uid))
                    }
                }
            };
            match res {
                Ok(staged_op) => staged.push(staged_op),
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }
        if let Some(e) = failure {
            for staged_op in staged {
                if let StagedOp::Add { handle, .. } | StagedOp::Replace { handle, .. } = staged_op {
                    self.pool.free(handle);
                }
            }
            return Err(e);
        }

        let mut results = Vec::with_capacity(staged.len());
        for staged_op in staged {
            match staged_op {
                StagedOp::Add { uid, type_code, handle } | StagedOp::Replace { uid, type_code, handle } => {
                    let position = self.mint_position();
                    if let Some(old) = slots.insert(
                        uid.clone(),
                        OffHeapSlot {
                            type_code,
                            position,
                            handle,
                        },
                    ) {
                        self.pool.free(old.handle);
                    }
                    results.push(BulkOpResult {
                        uid,
                        position: Some(position),
                    });
                }
                StagedOp::Remove { uid } => {
                    if let Some(old) = slots.remove(uid.as_str()) {
                        self.pool.free(old.handle);
                    }
                    results.push(BulkOpResult { uid, position: None });
                }
            }
        }
        Ok(results)
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
                    value: StoredValue::Packed(Bytes::from(slot.handle.as_slice().to_vec())),
                })
            })
            .collect::<Vec<_>>();
        Ok(Box::new(items.into_iter()))
    }

    fn initial_load_iter(&self) -> Result<DriverIter> {
        self.iter(None)
    }

    fn statistics(&self) -> DriverStatistics {
        DriverStatistics {
            entries: self.slots.read().len() as u64,
            bytes: self.pool.used() as u64,
        }
    }

    fn close(&self) -> Result<()> {
        self.clear();
        Ok(())
    }
}

impl Drop for OffHeapDriver {
    fn drop(&mut self) {
        self.clear();
    }
}
