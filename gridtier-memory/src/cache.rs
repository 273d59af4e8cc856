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
    atomic::{AtomicU64, AtomicUsize, Ordering},
    Arc,
};

use gridtier_common::{entry::GridEntry, metrics::model::Metrics, strict_assert};
use hashbrown::{hash_table::Entry, HashTable};
use intrusive_collections::LinkedList;
use parking_lot::{Mutex, RwLock};
use twox_hash::XxHash64;

use crate::slot::{CacheSlot, DeleteOutcome, SlotAdapter, SlotStatus};

/// Entries inspected per queue before eviction moves to the next one.
const EVICTION_SCAN_LIMIT: usize = 64;

/// Decides whether an entry is worth keeping in the hot cache.
pub trait HotClassifier: Send + Sync + 'static {
    /// Whether `entry` is hot.
    fn is_hot(&self, entry: &GridEntry) -> bool;
}

impl<F> HotClassifier for F
where
    F: Fn(&GridEntry) -> bool + Send + Sync + 'static,
{
    fn is_hot(&self, entry: &GridEntry) -> bool {
        self(entry)
    }
}

impl HotClassifier for Box<dyn HotClassifier> {
    fn is_hot(&self, entry: &GridEntry) -> bool {
        self.as_ref().is_hot(entry)
    }
}

/// What [`HotCache::store_or_touch`] did with the entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOutcome {
    /// The cache is disabled, or the slot was busy or dying.
    Skipped,
    /// A fresh slot was registered.
    Inserted,
    /// An existing slot was refreshed.
    Touched,
}

/// Builder for [`HotCache`].
pub struct HotCacheBuilder {
    capacity: usize,
    shards: usize,
    classifier: Box<dyn HotClassifier>,
    metrics: Arc<Metrics>,
}

impl HotCacheBuilder {
    /// Start a builder for a cache holding at most `capacity` entries.
    ///
    /// A zero capacity disables the cache entirely.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            shards: 8,
            classifier: Box::new(|_: &GridEntry| true),
            metrics: Arc::new(Metrics::noop()),
        }
    }

    /// Set the shard count. Must be a power of two.
    pub fn with_shards(mut self, shards: usize) -> Self {
        self.shards = shards;
        self
    }

    /// Replace the hot/cold classifier. The default keeps everything.
    pub fn with_classifier(mut self, classifier: impl HotClassifier) -> Self {
        self.classifier = Box::new(classifier);
        self
    }

    /// Attach metrics.
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Build the cache.
    pub fn build(self) -> HotCache {
        assert!(
            self.shards.is_power_of_two(),
            "shards must be a power of two, given: {}",
            self.shards
        );
        HotCache {
            capacity: self.capacity,
            low_water: self.capacity / 10,
            shards: (0..self.shards).map(|_| RwLock::new(HashTable::new())).collect(),
            segments: (0..self.shards)
                .map(|_| Mutex::new(LinkedList::new(SlotAdapter::new())))
                .collect(),
            scan_cursor: AtomicUsize::new(0),
            size: AtomicUsize::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evicted: AtomicU64::new(0),
            classifier: self.classifier,
            metrics: self.metrics,
        }
    }
}

/// Bounded cache of hot entry snapshots with quasi-LRU eviction.
///
/// Lookups are served from sharded hash tables. Recency is approximated with one FIFO queue per
/// shard: a touch above the low-water mark requeues the slot at the tail, eviction scans a bounded
/// prefix of a queue and takes the first slot that is not mid-insert, mid-touch or dying.
pub struct HotCache {
    capacity: usize,
    low_water: usize,
    shards: Vec<RwLock<HashTable<Arc<CacheSlot>>>>,
    segments: Vec<Mutex<LinkedList<SlotAdapter>>>,
    scan_cursor: AtomicUsize,
    size: AtomicUsize,
    hits: AtomicU64,
    misses: AtomicU64,
    evicted: AtomicU64,
    classifier: Box<dyn HotClassifier>,
    metrics: Arc<Metrics>,
}

impl std::fmt::Debug for HotCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HotCache")
            .field("capacity", &self.capacity)
            .field("size", &self.size.load(Ordering::Relaxed))
            .finish()
    }
}

impl HotCache {
    /// Fetch the cached snapshot of `uid`.
    pub fn get(&self, uid: &str) -> Option<Arc<GridEntry>> {
        if self.disabled() {
            return None;
        }
        let hash = hash_uid(uid);
        let shard = self.shards[self.shard_index(hash)].read();
        match shard.find(hash, |slot| slot.uid().as_str() == uid) {
            Some(slot) if !slot.is_dying() => {
                let entry = slot.entry();
                self.hits.fetch_add(1, Ordering::Relaxed);
                self.metrics.hot_hit.increase(1);
                Some(entry)
            }
            _ => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                self.metrics.hot_miss.increase(1);
                None
            }
        }
    }

    /// Register `entry`, or refresh its slot when it is already cached.
    ///
    /// A fresh registration that pushes the cache over capacity evicts exactly one victim. A
    /// refresh replaces the held snapshot only when `entry` carries a newer version, and skips
    /// the requeue while the cache sits below the low-water mark.
    pub fn store_or_touch(&self, entry: &Arc<GridEntry>) -> StoreOutcome {
        if self.disabled() {
            return StoreOutcome::Skipped;
        }
        let uid = entry.uid().as_str();
        let hash = hash_uid(uid);
        loop {
            if let Some(slot) = self.lookup(uid, hash) {
                if slot.is_dying() {
                    // A concurrent removal owns the slot. Re-registering now would resurrect
                    // a uid the owner is about to unmap.
                    return StoreOutcome::Skipped;
                }
                return self.touch(&slot, entry);
            }
            match self.insert(entry, hash) {
                Some(outcome) => return outcome,
                // Lost the registration race, the winner's slot is in the map now.
                None => continue,
            }
        }
    }

    /// Drop the slot of `uid`. Returns whether this call initiated the removal.
    pub fn remove(&self, uid: &str) -> bool {
        if self.disabled() {
            return false;
        }
        let hash = hash_uid(uid);
        let Some(slot) = self.lookup(uid, hash) else {
            return false;
        };
        match slot.try_mark_deleted() {
            DeleteOutcome::Claimed => {
                let finished = self.finish_removal(&slot);
                strict_assert!(finished);
                self.metrics.hot_remove.increase(1);
                tracing::trace!("[hot cache]: removed {uid}");
                true
            }
            DeleteOutcome::Deferred => {
                self.metrics.hot_remove.increase(1);
                true
            }
            DeleteOutcome::AlreadyDying => false,
        }
    }

    /// Whether `uid` currently has a live slot. Does not count towards hit/miss.
    pub fn contains(&self, uid: &str) -> bool {
        if self.disabled() {
            return false;
        }
        let hash = hash_uid(uid);
        let shard = self.shards[self.shard_index(hash)].read();
        shard
            .find(hash, |slot| slot.uid().as_str() == uid)
            .is_some_and(|slot| !slot.is_dying())
    }

    /// Whether the cache is at or over capacity.
    pub fn is_full(&self) -> bool {
        self.size.load(Ordering::Acquire) >= self.capacity
    }

    /// Run the classifier on `entry`.
    pub fn matches_filter(&self, entry: &GridEntry) -> bool {
        self.classifier.is_hot(entry)
    }

    /// Configured capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Live slot count.
    pub fn size(&self) -> usize {
        self.size.load(Ordering::Acquire)
    }

    /// Lookups served from the cache.
    pub fn hit_count(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Lookups that found nothing.
    pub fn miss_count(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Slots dropped by capacity pressure.
    pub fn eviction_count(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }

    fn disabled(&self) -> bool {
        self.capacity == 0
    }

    fn shard_index(&self, hash: u64) -> usize {
        hash as usize & (self.shards.len() - 1)
    }

    fn segment_index(&self, hash: u64) -> usize {
        (hash >> 32) as usize & (self.segments.len() - 1)
    }

    fn lookup(&self, uid: &str, hash: u64) -> Option<Arc<CacheSlot>> {
        let shard = self.shards[self.shard_index(hash)].read();
        shard.find(hash, |slot| slot.uid().as_str() == uid).cloned()
    }

    fn touch(&self, slot: &Arc<CacheSlot>, entry: &Arc<GridEntry>) -> StoreOutcome {
        if !slot.try_claim() {
            // Another insert, touch or removal holds the slot. Recency is advisory, give up.
            return StoreOutcome::Skipped;
        }
        slot.replace_if_newer(entry);
        if self.size.load(Ordering::Acquire) >= self.low_water {
            let mut segment = self.segments[self.segment_index(slot.hash())].lock();
            if slot.link.is_linked() {
                let requeued = {
                    let mut cursor = unsafe { segment.cursor_mut_from_ptr(Arc::as_ptr(slot)) };
                    cursor.remove()
                };
                if let Some(requeued) = requeued {
                    segment.push_back(requeued);
                }
            }
        }
        if slot.clear_pending().contains(SlotStatus::DELETED) {
            // A removal arrived mid-touch and deferred the physical part to us.
            let finished = self.finish_removal(slot);
            strict_assert!(finished);
        }
        StoreOutcome::Touched
    }

    fn insert(&self, entry: &Arc<GridEntry>, hash: u64) -> Option<StoreOutcome> {
        let slot = Arc::new(CacheSlot::new(entry.clone(), hash));
        {
            let mut shard = self.shards[self.shard_index(hash)].write();
            match shard.entry(hash, |s| s.uid() == slot.uid(), |s| s.hash()) {
                Entry::Occupied(_) => return None,
                Entry::Vacant(vacant) => {
                    vacant.insert(slot.clone());
                }
            }
        }
        {
            let mut segment = self.segments[self.segment_index(hash)].lock();
            segment.push_back(slot.clone());
        }
        self.size.fetch_add(1, Ordering::AcqRel);
        self.metrics.hot_insert.increase(1);
        self.metrics.hot_usage.absolute(self.size.load(Ordering::Acquire) as u64);
        if slot.clear_pending().contains(SlotStatus::DELETED) {
            // A removal raced the registration and lost. Take the slot back out so the stale
            // snapshot does not survive its own removal.
            let finished = self.finish_removal(&slot);
            strict_assert!(finished);
            return Some(StoreOutcome::Inserted);
        }
        if self.size.load(Ordering::Acquire) > self.capacity {
            self.evict_one();
        }
        Some(StoreOutcome::Inserted)
    }

    /// Physically detach a slot that was taken to removed by this caller.
    fn finish_removal(&self, slot: &Arc<CacheSlot>) -> bool {
        if !slot.try_mark_removed() {
            return false;
        }
        {
            let mut segment = self.segments[self.segment_index(slot.hash())].lock();
            if slot.link.is_linked() {
                let mut cursor = unsafe { segment.cursor_mut_from_ptr(Arc::as_ptr(slot)) };
                cursor.remove();
            }
        }
        {
            let mut shard = self.shards[self.shard_index(slot.hash())].write();
            if let Ok(occupied) = shard.find_entry(slot.hash(), |s| Arc::ptr_eq(s, slot)) {
                occupied.remove();
            }
        }
        self.size.fetch_sub(1, Ordering::AcqRel);
        self.metrics.hot_usage.absolute(self.size.load(Ordering::Acquire) as u64);
        true
    }

    fn evict_one(&self) {
        let segments = self.segments.len();
        let start = self.scan_cursor.fetch_add(1, Ordering::Relaxed);
        for i in 0..segments {
            let index = (start + i) & (segments - 1);
            let victim = {
                let mut segment = self.segments[index].lock();
                let mut cursor = segment.front_mut();
                let mut scanned = 0;
                let mut victim = None;
                while scanned < EVICTION_SCAN_LIMIT {
                    let claimed = match cursor.get() {
                        None => break,
                        Some(slot) => slot.try_claim_victim(),
                    };
                    scanned += 1;
                    if claimed {
                        victim = cursor.remove();
                        break;
                    }
                    cursor.move_next();
                }
                victim
            };
            if let Some(slot) = victim {
                let finished = self.finish_removal(&slot);
                strict_assert!(finished);
                self.evicted.fetch_add(1, Ordering::Relaxed);
                self.metrics.hot_evict.increase(1);
                tracing::trace!("[hot cache]: evicted {}", slot.uid());
                return;
            }
        }
        // Every scanned slot was pending or dying. The next registration tries again.
    }
}

fn hash_uid(uid: &str) -> u64 {
    XxHash64::oneshot(0, uid.as_bytes())
}

#[cfg(test)]
mod tests {
    use gridtier_common::entry::{EntryVersion, PropertyValue};
    use rand::Rng;

    use super::*;

    fn entry(uid: &str, version: u16) -> Arc<GridEntry> {
        Arc::new(
            GridEntry::new(uid, 1, vec![PropertyValue::Int(version as i64)])
                .with_version(EntryVersion::from_raw(version)),
        )
    }

    fn cache(capacity: usize) -> HotCache {
        HotCacheBuilder::new(capacity).with_shards(1).build()
    }

    fn mapped(cache: &HotCache) -> usize {
        cache.shards.iter().map(|shard| shard.read().len()).sum()
    }

    #[test]
    fn test_capacity_bound_evicts_in_insertion_order() {
        let cache = cache(4);
        for i in 0..6 {
            assert_eq!(cache.store_or_touch(&entry(&format!("e{i}"), 1)), StoreOutcome::Inserted);
            assert!(cache.size() <= 4);
        }
        assert_eq!(cache.size(), 4);
        assert_eq!(cache.eviction_count(), 2);
        assert!(cache.get("e0").is_none());
        assert!(cache.get("e1").is_none());
        assert!(cache.get("e2").is_some());
        assert!(cache.get("e5").is_some());
    }

    #[test]
    fn test_disabled_cache_counts_nothing() {
        let cache = cache(0);
        assert_eq!(cache.store_or_touch(&entry("e0", 1)), StoreOutcome::Skipped);
        assert!(cache.get("e0").is_none());
        assert!(!cache.remove("e0"));
        assert_eq!(cache.size(), 0);
        assert_eq!(cache.hit_count(), 0);
        assert_eq!(cache.miss_count(), 0);
        assert!(cache.is_full());
    }

    #[test]
    fn test_touch_requeues_at_tail() {
        let cache = cache(10);
        for i in 0..10 {
            cache.store_or_touch(&entry(&format!("e{i}"), 1));
        }
        // Size sits above the low-water mark, so the touch requeues e0 behind everything else.
        assert_eq!(cache.store_or_touch(&entry("e0", 1)), StoreOutcome::Touched);
        cache.store_or_touch(&entry("e10", 1));
        assert!(cache.get("e0").is_some());
        assert!(cache.get("e1").is_none());
        assert_eq!(cache.eviction_count(), 1);
    }

    #[test]
    fn test_touch_below_low_water_skips_requeue() {
        let cache = cache(100);
        for i in 0..3 {
            cache.store_or_touch(&entry(&format!("e{i}"), 1));
        }
        // Below 10 entries the touch must not reorder, so e0 stays first in line.
        cache.store_or_touch(&entry("e0", 1));
        for i in 3..101 {
            cache.store_or_touch(&entry(&format!("e{i}"), 1));
        }
        assert!(cache.get("e0").is_none());
        assert!(cache.get("e1").is_some());
    }

    #[test]
    fn test_touch_replaces_only_newer_versions() {
        let cache = cache(4);
        cache.store_or_touch(&entry("e0", 2));
        cache.store_or_touch(&entry("e0", 5));
        assert_eq!(cache.get("e0").unwrap().version(), EntryVersion::from_raw(5));
        cache.store_or_touch(&entry("e0", 3));
        assert_eq!(cache.get("e0").unwrap().version(), EntryVersion::from_raw(5));
        assert_eq!(cache.size(), 1);
    }

    #[test]
    fn test_remove_drops_slot_and_size() {
        let cache = cache(4);
        cache.store_or_touch(&entry("e0", 1));
        cache.store_or_touch(&entry("e1", 1));

        assert!(cache.remove("e0"));
        assert!(!cache.remove("e0"));
        assert!(cache.get("e0").is_none());
        assert_eq!(cache.size(), 1);
        assert_eq!(mapped(&cache), 1);
    }

    #[test]
    fn test_eviction_skips_pending_slots() {
        let cache = cache(2);
        cache.store_or_touch(&entry("e0", 1));
        cache.store_or_touch(&entry("e1", 1));

        // Hold e0 mid-touch while the next insert forces an eviction.
        let held = cache.lookup("e0", hash_uid("e0")).unwrap();
        assert!(held.try_claim());
        cache.store_or_touch(&entry("e2", 1));
        held.clear_pending();

        assert!(cache.get("e0").is_some());
        assert!(cache.get("e1").is_none());
        assert!(cache.get("e2").is_some());
        assert_eq!(cache.size(), 2);
    }

    #[test]
    fn test_hit_miss_counters() {
        let cache = cache(4);
        cache.store_or_touch(&entry("e0", 1));
        assert!(cache.get("e0").is_some());
        assert!(cache.get("e0").is_some());
        assert!(cache.get("nope").is_none());
        assert_eq!(cache.hit_count(), 2);
        assert_eq!(cache.miss_count(), 1);
        assert!(cache.contains("e0"));
        assert_eq!(cache.hit_count(), 2);
    }

    #[test_log::test]
    fn test_concurrent_churn_stays_consistent() {
        let cache = Arc::new(HotCacheBuilder::new(16).with_shards(4).build());
        let handles = (0..4)
            .map(|t| {
                let cache = cache.clone();
                std::thread::spawn(move || {
                    let mut rng = rand::rng();
                    for i in 0..500 {
                        let uid = format!("k{}", rng.random_range(0..32));
                        match rng.random_range(0..3) {
                            0 => {
                                cache.store_or_touch(&entry(&uid, (i % 100 + t) as u16 + 1));
                            }
                            1 => {
                                cache.get(&uid);
                            }
                            _ => {
                                cache.remove(&uid);
                            }
                        }
                    }
                })
            })
            .collect::<Vec<_>>();
        for handle in handles {
            handle.join().unwrap();
        }

        assert!(cache.size() <= 16);
        assert_eq!(mapped(&cache), cache.size());
        for shard in &cache.shards {
            for slot in shard.read().iter() {
                assert!(!slot.status().contains(SlotStatus::REMOVED));
                assert!(slot.link.is_linked());
            }
        }
    }
}
