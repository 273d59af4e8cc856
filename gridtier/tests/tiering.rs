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
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use gridtier::prelude::*;

const TYPE_ORDER: TypeCode = 11;

fn entry(uid: &str, value: i64) -> GridEntry {
    GridEntry::new(
        uid,
        TYPE_ORDER,
        vec![
            PropertyValue::Text(format!("payload-{value}")),
            PropertyValue::Int(value),
        ],
    )
}

fn cache_over(driver: Arc<MemoryDriver>, hot_capacity: usize) -> TieredCache {
    let config = TieredCacheConfig {
        hot_capacity,
        ..Default::default()
    };
    TieredCacheBuilder::new(driver)
        .with_config(config)
        .build()
        .unwrap()
}

fn persistent_config() -> TieredCacheConfig {
    TieredCacheConfig {
        storage: StorageWrapperConfig {
            persistent: true,
            ..Default::default()
        },
        ..Default::default()
    }
}

#[test]
fn test_round_trip_is_served_by_the_hot_tier() {
    let driver = Arc::new(MemoryDriver::new());
    let cache = cache_over(driver.clone(), 64);
    let mut ctx = OperationContext::new();

    cache.insert(&mut ctx, entry("o-1", 1)).unwrap();
    assert_eq!(driver.len(), 1);
    let residency = cache.residency("o-1").unwrap();
    assert!(!residency.is_dirty());
    assert!(residency.position().is_some());
    assert!(cache.hot_cache().contains("o-1"));

    assert!(cache.unload("o-1").unwrap());
    assert!(!residency.is_resident());

    let read = cache.read(&mut ctx, "o-1", None).unwrap().unwrap();
    assert_eq!(read.properties()[1], PropertyValue::Int(1));
    // The hot tier answered, the store was never asked.
    assert_eq!(driver.get_count(), 0);
}

#[test]
fn test_cold_read_goes_to_the_store() {
    let driver = Arc::new(MemoryDriver::serializing());
    let cache = cache_over(driver.clone(), 0);
    let mut ctx = OperationContext::new();

    cache.insert(&mut ctx, entry("o-1", 7)).unwrap();
    cache.unload("o-1").unwrap();

    let first = cache.read(&mut ctx, "o-1", None).unwrap().unwrap();
    assert_eq!(driver.get_count(), 1);
    assert_eq!(first.properties()[1], PropertyValue::Int(7));
    assert_eq!(first.version(), EntryVersion::INITIAL);

    // A caller snapshot at the current version short-circuits the store round trip.
    let second = cache.read(&mut ctx, "o-1", Some(&first)).unwrap().unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(driver.get_count(), 1);
}

#[test]
fn test_update_replaces_in_place_and_bumps_the_version() {
    let driver = Arc::new(MemoryDriver::new());
    let cache = cache_over(driver.clone(), 0);
    let mut ctx = OperationContext::new();

    cache.insert(&mut ctx, entry("o-1", 1)).unwrap();
    let updated = cache.update(&mut ctx, entry("o-1", 2)).unwrap();
    assert_eq!(updated.version(), EntryVersion::INITIAL.bumped());
    assert_eq!(driver.add_count(), 1);
    assert_eq!(driver.replace_count(), 1);

    let read = cache.read(&mut ctx, "o-1", None).unwrap().unwrap();
    assert_eq!(read.properties()[1], PropertyValue::Int(2));
    assert_eq!(read.version(), EntryVersion::INITIAL.bumped());
}

#[test]
fn test_versions_climb_across_update_cycles() {
    let driver = Arc::new(MemoryDriver::new());
    let cache = cache_over(driver, 0);
    let mut ctx = OperationContext::new();

    cache.insert(&mut ctx, entry("o-1", 1)).unwrap();
    for value in 2..=5 {
        cache.update(&mut ctx, entry("o-1", value)).unwrap();
    }

    let read = cache.read(&mut ctx, "o-1", None).unwrap().unwrap();
    assert_eq!(read.version(), EntryVersion::from_raw(5));
    assert_eq!(read.properties()[1], PropertyValue::Int(5));
}

#[test]
fn test_take_removes_the_entry_everywhere() {
    let driver = Arc::new(MemoryDriver::new());
    let cache = cache_over(driver.clone(), 64);
    let mut ctx = OperationContext::new();

    cache.insert(&mut ctx, entry("o-1", 1)).unwrap();
    let taken = cache.take(&mut ctx, "o-1").unwrap().unwrap();
    assert_eq!(taken.properties()[1], PropertyValue::Int(1));

    assert_eq!(driver.len(), 0);
    assert_eq!(driver.remove_count(), 1);
    assert_eq!(cache.entry_count(), 0);
    assert!(!cache.hot_cache().contains("o-1"));
    assert!(cache.read(&mut ctx, "o-1", None).unwrap().is_none());
}

#[test]
fn test_pre_match_never_rejects_a_live_match() {
    let driver = Arc::new(MemoryDriver::new());
    let cache = cache_over(driver, 0);
    let mut ctx = OperationContext::new();
    cache.insert(&mut ctx, entry("o-1", 42)).unwrap();

    let hit = MatchTemplate::new(TYPE_ORDER).with_eq(1, PropertyValue::Int(42));
    let other_type = MatchTemplate::new(TYPE_ORDER + 1).with_eq(1, PropertyValue::Int(42));

    // Resident and unloaded alike keep answering a matching template.
    assert!(cache.pre_match("o-1", &hit));
    cache.unload("o-1").unwrap();
    assert!(cache.pre_match("o-1", &hit));
    assert!(!cache.pre_match("o-1", &other_type));

    cache.take(&mut ctx, "o-1").unwrap();
    assert!(!cache.pre_match("o-1", &hit));
}

#[test]
fn test_bulk_coalesces_into_one_store_batch() {
    let driver = Arc::new(MemoryDriver::new());
    let cache = cache_over(driver.clone(), 0);
    let mut ctx = OperationContext::new();

    cache.begin_bulk(&mut ctx);
    for value in 0..3 {
        cache.insert(&mut ctx, entry(&format!("b-{value}"), value)).unwrap();
    }
    assert_eq!(driver.add_count(), 0);
    assert_eq!(driver.bulk_count(), 0);
    assert!(cache.residency("b-0").unwrap().is_dirty());

    cache.flush_bulk(&mut ctx).unwrap();
    assert_eq!(driver.bulk_count(), 1);
    assert_eq!(driver.add_count(), 0);
    assert_eq!(driver.len(), 3);
    assert!(!cache.residency("b-0").unwrap().is_dirty());

    let read = cache.read(&mut ctx, "b-2", None).unwrap().unwrap();
    assert_eq!(read.properties()[1], PropertyValue::Int(2));
}

#[test]
fn test_bulk_take_settles_removals_at_flush() {
    let driver = Arc::new(MemoryDriver::new());
    let cache = cache_over(driver.clone(), 0);
    let mut ctx = OperationContext::new();

    cache.insert(&mut ctx, entry("b-0", 0)).unwrap();
    cache.insert(&mut ctx, entry("b-1", 1)).unwrap();

    cache.begin_bulk(&mut ctx);
    let taken = cache.take(&mut ctx, "b-0").unwrap().unwrap();
    assert_eq!(taken.properties()[1], PropertyValue::Int(0));
    // Logically gone right away, physically gone once the unit lands.
    assert!(cache.read(&mut ctx, "b-0", None).unwrap().is_none());
    assert_eq!(driver.len(), 2);

    cache.flush_bulk(&mut ctx).unwrap();
    assert_eq!(driver.len(), 1);
    assert_eq!(driver.bulk_count(), 1);
    assert_eq!(cache.entry_count(), 1);
    assert!(cache.residency("b-0").is_none());
}

#[derive(Debug, Default)]
struct CountingNotifier {
    inserts: AtomicUsize,
    updates: AtomicUsize,
    removes: AtomicUsize,
}

// The orphan rule forbids implementing the foreign trait on Arc<CountingNotifier> directly.
struct CountingHandle(Arc<CountingNotifier>);

impl ReplicationNotifier for CountingHandle {
    fn on_bulk_insert(&self, _entry: &GridEntry) {
        self.0.inserts.fetch_add(1, Ordering::SeqCst);
    }

    fn on_bulk_update(&self, _entry: &GridEntry) {
        self.0.updates.fetch_add(1, Ordering::SeqCst);
    }

    fn on_bulk_remove(&self, _uid: &Uid, _type_code: TypeCode) {
        self.0.removes.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn test_replication_sees_each_bulk_member_once() {
    let counts = Arc::new(CountingNotifier::default());
    let cache = TieredCacheBuilder::new(Arc::new(MemoryDriver::new()))
        .with_replication(CountingHandle(counts.clone()))
        .build()
        .unwrap();
    let mut ctx = OperationContext::new();

    cache.begin_bulk(&mut ctx);
    cache.insert(&mut ctx, entry("r-0", 0)).unwrap();
    cache.insert(&mut ctx, entry("r-1", 1)).unwrap();
    cache.flush_bulk(&mut ctx).unwrap();
    assert_eq!(counts.inserts.load(Ordering::SeqCst), 2);

    cache.begin_bulk(&mut ctx);
    cache.update(&mut ctx, entry("r-0", 10)).unwrap();
    cache.take(&mut ctx, "r-1").unwrap();
    cache.flush_bulk(&mut ctx).unwrap();
    assert_eq!(counts.inserts.load(Ordering::SeqCst), 2);
    assert_eq!(counts.updates.load(Ordering::SeqCst), 1);
    assert_eq!(counts.removes.load(Ordering::SeqCst), 1);

    // Individual flushes replicate through the grid engine, not the cache.
    cache.insert(&mut ctx, entry("r-2", 2)).unwrap();
    assert_eq!(counts.inserts.load(Ordering::SeqCst), 2);
}

#[test]
fn test_failed_flush_keeps_the_entry_dirty_and_retryable() {
    let driver = Arc::new(MemoryDriver::new());
    let cache = cache_over(driver.clone(), 0);
    let mut ctx = OperationContext::new();

    driver.inject_fault(FaultOp::Add);
    let err = cache.insert(&mut ctx, entry("o-1", 1)).unwrap_err();
    assert!(matches!(err, Error::Storage(_)));

    let residency = cache.residency("o-1").unwrap();
    assert!(residency.is_dirty());
    assert_eq!(driver.len(), 0);

    // The dirty snapshot keeps serving reads until a later flush settles it.
    let read = cache.read(&mut ctx, "o-1", None).unwrap().unwrap();
    assert_eq!(read.properties()[1], PropertyValue::Int(1));

    assert!(cache.unload("o-1").unwrap());
    assert!(!residency.is_dirty());
    assert_eq!(driver.len(), 1);
}

#[test]
fn test_bulk_failure_leaves_members_retryable() {
    let driver = Arc::new(MemoryDriver::new());
    let cache = cache_over(driver.clone(), 0);
    let mut ctx = OperationContext::new();

    cache.begin_bulk(&mut ctx);
    cache.insert(&mut ctx, entry("b-0", 0)).unwrap();
    cache.insert(&mut ctx, entry("b-1", 1)).unwrap();
    driver.inject_fault(FaultOp::Bulk);
    let err = cache.flush_bulk(&mut ctx).unwrap_err();
    assert!(matches!(err, Error::Storage(_)));

    for uid in ["b-0", "b-1"] {
        let residency = cache.residency(uid).unwrap();
        assert!(residency.is_dirty());
        assert!(residency.bulk().is_none());
    }
    assert_eq!(driver.len(), 0);

    // Shutdown settles what the failed unit left behind.
    cache.close().unwrap();
    assert_eq!(driver.len(), 2);
    assert!(!cache.residency("b-0").unwrap().is_dirty());
    assert!(!cache.residency("b-1").unwrap().is_dirty());
}

#[test]
fn test_off_heap_store_rejects_layered_caching() {
    let indexed = TieredCacheConfig {
        storage: StorageWrapperConfig {
            off_heap_cache_capacity: Some(1 << 16),
            ..Default::default()
        },
        ..Default::default()
    };
    let driver = Arc::new(OffHeapDriver::new(1 << 20).unwrap());
    let err = TieredCacheBuilder::new(driver)
        .with_config(indexed)
        .build()
        .unwrap_err();
    assert!(matches!(err, Error::Storage(_)));

    let driver = Arc::new(OffHeapDriver::new(1 << 20).unwrap());
    let err = TieredCacheBuilder::new(driver)
        .with_config(persistent_config())
        .build()
        .unwrap_err();
    assert!(matches!(err, Error::Storage(_)));
}

#[test]
fn test_initial_load_recovers_a_persistent_store() {
    let driver = Arc::new(MemoryDriver::serializing());
    let mut ctx = OperationContext::new();
    {
        let cache = TieredCacheBuilder::new(driver.clone())
            .with_config(persistent_config())
            .build()
            .unwrap();
        for value in 0..3 {
            cache.insert(&mut ctx, entry(&format!("p-{value}"), value)).unwrap();
        }
        cache.update(&mut ctx, entry("p-0", 100)).unwrap();
        cache.close().unwrap();
    }

    let recovered = TieredCacheBuilder::new(driver.clone())
        .with_config(persistent_config())
        .build()
        .unwrap();
    assert_eq!(recovered.entry_count(), 3);

    let residency = recovered.residency("p-0").unwrap();
    assert!(!residency.is_resident());
    assert!(!residency.is_dirty());
    assert!(residency.position().is_some());

    let read = recovered.read(&mut ctx, "p-0", None).unwrap().unwrap();
    assert_eq!(read.properties()[1], PropertyValue::Int(100));
    assert_eq!(read.version(), EntryVersion::INITIAL.bumped());
}

#[test]
fn test_prefetch_feeds_context_reads() {
    let driver = Arc::new(MemoryDriver::serializing());
    let cache = cache_over(driver.clone(), 0);
    let mut ctx = OperationContext::new();

    for value in 0..4 {
        let uid = format!("p-{value}");
        cache.insert(&mut ctx, entry(&uid, value)).unwrap();
        cache.unload(&uid).unwrap();
    }

    let mut batch = OperationContext::new();
    let loaded = cache
        .prefetch_into(&mut batch, &["p-0", "p-1", "p-2", "p-3", "p-missing"])
        .unwrap();
    assert_eq!(loaded, 4);

    let gets_after_prefetch = driver.get_count();
    for value in 0..4 {
        let read = cache.read(&mut batch, &format!("p-{value}"), None).unwrap().unwrap();
        assert_eq!(read.properties()[1], PropertyValue::Int(value));
    }
    assert_eq!(driver.get_count(), gets_after_prefetch);
}

#[test]
fn test_read_indexes_serves_the_clipped_view() {
    let driver = Arc::new(MemoryDriver::serializing());
    let registry = StaticTypeRegistry::new().with_type(TypeDescriptor {
        type_code: TYPE_ORDER,
        field_count: 2,
        index_fields: vec![1],
        requires_backrefs: false,
    });
    let config = TieredCacheConfig {
        hot_capacity: 0,
        storage: StorageWrapperConfig {
            off_heap_cache_capacity: Some(1 << 16),
            ..Default::default()
        },
        ..Default::default()
    };
    let cache = TieredCacheBuilder::new(driver.clone())
        .with_config(config)
        .with_metadata(registry)
        .build()
        .unwrap();
    let mut ctx = OperationContext::new();

    cache.insert(&mut ctx, entry("o-1", 42)).unwrap();
    cache.unload("o-1").unwrap();

    let view = cache.read_indexes(&mut ctx, "o-1").unwrap().unwrap();
    assert_eq!(view.properties()[1], PropertyValue::Int(42));
    assert_eq!(view.properties()[0], PropertyValue::Null);
    // The clipped view came out of the off-heap index cache and stays resident.
    assert_eq!(driver.get_count(), 0);
    let residency = cache.residency("o-1").unwrap();
    assert!(residency.flags().contains(ResidencyFlags::INDEX_VIEW));
    assert!(residency.is_resident());

    // A full read upgrades the clipped view in place.
    let full = cache.read(&mut ctx, "o-1", None).unwrap().unwrap();
    assert_eq!(full.properties()[0], PropertyValue::Text("payload-42".into()));
    assert_eq!(driver.get_count(), 1);
    assert!(!residency.flags().contains(ResidencyFlags::INDEX_VIEW));
}

#[test]
fn test_hot_tier_stays_within_capacity() {
    let driver = Arc::new(MemoryDriver::new());
    let config = TieredCacheConfig {
        hot_capacity: 4,
        hot_shards: 1,
        ..Default::default()
    };
    let cache = TieredCacheBuilder::new(driver.clone())
        .with_config(config)
        .build()
        .unwrap();
    let mut ctx = OperationContext::new();

    for value in 0..8 {
        cache.insert(&mut ctx, entry(&format!("h-{value}"), value)).unwrap();
    }
    assert!(cache.hot_cache().size() <= 4);
    assert!(cache.hot_cache().eviction_count() >= 4);

    // Evicted members still answer reads through the store tier.
    for value in 0..8 {
        let uid = format!("h-{value}");
        cache.unload(&uid).unwrap();
        let read = cache.read(&mut ctx, &uid, None).unwrap().unwrap();
        assert_eq!(read.properties()[1], PropertyValue::Int(value));
    }
}
