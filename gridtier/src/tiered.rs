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

use std::{collections::BTreeMap, sync::Arc};

use gridtier_common::{
    crc::MatchTemplate,
    entry::{GridEntry, TypeCode, Uid},
    layout::EntryLayout,
    metrics::model::Metrics,
    strict_assert_eq,
};
use gridtier_memory::{HotCache, HotCacheBuilder, HotClassifier};
use gridtier_storage::{
    driver::BlobStoreDriver,
    statistics::StatisticsSnapshot,
    wrapper::{PrefetchRequest, StorageBulkOp, StorageWrapper, StorageWrapperConfig},
};
use itertools::Itertools;
use parking_lot::RwLock;
use twox_hash::XxHash64;

use crate::{
    bulk::{BulkCoordinator, BulkUnit},
    context::OperationContext,
    error::{Error, Result},
    meta::{StaticTypeRegistry, TypeDescriptor, TypeMetadataProvider},
    policy::CacheOperation,
    replication::{NoopReplicationNotifier, ReplicationNotifier},
    residency::{BulkMemberOp, EntryResidency, FetchOutcome},
};

/// Pieces shared by every residency of one cache.
pub(crate) struct TierShared {
    pub(crate) hot_cache: HotCache,
    pub(crate) storage: StorageWrapper,
    pub(crate) meta: Arc<dyn TypeMetadataProvider>,
    pub(crate) replication: Arc<dyn ReplicationNotifier>,
    pub(crate) metrics: Arc<Metrics>,
}

impl TierShared {
    /// Indexed property slots of `type_code`.
    pub(crate) fn index_fields(&self, type_code: TypeCode) -> Vec<usize> {
        self.meta
            .descriptor(type_code)
            .unwrap_or_else(|| TypeDescriptor::untyped(type_code))
            .index_fields
    }

    /// Whether `type_code` keeps index back references in their expanded form.
    pub(crate) fn requires_full_backrefs(&self, type_code: TypeCode) -> bool {
        self.meta
            .descriptor(type_code)
            .is_some_and(|descriptor| descriptor.requires_backrefs)
    }
}

/// Knobs of a [`TieredCache`].
#[derive(Debug, Clone)]
pub struct TieredCacheConfig {
    /// Hot cache capacity in entries. Zero disables the hot tier.
    pub hot_capacity: usize,
    /// Hot cache shard count. Must be a power of two.
    pub hot_shards: usize,
    /// Residency catalog shard count. Must be a power of two.
    pub catalog_shards: usize,
    /// Storage wrapper configuration.
    pub storage: StorageWrapperConfig,
}

impl Default for TieredCacheConfig {
    fn default() -> Self {
        Self {
            hot_capacity: 1024,
            hot_shards: 8,
            catalog_shards: 16,
            storage: StorageWrapperConfig::default(),
        }
    }
}

/// Builder for [`TieredCache`].
pub struct TieredCacheBuilder {
    driver: Arc<dyn BlobStoreDriver>,
    config: TieredCacheConfig,
    meta: Arc<dyn TypeMetadataProvider>,
    replication: Arc<dyn ReplicationNotifier>,
    classifier: Option<Box<dyn HotClassifier>>,
    metrics: Arc<Metrics>,
}

impl TieredCacheBuilder {
    /// Start a builder over `driver` with the default configuration.
    pub fn new(driver: Arc<dyn BlobStoreDriver>) -> Self {
        Self {
            driver,
            config: TieredCacheConfig::default(),
            meta: Arc::new(StaticTypeRegistry::new()),
            replication: Arc::new(NoopReplicationNotifier),
            classifier: None,
            metrics: Arc::new(Metrics::noop()),
        }
    }

    /// Set the configuration.
    pub fn with_config(mut self, config: TieredCacheConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the type metadata provider.
    pub fn with_metadata(mut self, meta: impl TypeMetadataProvider) -> Self {
        self.meta = Arc::new(meta);
        self
    }

    /// Set the replication notifier called after bulk flushes.
    pub fn with_replication(mut self, replication: impl ReplicationNotifier) -> Self {
        self.replication = Arc::new(replication);
        self
    }

    /// Set the hot cache admission filter.
    pub fn with_classifier(mut self, classifier: impl HotClassifier) -> Self {
        self.classifier = Some(Box::new(classifier));
        self
    }

    /// Set the metrics sink.
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Build the cache.
    ///
    /// A persistent store is recovered immediately: every stored entry gets a clean unloaded
    /// residency before the cache is handed out.
    pub fn build(self) -> Result<TieredCache> {
        if self.config.catalog_shards == 0 || !self.config.catalog_shards.is_power_of_two() {
            return Err(Error::config("catalog shard count must be a power of two"));
        }
        if self.config.hot_shards == 0 || !self.config.hot_shards.is_power_of_two() {
            return Err(Error::config("hot cache shard count must be a power of two"));
        }

        let storage = StorageWrapper::new(self.driver, self.config.storage.clone(), self.metrics.clone())?;
        let mut hot = HotCacheBuilder::new(self.config.hot_capacity)
            .with_shards(self.config.hot_shards)
            .with_metrics(self.metrics.clone());
        if let Some(classifier) = self.classifier {
            hot = hot.with_classifier(classifier);
        }
        let shared = Arc::new(TierShared {
            hot_cache: hot.build(),
            storage,
            meta: self.meta,
            replication: self.replication,
            metrics: self.metrics,
        });

        let catalog = (0..self.config.catalog_shards).map(|_| RwLock::new(BTreeMap::new())).collect();
        let cache = TieredCache {
            shared,
            catalog,
            coordinator: BulkCoordinator::new(),
        };
        if cache.shared.storage.persistent() {
            let recovered = cache.initial_load()?;
            tracing::trace!("[tiered]: recovered {recovered} entries from the store");
        }
        Ok(cache)
    }
}

/// Tiered entry cache over a blob store.
///
/// Every known entry has an [`EntryResidency`] in the catalog that tracks where its latest
/// version lives. Reads of one uid may run concurrently with anything; mutations of one uid must
/// be serialized by the caller, the way a grid engine serializes operations per entry.
pub struct TieredCache {
    shared: Arc<TierShared>,
    catalog: Vec<RwLock<BTreeMap<Uid, Arc<EntryResidency>>>>,
    coordinator: BulkCoordinator,
}

impl std::fmt::Debug for TieredCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TieredCache")
            .field("entries", &self.entry_count())
            .field("hot_capacity", &self.shared.hot_cache.capacity())
            .finish()
    }
}

impl TieredCache {
    fn catalog_shard(&self, uid: &str) -> &RwLock<BTreeMap<Uid, Arc<EntryResidency>>> {
        let hash = XxHash64::oneshot(0, uid.as_bytes());
        &self.catalog[(hash as usize) & (self.catalog.len() - 1)]
    }

    /// Residency of `uid`, if the entry is known.
    pub fn residency(&self, uid: &str) -> Option<Arc<EntryResidency>> {
        self.catalog_shard(uid).read().get(uid).cloned()
    }

    /// Known entry count, deleted entries with unsettled removes included.
    pub fn entry_count(&self) -> usize {
        self.catalog.iter().map(|shard| shard.read().len()).sum()
    }

    /// Write a new entry.
    ///
    /// The entry becomes resident and pinned. Outside a bulk unit it is persisted before the
    /// call returns; inside one it stays dirty until the unit flushes.
    pub fn insert(&self, ctx: &mut OperationContext, entry: GridEntry) -> Result<()> {
        let residency = Arc::new(EntryResidency::new_dirty(&entry));
        if self.shared.requires_full_backrefs(entry.type_code()) {
            residency.force_full_backrefs();
        }
        {
            let mut shard = self.catalog_shard(entry.uid().as_str()).write();
            if shard.contains_key(entry.uid().as_str()) {
                return Err(Error::duplicate(entry.uid()));
            }
            shard.insert(entry.uid().clone(), residency.clone());
        }
        self.shared.metrics.resident_entries.increase(1);

        if ctx.bulk().is_some() {
            self.join_bulk(ctx, &residency)
        } else {
            residency.flush(&self.shared, CacheOperation::Write)
        }
    }

    /// Replace an entry with a mutated snapshot. Returns the snapshot carrying the next version.
    pub fn update(&self, ctx: &mut OperationContext, entry: GridEntry) -> Result<Arc<GridEntry>> {
        let Some(residency) = self.residency(entry.uid().as_str()) else {
            return Err(Error::not_found(entry.uid()));
        };
        loop {
            match residency.latest(&self.shared, ctx, true, None, false)? {
                FetchOutcome::Found(_) => break,
                FetchOutcome::Missing => return Err(Error::not_found(entry.uid())),
                FetchOutcome::Busy(busy) => {
                    self.shared.metrics.bulk_conflict.increase(1);
                    self.resolve_busy(ctx, &busy)?;
                }
            }
        }
        let snapshot = residency.update(entry);
        if ctx.bulk().is_some() {
            self.join_bulk(ctx, &residency)?;
        } else {
            residency.flush(&self.shared, CacheOperation::Update)?;
        }
        Ok(snapshot)
    }

    /// Read the latest version of `uid`.
    ///
    /// `last_known` lets the caller reuse a snapshot it already holds when the version counter
    /// still matches.
    pub fn read(
        &self,
        ctx: &mut OperationContext,
        uid: &str,
        last_known: Option<&Arc<GridEntry>>,
    ) -> Result<Option<Arc<GridEntry>>> {
        let Some(residency) = self.residency(uid) else {
            return Ok(None);
        };
        loop {
            match residency.latest(&self.shared, ctx, false, last_known, false)? {
                FetchOutcome::Found(entry) => {
                    residency.apply_cache_policy(&self.shared, CacheOperation::Read, &entry);
                    return Ok(Some(entry));
                }
                FetchOutcome::Missing => return Ok(None),
                FetchOutcome::Busy(busy) => {
                    self.shared.metrics.bulk_conflict.increase(1);
                    self.resolve_busy(ctx, &busy)?;
                }
            }
        }
    }

    /// Read the indexed properties of `uid`.
    ///
    /// The store may skip the rest of the value; the returned snapshot is a full entry only if
    /// one happened to be at hand. A clipped snapshot stays resident for later index reads and is
    /// upgraded in place by the next full read.
    pub fn read_indexes(&self, ctx: &mut OperationContext, uid: &str) -> Result<Option<Arc<GridEntry>>> {
        let Some(residency) = self.residency(uid) else {
            return Ok(None);
        };
        loop {
            match residency.latest(&self.shared, ctx, true, None, true)? {
                FetchOutcome::Found(entry) => return Ok(Some(entry)),
                FetchOutcome::Missing => return Ok(None),
                FetchOutcome::Busy(busy) => {
                    self.shared.metrics.bulk_conflict.increase(1);
                    self.resolve_busy(ctx, &busy)?;
                }
            }
        }
    }

    /// Remove `uid` and return its last snapshot.
    pub fn take(&self, ctx: &mut OperationContext, uid: &str) -> Result<Option<Arc<GridEntry>>> {
        let Some(residency) = self.residency(uid) else {
            return Ok(None);
        };
        let snapshot = loop {
            match residency.latest(&self.shared, ctx, true, None, false)? {
                FetchOutcome::Found(entry) => break entry,
                FetchOutcome::Missing => {
                    // An earlier failed remove leaves the deletion pending, settle it now.
                    if residency.is_dirty() && ctx.bulk().is_none() {
                        residency.flush(&self.shared, CacheOperation::Take)?;
                        if residency.unpin() {
                            self.shared.metrics.resident_entries.decrease(1);
                        }
                        self.catalog_shard(uid).write().remove(uid);
                    }
                    return Ok(None);
                }
                FetchOutcome::Busy(busy) => {
                    self.shared.metrics.bulk_conflict.increase(1);
                    self.resolve_busy(ctx, &busy)?;
                }
            }
        };
        residency.mark_deleted();
        self.shared.hot_cache.remove(uid);
        if ctx.bulk().is_some() {
            // The unit settles the physical remove and drops the residency.
            self.join_bulk(ctx, &residency)?;
        } else {
            residency.flush(&self.shared, CacheOperation::Take)?;
            if residency.unpin() {
                self.shared.metrics.resident_entries.decrease(1);
            }
            self.catalog_shard(uid).write().remove(uid);
        }
        Ok(Some(snapshot))
    }

    /// Whether `uid` could match `template`, answered without touching the store.
    ///
    /// May say yes for a non-match, never says no for a match.
    pub fn pre_match(&self, uid: &str, template: &MatchTemplate) -> bool {
        self.residency(uid).is_some_and(|residency| residency.could_match(template))
    }

    /// Open a bulk unit on `ctx`. Mutations under the context coalesce into one backend batch.
    ///
    /// Panics when the context already has a unit.
    pub fn begin_bulk(&self, ctx: &mut OperationContext) -> Arc<BulkUnit> {
        let unit = self.coordinator.begin();
        ctx.attach_bulk(unit.clone());
        unit
    }

    /// Flush and close the context's bulk unit. A context without one is a no-op.
    pub fn flush_bulk(&self, ctx: &mut OperationContext) -> Result<()> {
        let Some(unit) = ctx.take_bulk() else {
            return Ok(());
        };
        self.flush_bulk_unit(&unit)
    }

    /// Batch load `uids` from the store into the context, ahead of the reads that want them.
    ///
    /// Entries that are resident or dirty are skipped. Returns how many layouts were loaded.
    pub fn prefetch_into(&self, ctx: &mut OperationContext, uids: &[&str]) -> Result<usize> {
        let mut requests = Vec::new();
        for uid in uids {
            let Some(residency) = self.residency(uid) else {
                continue;
            };
            if residency.is_resident() || residency.is_dirty() {
                continue;
            }
            requests.push(PrefetchRequest {
                uid: residency.uid().clone(),
                type_code: residency.type_code(),
                position: residency.position(),
            });
        }
        let loaded = self.shared.storage.prefetch(requests)?;
        let count = loaded.len();
        ctx.extend_prefetched(loaded);
        Ok(count)
    }

    /// Evict the resident snapshot of `uid`, flushing it first when dirty.
    ///
    /// Returns whether the uid was known.
    pub fn unload(&self, uid: &str) -> Result<bool> {
        let Some(residency) = self.residency(uid) else {
            return Ok(false);
        };
        residency.unload(&self.shared)?;
        Ok(true)
    }

    /// Flush everything pending and release the store.
    ///
    /// Keeps going past individual failures and returns the first one.
    pub fn close(&self) -> Result<()> {
        let mut first_error = None;

        let units = self
            .catalog
            .iter()
            .flat_map(|shard| shard.read().values().cloned().collect::<Vec<_>>())
            .filter_map(|residency| residency.bulk())
            .filter(|unit| unit.is_active())
            .unique_by(|unit| unit.id())
            .collect::<Vec<_>>();
        for unit in units {
            if let Err(e) = self.flush_bulk_unit(&unit) {
                tracing::warn!("[tiered]: failed to flush unit {} on close: {e}", unit.id());
                first_error.get_or_insert(e);
            }
        }

        for shard in &self.catalog {
            let residencies = shard.read().values().cloned().collect::<Vec<_>>();
            for residency in residencies {
                if !residency.is_dirty() {
                    continue;
                }
                let op = if residency.position().is_none() {
                    CacheOperation::Write
                } else {
                    CacheOperation::Update
                };
                if let Err(e) = residency.flush(&self.shared, op) {
                    tracing::warn!("[tiered]: failed to flush {} on close: {e}", residency.uid());
                    first_error.get_or_insert(e);
                }
            }
        }

        let closed = self.shared.storage.close();
        match first_error {
            Some(e) => Err(e),
            None => Ok(closed?),
        }
    }

    /// The hot tier.
    pub fn hot_cache(&self) -> &HotCache {
        &self.shared.hot_cache
    }

    /// Storage operation statistics.
    pub fn statistics(&self) -> StatisticsSnapshot {
        self.shared.storage.statistics()
    }

    /// Metrics sink of this cache.
    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.shared.metrics
    }

    fn initial_load(&self) -> Result<usize> {
        let iter = self.shared.storage.initial_load_iter()?;
        let mut recovered = 0usize;
        for item in iter {
            let item = item?;
            let position = item.position;
            let entry = item.into_entry()?;
            let residency = Arc::new(EntryResidency::recovered(&entry, position));
            if self.shared.requires_full_backrefs(residency.type_code()) {
                residency.force_full_backrefs();
            }
            let entry = Arc::new(entry);
            self.catalog_shard(residency.uid().as_str())
                .write()
                .insert(residency.uid().clone(), residency.clone());
            residency.apply_cache_policy(&self.shared, CacheOperation::InitialLoad, &entry);
            recovered += 1;
        }
        Ok(recovered)
    }

    /// Put `residency` under the context's unit, resolving conflicts with other units.
    fn join_bulk(&self, ctx: &mut OperationContext, residency: &Arc<EntryResidency>) -> Result<()> {
        loop {
            let unit = match ctx.bulk() {
                Some(unit) => unit.clone(),
                None => {
                    // The context's unit went down with a conflict resolution, mint a new one.
                    let unit = self.coordinator.begin();
                    ctx.attach_bulk(unit.clone());
                    unit
                }
            };
            match residency.try_join_bulk(&unit) {
                Ok(()) => return Ok(()),
                Err(blocking) => {
                    self.shared.metrics.bulk_conflict.increase(1);
                    self.resolve_busy(ctx, &blocking)?;
                }
            }
        }
    }

    /// Get a blocking unit out of the way: settle our own unit first, then flush or wait out
    /// the blocking one.
    fn resolve_busy(&self, ctx: &mut OperationContext, busy: &Arc<BulkUnit>) -> Result<()> {
        if let Some(own) = ctx.take_bulk() {
            if !Arc::ptr_eq(&own, busy) && own.is_active() {
                self.flush_bulk_unit(&own)?;
            }
        }
        self.flush_bulk_unit(busy)
    }

    /// Flush `unit`, or wait for whoever got there first.
    ///
    /// Members are settled one by one after the batch lands, so a torn batch leaves every
    /// unsettled member dirty and retryable.
    pub(crate) fn flush_bulk_unit(&self, unit: &Arc<BulkUnit>) -> Result<()> {
        let Some(members) = unit.try_begin_flush() else {
            unit.wait_completed();
            return Ok(());
        };
        self.shared.metrics.bulk_flush.increase(1);
        tracing::trace!("[bulk]: flushing unit {} with {} members", unit.id(), members.len());

        let mut plans = Vec::with_capacity(members.len());
        let mut ops = Vec::new();
        for member in members {
            let plan = member.prepare_bulk_op(unit);
            let op_index = match &plan {
                BulkMemberOp::Write { entry, position } => {
                    let layout = EntryLayout::from_entry(entry);
                    let index_fields = self.shared.index_fields(member.type_code());
                    ops.push(match position {
                        None => StorageBulkOp::Add {
                            uid: member.uid().clone(),
                            type_code: member.type_code(),
                            layout,
                            index_fields,
                        },
                        Some(position) => StorageBulkOp::Replace {
                            uid: member.uid().clone(),
                            type_code: member.type_code(),
                            position: *position,
                            layout,
                            index_fields,
                        },
                    });
                    Some(ops.len() - 1)
                }
                BulkMemberOp::Remove { position: Some(position) } => {
                    ops.push(StorageBulkOp::Remove {
                        uid: member.uid().clone(),
                        type_code: member.type_code(),
                        position: *position,
                    });
                    Some(ops.len() - 1)
                }
                BulkMemberOp::Remove { position: None }
                | BulkMemberOp::PhantomRemove
                | BulkMemberOp::Clean => None,
            };
            plans.push((member, plan, op_index));
        }

        let op_count = ops.len();
        let results = if ops.is_empty() {
            Vec::new()
        } else {
            match self.shared.storage.execute_bulk(ops, false) {
                Ok(results) => results,
                Err(e) => {
                    for (member, plan, _) in &plans {
                        if !matches!(plan, BulkMemberOp::Clean) {
                            member.revert_bulk_flush(unit);
                        }
                    }
                    tracing::warn!("[bulk]: unit {} failed, members stay dirty: {e}", unit.id());
                    unit.finish();
                    return Err(e.into());
                }
            }
        };
        strict_assert_eq!(results.len(), op_count);

        let mut removed = Vec::new();
        for (member, plan, op_index) in plans {
            match plan {
                BulkMemberOp::Clean => {}
                BulkMemberOp::Write { entry, position } => {
                    let landed = op_index
                        .and_then(|index| results.get(index))
                        .and_then(|result| result.position);
                    let Some(new_position) = landed else {
                        member.revert_bulk_flush(unit);
                        tracing::warn!("[bulk]: no position for {} in unit {}", member.uid(), unit.id());
                        continue;
                    };
                    member.complete_bulk_write(unit, entry.version(), new_position);
                    let op = if position.is_none() { CacheOperation::Write } else { CacheOperation::Update };
                    member.apply_cache_policy(&self.shared, op, &entry);
                    if position.is_none() {
                        self.shared.replication.on_bulk_insert(&entry);
                    } else {
                        self.shared.replication.on_bulk_update(&entry);
                    }
                }
                BulkMemberOp::Remove { .. } => {
                    member.complete_bulk_remove(unit);
                    self.shared.hot_cache.remove(member.uid().as_str());
                    if member.unpin() {
                        self.shared.metrics.resident_entries.decrease(1);
                    }
                    self.shared.replication.on_bulk_remove(member.uid(), member.type_code());
                    removed.push(member.uid().clone());
                }
                BulkMemberOp::PhantomRemove => member.complete_bulk_phantom(unit),
            }
        }
        unit.finish();

        for uid in removed {
            self.catalog_shard(uid.as_str()).write().remove(uid.as_str());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use gridtier_common::entry::PropertyValue;
    use gridtier_storage::memory::MemoryDriver;

    use super::*;

    fn cache() -> TieredCache {
        TieredCacheBuilder::new(Arc::new(MemoryDriver::new())).build().unwrap()
    }

    fn entry(uid: &str, value: i64) -> GridEntry {
        GridEntry::new(uid, 1, vec![PropertyValue::Int(value)])
    }

    #[test]
    fn test_builder_rejects_bad_shard_counts() {
        let config = TieredCacheConfig {
            catalog_shards: 3,
            ..Default::default()
        };
        let err = TieredCacheBuilder::new(Arc::new(MemoryDriver::new()))
            .with_config(config)
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        let config = TieredCacheConfig {
            hot_shards: 0,
            ..Default::default()
        };
        let err = TieredCacheBuilder::new(Arc::new(MemoryDriver::new()))
            .with_config(config)
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_insert_rejects_duplicates() {
        let cache = cache();
        let mut ctx = OperationContext::new();
        cache.insert(&mut ctx, entry("t-1", 1)).unwrap();
        let err = cache.insert(&mut ctx, entry("t-1", 2)).unwrap_err();
        assert!(matches!(err, Error::DuplicateUid { .. }));
        assert_eq!(cache.entry_count(), 1);
    }

    #[test]
    fn test_update_of_unknown_uid_fails() {
        let cache = cache();
        let mut ctx = OperationContext::new();
        let err = cache.update(&mut ctx, entry("t-1", 1)).unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[test]
    fn test_take_of_unknown_uid_is_none() {
        let cache = cache();
        let mut ctx = OperationContext::new();
        assert!(cache.take(&mut ctx, "t-1").unwrap().is_none());
    }

    #[test]
    fn test_flush_without_new_mutation_skips_the_store() {
        let driver = Arc::new(MemoryDriver::new());
        let cache = TieredCacheBuilder::new(driver.clone()).build().unwrap();
        let mut ctx = OperationContext::new();
        cache.insert(&mut ctx, entry("t-1", 1)).unwrap();

        let residency = cache.residency("t-1").unwrap();
        residency.flush(&cache.shared, CacheOperation::Write).unwrap();
        assert!(!residency.is_dirty());
        assert_eq!(driver.add_count(), 1);

        residency.flush(&cache.shared, CacheOperation::Write).unwrap();
        assert_eq!(driver.add_count(), 1);
        assert_eq!(driver.replace_count(), 0);
    }
}
