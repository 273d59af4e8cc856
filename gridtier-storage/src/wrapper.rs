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
    sync::{Arc, OnceLock},
    time::Instant,
};

use gridtier_common::{
    entry::{TypeCode, Uid},
    layout::EntryLayout,
    metrics::model::Metrics,
};
use parking_lot::Mutex;

use crate::{
    compress::Compression,
    driver::{BlobStoreDriver, BulkOpResult, BulkStoreOp, DriverIter, DriverStatistics, StorePosition, StoredValue},
    error::{Error, Result},
    offheap::OffHeapCache,
    prefetch::{LoadedEntryIter, LoadedLayout, PrefetchPool},
    serde::{LayoutDeserializer, LayoutSerializer},
    statistics::{Statistics, StatisticsSnapshot},
};

/// Wrapper configuration.
#[derive(Debug, Clone)]
pub struct StorageWrapperConfig {
    /// Compression applied to packed payloads.
    pub compression: Compression,
    /// Whether the driver outlives the process and must be recovered from on restart.
    pub persistent: bool,
    /// Off-heap index cache capacity in payload bytes. `None` disables the cache.
    pub off_heap_cache_capacity: Option<usize>,
    /// Background loader threads. The pool is only spawned once a load needs it.
    pub prefetch_threads: usize,
    /// Decoded entries buffered ahead of an initial load consumer.
    pub prefetch_queue: usize,
}

impl Default for StorageWrapperConfig {
    fn default() -> Self {
        Self {
            compression: Compression::default(),
            persistent: false,
            off_heap_cache_capacity: None,
            prefetch_threads: 4,
            prefetch_queue: 256,
        }
    }
}

/// Wrapper-level batch operation carrying typed layouts.
#[derive(Debug)]
pub enum StorageBulkOp {
    /// Store a new entry.
    Add {
        /// Entry uid.
        uid: Uid,
        /// Entry type.
        type_code: TypeCode,
        /// Entry layout.
        layout: EntryLayout,
        /// Fixed properties the type indexes on.
        index_fields: Vec<usize>,
    },
    /// Overwrite a stored entry.
    Replace {
        /// Entry uid.
        uid: Uid,
        /// Entry type.
        type_code: TypeCode,
        /// Position hint from the previous write.
        position: StorePosition,
        /// Entry layout.
        layout: EntryLayout,
        /// Fixed properties the type indexes on.
        index_fields: Vec<usize>,
    },
    /// Drop a stored entry.
    Remove {
        /// Entry uid.
        uid: Uid,
        /// Entry type.
        type_code: TypeCode,
        /// Position hint from the previous write.
        position: StorePosition,
    },
}

/// Request for one entry of a batch load.
#[derive(Debug, Clone)]
pub struct PrefetchRequest {
    /// Entry uid.
    pub uid: Uid,
    /// Entry type.
    pub type_code: TypeCode,
    /// Position hint from the previous write, if known.
    pub position: Option<StorePosition>,
}

/// Serializing front of a [`BlobStoreDriver`].
///
/// Packs layouts into bytes for drivers that move bytes, keeps per operation statistics, and
/// serves `indexes_only` fetches from the off-heap index cache when one is configured.
pub struct StorageWrapper {
    driver: Arc<dyn BlobStoreDriver>,
    config: StorageWrapperConfig,
    index_cache: Option<OffHeapCache>,
    pool: OnceLock<PrefetchPool>,
    stats: Statistics,
    metrics: Arc<Metrics>,
}

impl std::fmt::Debug for StorageWrapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageWrapper")
            .field("driver", &self.driver)
            .field("config", &self.config)
            .finish()
    }
}

impl StorageWrapper {
    /// Wrap `driver`, validating the configuration against its capabilities.
    pub fn new(driver: Arc<dyn BlobStoreDriver>, config: StorageWrapperConfig, metrics: Arc<Metrics>) -> Result<Self> {
        if driver.is_off_heap() {
            if config.off_heap_cache_capacity.is_some() {
                return Err(Error::config("off-heap index cache cannot front an off-heap store"));
            }
            if config.persistent {
                return Err(Error::config("off-heap store cannot be used in persistent mode"));
            }
        }
        let index_cache = config.off_heap_cache_capacity.map(OffHeapCache::new);
        Ok(Self {
            driver,
            config,
            index_cache,
            pool: OnceLock::new(),
            stats: Statistics::default(),
            metrics,
        })
    }

    /// Whether stored values survive a restart.
    pub fn persistent(&self) -> bool {
        self.config.persistent
    }

    /// Compression applied to packed payloads.
    pub fn compression(&self) -> Compression {
        self.config.compression
    }

    /// Store a new entry. Returns where the driver put it.
    pub fn add(&self, uid: &Uid, type_code: TypeCode, layout: &EntryLayout, index_fields: &[usize]) -> Result<StorePosition> {
        let now = Instant::now();
        let (value, len) = self.to_stored(layout)?;
        let position = self
            .driver
            .add(uid, type_code, value)
            .inspect_err(|_| self.record_failure())?;
        self.stats.record_add(len);
        self.metrics.storage_add.increase(1);
        self.metrics.storage_write_bytes.increase(len as u64);
        self.metrics.storage_add_duration.record(now.elapsed().as_secs_f64());
        self.cache_index_part(uid, layout, index_fields);
        Ok(position)
    }

    /// Overwrite a stored entry. Returns the position of the fresh write.
    pub fn replace(
        &self,
        uid: &Uid,
        type_code: TypeCode,
        position: StorePosition,
        layout: &EntryLayout,
        index_fields: &[usize],
    ) -> Result<StorePosition> {
        let now = Instant::now();
        let (value, len) = self.to_stored(layout)?;
        let position = self
            .driver
            .replace(uid, type_code, position, value)
            .inspect_err(|_| self.record_failure())?;
        self.stats.record_replace(len);
        self.metrics.storage_replace.increase(1);
        self.metrics.storage_write_bytes.increase(len as u64);
        self.metrics.storage_replace_duration.record(now.elapsed().as_secs_f64());
        self.cache_index_part(uid, layout, index_fields);
        Ok(position)
    }

    /// Drop a stored entry. The cached index bytes go away even if the driver fails.
    pub fn remove(&self, uid: &Uid, type_code: TypeCode, position: StorePosition) -> Result<()> {
        let now = Instant::now();
        self.invalidate_index_part(uid);
        self.driver
            .remove(uid, type_code, position)
            .inspect_err(|_| self.record_failure())?;
        self.stats.record_remove();
        self.metrics.storage_remove.increase(1);
        self.metrics.storage_remove_duration.record(now.elapsed().as_secs_f64());
        Ok(())
    }

    /// Drop a stored entry if present. Returns whether a value was dropped.
    pub fn remove_if_exists(&self, uid: &Uid, type_code: TypeCode) -> Result<bool> {
        let now = Instant::now();
        self.invalidate_index_part(uid);
        let removed = self
            .driver
            .remove_if_exists(uid, type_code)
            .inspect_err(|_| self.record_failure())?;
        self.stats.record_remove();
        self.metrics.storage_remove.increase(1);
        self.metrics.storage_remove_duration.record(now.elapsed().as_secs_f64());
        Ok(removed)
    }

    /// Fetch the layout of `uid`.
    ///
    /// With `indexes_only` the index cache is consulted first and the returned layout may carry
    /// only the indexed subset of the fixed properties.
    pub fn get(
        &self,
        uid: &Uid,
        position: Option<StorePosition>,
        type_code: TypeCode,
        indexes_only: bool,
    ) -> Result<Option<EntryLayout>> {
        let now = Instant::now();
        if indexes_only {
            if let Some(cache) = &self.index_cache {
                if let Some(bytes) = cache.get(uid.as_str()) {
                    self.metrics.offheap_hit.increase(1);
                    let layout = self.decode(&bytes)?;
                    self.metrics.storage_get_duration.record(now.elapsed().as_secs_f64());
                    return Ok(Some(layout));
                }
                self.metrics.offheap_miss.increase(1);
            }
        }
        let value = self
            .driver
            .get(uid, position, type_code, indexes_only)
            .inspect_err(|_| self.record_failure())?;
        let loaded = match value {
            None => None,
            Some(value) => {
                let (layout, len) = decode_stored(value, &self.metrics)?;
                self.stats.record_get(len);
                self.metrics.storage_read_bytes.increase(len as u64);
                Some(layout)
            }
        };
        self.metrics.storage_get.increase(1);
        self.metrics.storage_get_duration.record(now.elapsed().as_secs_f64());
        Ok(loaded)
    }

    /// Execute a batch of operations.
    ///
    /// Index cache effects follow single operations: removed uids are invalidated before the
    /// driver runs, added and replaced uids are cached after it succeeds.
    pub fn execute_bulk(&self, ops: Vec<StorageBulkOp>, transactional: bool) -> Result<Vec<BulkOpResult>> {
        let now = Instant::now();
        let mut written = 0usize;
        let mut driver_ops = Vec::with_capacity(ops.len());
        let mut pending_cache = Vec::new();
        for op in ops {
            match op {
                StorageBulkOp::Add {
                    uid,
                    type_code,
                    layout,
                    index_fields,
                } => {
                    if self.index_cache.is_some() {
                        pending_cache.push((uid.clone(), layout.index_part(&index_fields)));
                    }
                    let (value, len) = self.to_stored(&layout)?;
                    written += len;
                    driver_ops.push(BulkStoreOp::Add { uid, type_code, value });
                }
                StorageBulkOp::Replace {
                    uid,
                    type_code,
                    position,
                    layout,
                    index_fields,
                } => {
                    if self.index_cache.is_some() {
                        pending_cache.push((uid.clone(), layout.index_part(&index_fields)));
                    }
                    let (value, len) = self.to_stored(&layout)?;
                    written += len;
                    driver_ops.push(BulkStoreOp::Replace {
                        uid,
                        type_code,
                        position,
                        value,
                    });
                }
                StorageBulkOp::Remove { uid, type_code, position } => {
                    self.invalidate_index_part(&uid);
                    driver_ops.push(BulkStoreOp::Remove { uid, type_code, position });
                }
            }
        }
        let results = self
            .driver
            .execute_bulk(driver_ops, transactional)
            .inspect_err(|_| self.record_failure())?;
        if let Some(cache) = &self.index_cache {
            for (uid, clipped) in pending_cache {
                match LayoutSerializer::serialize(&clipped, self.config.compression) {
                    Ok(bytes) => {
                        cache.put(&uid, &bytes);
                    }
                    Err(e) => tracing::warn!("failed to encode index part of {uid}: {e}"),
                }
            }
            self.metrics.offheap_used_bytes.absolute(cache.used_bytes() as u64);
        }
        self.stats.record_bulk(written);
        self.metrics.storage_bulk.increase(1);
        self.metrics.storage_write_bytes.increase(written as u64);
        self.metrics.storage_bulk_duration.record(now.elapsed().as_secs_f64());
        Ok(results)
    }

    /// Load a batch of entries on the pool threads.
    ///
    /// Absent uids are left out of the result. The first driver or decode failure fails the batch.
    pub fn prefetch(&self, requests: Vec<PrefetchRequest>) -> Result<BTreeMap<Uid, EntryLayout>> {
        if requests.is_empty() {
            return Ok(BTreeMap::new());
        }
        let (tx, rx) = flume::bounded(requests.len());
        for request in requests {
            let driver = self.driver.clone();
            let metrics = self.metrics.clone();
            let tx = tx.clone();
            self.pool().execute(move || {
                let res = driver
                    .get(&request.uid, request.position, request.type_code, false)
                    .and_then(|value| match value {
                        Some(value) => decode_stored(value, &metrics).map(|(layout, _)| Some(layout)),
                        None => Ok(None),
                    })
                    .map(|layout| (request.uid, layout));
                // The channel fits all responses, so the send cannot block or fail.
                let _ = tx.send(res);
            });
        }
        drop(tx);

        let mut loaded = BTreeMap::new();
        let mut failure = None;
        for res in rx {
            match res {
                Ok((uid, Some(layout))) => {
                    loaded.insert(uid, layout);
                }
                Ok((_, None)) => {}
                Err(e) => {
                    if failure.is_none() {
                        failure = Some(e);
                    }
                }
            }
        }
        match failure {
            Some(e) => {
                self.record_failure();
                Err(e)
            }
            None => Ok(loaded),
        }
    }

    /// Iterate stored entries, decoding on the consumer thread one `next` at a time.
    pub fn iter(&self, type_code: Option<TypeCode>) -> Result<LazyLayoutIter> {
        let inner = self.driver.iter(type_code).inspect_err(|_| self.record_failure())?;
        Ok(LazyLayoutIter {
            inner,
            metrics: self.metrics.clone(),
        })
    }

    /// Stream every stored entry, decoded ahead of the consumer by the pool threads.
    pub fn initial_load_iter(&self) -> Result<LoadedEntryIter> {
        let iter = self.driver.initial_load_iter().inspect_err(|_| self.record_failure())?;
        let shared = Arc::new(Mutex::new(iter));
        let (tx, rx) = flume::bounded(self.config.prefetch_queue.max(1));
        for _ in 0..self.pool().threads() {
            let shared = shared.clone();
            let tx = tx.clone();
            let metrics = self.metrics.clone();
            self.pool().execute(move || loop {
                let item = shared.lock().next();
                let Some(item) = item else { return };
                let res = item.and_then(|item| {
                    decode_stored(item.value, &metrics).map(|(layout, _)| LoadedLayout {
                        uid: item.uid,
                        type_code: item.type_code,
                        position: item.position,
                        layout,
                    })
                });
                if tx.send(res).is_err() {
                    return;
                }
            });
        }
        Ok(LoadedEntryIter::new(rx))
    }

    /// Wrapper-side operation statistics.
    pub fn statistics(&self) -> StatisticsSnapshot {
        self.stats.snapshot()
    }

    /// Driver-side statistics.
    pub fn driver_statistics(&self) -> DriverStatistics {
        self.driver.statistics()
    }

    /// Release the driver and the index cache.
    pub fn close(&self) -> Result<()> {
        if let Some(cache) = &self.index_cache {
            cache.clear();
            self.metrics.offheap_used_bytes.absolute(0);
        }
        self.driver.close()
    }

    fn pool(&self) -> &PrefetchPool {
        self.pool.get_or_init(|| PrefetchPool::new(self.config.prefetch_threads))
    }

    fn to_stored(&self, layout: &EntryLayout) -> Result<(StoredValue, usize)> {
        if self.driver.needs_serialization() {
            let bytes = self.encode(layout)?;
            let len = bytes.len();
            Ok((StoredValue::Packed(bytes), len))
        } else {
            Ok((StoredValue::Layout(Box::new(layout.clone())), 0))
        }
    }

    fn encode(&self, layout: &EntryLayout) -> Result<bytes::Bytes> {
        let now = Instant::now();
        let bytes = LayoutSerializer::serialize(layout, self.config.compression)?;
        self.metrics.serialize_duration.record(now.elapsed().as_secs_f64());
        Ok(bytes)
    }

    fn decode(&self, bytes: &[u8]) -> Result<EntryLayout> {
        let now = Instant::now();
        let layout = LayoutDeserializer::deserialize(bytes)?;
        self.metrics.deserialize_duration.record(now.elapsed().as_secs_f64());
        Ok(layout)
    }

    fn cache_index_part(&self, uid: &Uid, layout: &EntryLayout, index_fields: &[usize]) {
        let Some(cache) = &self.index_cache else { return };
        let clipped = layout.index_part(index_fields);
        match LayoutSerializer::serialize(&clipped, self.config.compression) {
            Ok(bytes) => {
                cache.put(uid, &bytes);
            }
            Err(e) => tracing::warn!("failed to encode index part of {uid}: {e}"),
        }
        self.metrics.offheap_used_bytes.absolute(cache.used_bytes() as u64);
    }

    fn invalidate_index_part(&self, uid: &Uid) {
        let Some(cache) = &self.index_cache else { return };
        cache.remove(uid.as_str());
        self.metrics.offheap_used_bytes.absolute(cache.used_bytes() as u64);
    }

    fn record_failure(&self) {
        self.stats.record_failure();
        self.metrics.storage_failure.increase(1);
    }
}

fn decode_stored(value: StoredValue, metrics: &Metrics) -> Result<(EntryLayout, usize)> {
    match value {
        StoredValue::Layout(layout) => Ok((*layout, 0)),
        StoredValue::Packed(bytes) => {
            let now = Instant::now();
            let layout = LayoutDeserializer::deserialize(&bytes)?;
            metrics.deserialize_duration.record(now.elapsed().as_secs_f64());
            Ok((layout, bytes.len()))
        }
    }
}

/// Iterator decoding stored entries as they are pulled.
pub struct LazyLayoutIter {
    inner: DriverIter,
    metrics: Arc<Metrics>,
}

impl Iterator for LazyLayoutIter {
    type Item = Result<LoadedLayout>;

    fn next(&mut self) -> Option<Self::Item> {
        let item = self.inner.next()?;
        Some(item.and_then(|item| {
            decode_stored(item.value, &self.metrics).map(|(layout, _)| LoadedLayout {
                uid: item.uid,
                type_code: item.type_code,
                position: item.position,
                layout,
            })
        }))
    }
}
