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

//! Re-exports of the public gridtier API.

pub use gridtier_common::{
    crc::{FieldChecksums, MatchTemplate},
    entry::{EntryVersion, GridEntry, PropertyValue, TypeCode, Uid},
    layout::EntryLayout,
    metrics::{model::Metrics, registry::noop::NoopMetricsRegistry, RegistryOps},
};
pub use gridtier_memory::{HotCache, HotCacheBuilder, HotClassifier, StoreOutcome};
pub use gridtier_storage::{
    compress::Compression,
    driver::{BlobStoreDriver, DriverStatistics, StorePosition},
    memory::{FaultOp, MemoryDriver},
    offheap::OffHeapDriver,
    statistics::StatisticsSnapshot,
    wrapper::{PrefetchRequest, StorageWrapper, StorageWrapperConfig},
};

pub use crate::{
    backrefs::{BackRefs, IndexRef},
    bulk::{BulkCoordinator, BulkPhase, BulkUnit},
    context::OperationContext,
    error::{Error, Result},
    meta::{StaticTypeRegistry, TypeDescriptor, TypeMetadataProvider},
    policy::{hot_cache_action, CacheOperation, HotCacheAction, PolicyDecision},
    replication::{NoopReplicationNotifier, ReplicationNotifier},
    residency::{EntryResidency, FetchOutcome, ResidencyFlags},
    tiered::{TieredCache, TieredCacheBuilder, TieredCacheConfig},
};
