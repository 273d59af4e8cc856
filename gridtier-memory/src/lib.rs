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

//! Bounded in-memory cache of hot grid entries.
//!
//! The cache is advisory. The residency layer owns the source of truth and tolerates the cache
//! being stale, so entry status transitions here are lock-free and no lock is ever held across a
//! blob store call.

/// Sharded hot cache with quasi-LRU eviction.
pub mod cache;
/// Per-entry cache slot and its status protocol.
pub mod slot;

pub use cache::{HotCache, HotCacheBuilder, HotClassifier, StoreOutcome};
pub use slot::{CacheSlot, DeleteOutcome, SlotStatus};
