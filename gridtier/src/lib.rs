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

//! gridtier is the tiered entry-caching layer of an in-memory data grid.
//!
//! Entries live on one of two tiers. Hot entries stay materialized in process memory, tracked by a
//! per-entry residency record; the rest are evicted to a pluggable blob store and reloaded on
//! demand. [`TieredCache`] is the entry point wiring the bounded hot cache, the per-entry residency
//! state machine, the bulk flush coordinator and the serializing storage engine together.

mod backrefs;
mod bulk;
mod context;
mod error;
mod meta;
mod policy;
mod replication;
mod residency;
mod tiered;

pub mod prelude;
pub use prelude::*;
