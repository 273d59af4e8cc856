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

//! Blob store engine of the gridtier tiered entry cache.
//!
//! The engine connects the residency layer to a pluggable [`driver::BlobStoreDriver`]. The
//! [`wrapper::StorageWrapper`] owns serialization, off-heap caching, statistics and the initial
//! load pre-fetch pipeline, so drivers only move opaque values.

/// Compression algorithms for packed layouts.
pub mod compress;
/// Blob store driver abstraction.
pub mod driver;
/// Error types.
pub mod error;
/// In-memory driver for tests and volatile deployments.
pub mod memory;
/// Off-heap pool, cache and store.
pub mod offheap;
/// Initial load pre-fetch pipeline.
pub mod prefetch;
/// Layout serialization.
pub mod serde;
/// Per-operation statistics.
pub mod statistics;
/// Serializing driver wrapper.
pub mod wrapper;

pub use error::{Error, Result};
