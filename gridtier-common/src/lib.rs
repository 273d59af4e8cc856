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

//! Shared components for the gridtier tiered entry cache.

/// Strict assertion utilities.
pub mod assert;
/// Field checksum word and template pre-matching.
pub mod crc;
/// Entry data model.
pub mod entry;
/// Storage layout of an entry.
pub mod layout;
/// Metrics framework.
pub mod metrics;
