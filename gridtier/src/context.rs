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

use gridtier_common::{entry::Uid, layout::EntryLayout};

use crate::bulk::BulkUnit;

/// Thread-local state of one space operation against the tiered cache.
///
/// A context is created per operation batch by the caller and never shared between threads. It
/// carries the caller's active bulk unit and the layouts pre-fetched for the operation, so reads
/// within the batch can skip the backend.
#[derive(Debug, Default)]
pub struct OperationContext {
    bulk: Option<Arc<BulkUnit>>,
    prefetched: BTreeMap<Uid, EntryLayout>,
}

impl OperationContext {
    /// Create an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// The caller's active bulk unit, if one is open.
    pub fn bulk(&self) -> Option<&Arc<BulkUnit>> {
        self.bulk.as_ref()
    }

    /// Adopt `unit` as the caller's active bulk unit.
    ///
    /// A previous unit must be flushed or taken before a new one is attached.
    pub fn attach_bulk(&mut self, unit: Arc<BulkUnit>) {
        assert!(self.bulk.is_none(), "operation context already has an active bulk unit");
        self.bulk = Some(unit);
    }

    /// Detach and return the active bulk unit.
    pub fn take_bulk(&mut self) -> Option<Arc<BulkUnit>> {
        self.bulk.take()
    }

    /// Merge pre-fetched layouts into the context.
    pub fn extend_prefetched(&mut self, layouts: BTreeMap<Uid, EntryLayout>) {
        self.prefetched.extend(layouts);
    }

    /// Pre-fetched layout of `uid`, if the batch loaded one.
    pub fn prefetched(&self, uid: &str) -> Option<&EntryLayout> {
        self.prefetched.get(uid)
    }

    /// Number of pre-fetched layouts held.
    pub fn prefetched_len(&self) -> usize {
        self.prefetched.len()
    }
}

#[cfg(test)]
mod tests {
    use gridtier_common::entry::{GridEntry, PropertyValue};

    use super::*;

    #[test]
    fn test_prefetched_layouts_are_looked_up_by_uid() {
        let entry = GridEntry::new("ctx-1", 1, vec![PropertyValue::Int(5)]);
        let mut ctx = OperationContext::new();
        ctx.extend_prefetched(BTreeMap::from([(
            entry.uid().clone(),
            EntryLayout::from_entry(&entry),
        )]));

        assert_eq!(ctx.prefetched_len(), 1);
        assert!(ctx.prefetched("ctx-1").is_some());
        assert!(ctx.prefetched("ctx-2").is_none());
    }

    #[test]
    #[should_panic(expected = "already has an active bulk unit")]
    fn test_double_attach_panics() {
        let mut ctx = OperationContext::new();
        ctx.attach_bulk(BulkUnit::open(1));
        ctx.attach_bulk(BulkUnit::open(2));
    }
}
