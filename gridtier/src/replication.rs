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

use gridtier_common::entry::{GridEntry, TypeCode, Uid};

/// Delayed-replication callbacks for entries persisted out of a bulk unit.
///
/// Called by the thread that flushed the unit, once per entry, after the backend accepted the
/// batch. Implementations must not call back into the cache.
pub trait ReplicationNotifier: Send + Sync + 'static {
    /// An entry was persisted for the first time.
    fn on_bulk_insert(&self, entry: &GridEntry);

    /// A persisted entry was overwritten.
    fn on_bulk_update(&self, entry: &GridEntry);

    /// A persisted entry was removed.
    fn on_bulk_remove(&self, uid: &Uid, type_code: TypeCode);
}

/// Notifier that drops every notification.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopReplicationNotifier;

impl ReplicationNotifier for NoopReplicationNotifier {
    fn on_bulk_insert(&self, _: &GridEntry) {}

    fn on_bulk_update(&self, _: &GridEntry) {}

    fn on_bulk_remove(&self, _: &Uid, _: TypeCode) {}
}
