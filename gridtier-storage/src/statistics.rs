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

use std::sync::atomic::{AtomicU64, Ordering};

/// Wrapper-side operation statistics.
///
/// Counters only move on operations that reached the driver, failed or not. Off-heap cache hits
/// that short-circuit a get are accounted by the off-heap cache itself.
#[derive(Debug, Default)]
pub struct Statistics {
    add_ops: AtomicU64,
    get_ops: AtomicU64,
    replace_ops: AtomicU64,
    remove_ops: AtomicU64,
    bulk_ops: AtomicU64,
    failed_ops: AtomicU64,
    write_bytes: AtomicU64,
    read_bytes: AtomicU64,
}

impl Statistics {
    pub(crate) fn record_add(&self, bytes: usize) {
        self.add_ops.fetch_add(1, Ordering::Relaxed);
        self.write_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_get(&self, bytes: usize) {
        self.get_ops.fetch_add(1, Ordering::Relaxed);
        self.read_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_replace(&self, bytes: usize) {
        self.replace_ops.fetch_add(1, Ordering::Relaxed);
        self.write_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_remove(&self) {
        self.remove_ops.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_bulk(&self, bytes: usize) {
        self.bulk_ops.fetch_add(1, Ordering::Relaxed);
        self.write_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_failure(&self) {
        self.failed_ops.fetch_add(1, Ordering::Relaxed);
    }

    /// Consistent-enough snapshot of the counters.
    pub fn snapshot(&self) -> StatisticsSnapshot {
        StatisticsSnapshot {
            add_ops: self.add_ops.load(Ordering::Relaxed),
            get_ops: self.get_ops.load(Ordering::Relaxed),
            replace_ops: self.replace_ops.load(Ordering::Relaxed),
            remove_ops: self.remove_ops.load(Ordering::Relaxed),
            bulk_ops: self.bulk_ops.load(Ordering::Relaxed),
            failed_ops: self.failed_ops.load(Ordering::Relaxed),
            write_bytes: self.write_bytes.load(Ordering::Relaxed),
            read_bytes: self.read_bytes.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`Statistics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatisticsSnapshot {
    /// Single adds that reached the driver.
    pub add_ops: u64,
    /// Gets that reached the driver.
    pub get_ops: u64,
    /// Replaces that reached the driver.
    pub replace_ops: u64,
    /// Removes that reached the driver.
    pub remove_ops: u64,
    /// Bulk executions that reached the driver.
    pub bulk_ops: u64,
    /// Operations the driver failed.
    pub failed_ops: u64,
    /// Payload bytes handed to the driver.
    pub write_bytes: u64,
    /// Payload bytes received from the driver.
    pub read_bytes: u64,
}
