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

use std::fmt::Debug;

use bytes::Bytes;
use gridtier_common::{
    entry::{TypeCode, Uid},
    layout::EntryLayout,
};

use crate::error::Result;

/// Opaque handle to where a driver keeps an entry.
///
/// Minted by the driver on add and replace, handed back verbatim on later operations. A replace
/// may relocate the value, so callers must always adopt the returned position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StorePosition(u64);

impl StorePosition {
    /// Build a position from its raw representation.
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw representation of the position.
    pub fn as_raw(&self) -> u64 {
        self.0
    }
}

/// Value shape handed to and received from a driver.
///
/// Drivers that answer `false` from [`BlobStoreDriver::needs_serialization`] move typed layouts,
/// the rest move packed bytes produced by the wrapper.
#[derive(Debug, Clone)]
pub enum StoredValue {
    /// Typed layout, for drivers that keep structured values.
    Layout(Box<EntryLayout>),
    /// Packed and checksummed bytes, for drivers that move raw payloads.
    Packed(Bytes),
}

impl StoredValue {
    /// Payload size in bytes, zero for typed layouts.
    pub fn byte_len(&self) -> usize {
        match self {
            Self::Layout(_) => 0,
            Self::Packed(bytes) => bytes.len(),
        }
    }
}

/// One operation of a bulk execution.
#[derive(Debug)]
pub enum BulkStoreOp {
    /// Store a value the driver has never seen.
    Add {
        /// Entry uid.
        uid: Uid,
        /// Entry type code.
        type_code: TypeCode,
        /// Value to store.
        value: StoredValue,
    },
    /// Overwrite the value at `position`.
    Replace {
        /// Entry uid.
        uid: Uid,
        /// Entry type code.
        type_code: TypeCode,
        /// Position minted by the previous add or replace.
        position: StorePosition,
        /// Value to store.
        value: StoredValue,
    },
    /// Drop the value at `position`.
    Remove {
        /// Entry uid.
        uid: Uid,
        /// Entry type code.
        type_code: TypeCode,
        /// Position minted by the previous add or replace.
        position: StorePosition,
    },
}

impl BulkStoreOp {
    /// Uid the operation applies to.
    pub fn uid(&self) -> &Uid {
        match self {
            Self::Add { uid, .. } | Self::Replace { uid, .. } | Self::Remove { uid, .. } => uid,
        }
    }
}

/// Per-operation outcome of a bulk execution, aligned with the submitted operations.
#[derive(Debug, Clone)]
pub struct BulkOpResult {
    /// Uid the operation applied to.
    pub uid: Uid,
    /// Position of the stored value, `None` for removes.
    pub position: Option<StorePosition>,
}

/// One item yielded by a driver iterator.
#[derive(Debug)]
pub struct DriverItem {
    /// Entry uid.
    pub uid: Uid,
    /// Entry type code.
    pub type_code: TypeCode,
    /// Where the driver keeps the value, `None` if it does not track positions while iterating.
    pub position: Option<StorePosition>,
    /// Stored value.
    pub value: StoredValue,
}

/// Lazy driver iterator.
pub type DriverIter = Box<dyn Iterator<Item = Result<DriverItem>> + Send>;

/// Driver-side statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DriverStatistics {
    /// Stored entry count.
    pub entries: u64,
    /// Stored payload bytes, zero if the driver does not account bytes.
    pub bytes: u64,
}

/// A pluggable blob store backend.
///
/// Implementations must be safe to call from multiple threads. Position handling follows the
/// contract of [`StorePosition`].
pub trait BlobStoreDriver: Send + Sync + 'static + Debug {
    /// Whether the driver moves packed bytes instead of typed layouts.
    fn needs_serialization(&self) -> bool;

    /// Whether the driver keeps values in an off-heap pool of this process.
    fn is_off_heap(&self) -> bool {
        false
    }

    /// Store a value the driver has never seen. Returns the minted position.
    fn add(&self, uid: &Uid, type_code: TypeCode, value: StoredValue) -> Result<StorePosition>;

    /// Fetch the value of `uid`.
    ///
    /// `position` is an advisory hint. With `indexes_only` the driver may answer with a pruned
    /// value, answering with the full value is always allowed.
    fn get(
        &self,
        uid: &Uid,
        position: Option<StorePosition>,
        type_code: TypeCode,
        indexes_only: bool,
    ) -> Result<Option<StoredValue>>;

    /// Overwrite the value at `position`. Returns the position of the new value.
    fn replace(&self, uid: &Uid, type_code: TypeCode, position: StorePosition, value: StoredValue)
        -> Result<StorePosition>;

    /// Drop the value at `position`. Missing values are an error.
    fn remove(&self, uid: &Uid, type_code: TypeCode, position: StorePosition) -> Result<()>;

    /// Drop the value of `uid` if present. Returns whether a value was dropped.
    fn remove_if_exists(&self, uid: &Uid, type_code: TypeCode) -> Result<bool>;

    /// Execute a batch of operations.
    ///
    /// Results align with the submitted operations. With `transactional` the driver applies all
    /// or nothing; drivers without transaction support may apply a failing batch partially.
    fn execute_bulk(&self, ops: Vec<BulkStoreOp>, transactional: bool) -> Result<Vec<BulkOpResult>>;

    /// Iterate stored values, optionally restricted to one type.
    fn iter(&self, type_code: Option<TypeCode>) -> Result<DriverIter>;

    /// Iterate everything for recovery.
    fn initial_load_iter(&self) -> Result<DriverIter>;

    /// Driver-side statistics.
    fn statistics(&self) -> DriverStatistics;

    /// Release driver resources.
    fn close(&self) -> Result<()> {
        Ok(())
    }
}
