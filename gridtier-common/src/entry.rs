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

use std::{borrow::Borrow, collections::BTreeMap, fmt::Display, hash::Hasher, sync::Arc};

use serde::{Deserialize, Serialize};
use twox_hash::XxHash64;

/// Space type code of an entry.
pub type TypeCode = u32;

/// Unique identity of an entry within the grid partition.
///
/// Cheap to clone and usable as a borrowed `&str` for map lookups.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Uid(Arc<str>);

impl Uid {
    /// Get the uid as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Uid {
    fn from(s: &str) -> Self {
        Self(Arc::from(s))
    }
}

impl From<String> for Uid {
    fn from(s: String) -> Self {
        Self(Arc::from(s.as_str()))
    }
}

impl Borrow<str> for Uid {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl Display for Uid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Monotonic per-entry version counter.
///
/// The counter saturates at [`EntryVersion::EXHAUSTED`]. An exhausted version can never satisfy an
/// equality fast path again, so readers of such an entry always fall back to an authoritative fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntryVersion(u16);

impl EntryVersion {
    /// Version of a freshly created entry.
    pub const INITIAL: Self = Self(1);
    /// Sentinel marking a version counter that wrapped.
    pub const EXHAUSTED: Self = Self(u16::MAX);

    /// Build a version from its raw counter value.
    pub fn from_raw(raw: u16) -> Self {
        Self(raw)
    }

    /// Raw counter value.
    pub fn raw(self) -> u16 {
        self.0
    }

    /// Whether the counter reached the sentinel.
    pub fn is_exhausted(self) -> bool {
        self == Self::EXHAUSTED
    }

    /// Next version after a mutation lands. Saturates at the sentinel.
    pub fn bumped(self) -> Self {
        if self.0 >= u16::MAX - 1 {
            Self::EXHAUSTED
        } else {
            Self(self.0 + 1)
        }
    }

    /// Whether `self` can serve as a fast-path witness for `other`.
    ///
    /// Exhausted counters are never trusted.
    pub fn matches(self, other: Self) -> bool {
        !self.is_exhausted() && !other.is_exhausted() && self == other
    }
}

/// A fixed or dynamic property value of an entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PropertyValue {
    /// Absent value.
    Null,
    /// Boolean value.
    Bool(bool),
    /// Signed integer value.
    Int(i64),
    /// Floating point value.
    Float(f64),
    /// String value.
    Text(String),
    /// Raw binary value.
    Bytes(Vec<u8>),
}

impl PropertyValue {
    /// Stable content hash of the value, `None` for [`PropertyValue::Null`].
    ///
    /// The hash only depends on the value, never on process state, so it can be compared against
    /// hashes computed by other partitions or recovered from storage.
    pub fn stable_hash(&self) -> Option<u64> {
        let mut hasher = XxHash64::with_seed(0);
        match self {
            Self::Null => return None,
            Self::Bool(v) => {
                hasher.write_u8(1);
                hasher.write_u8(*v as u8);
            }
            Self::Int(v) => {
                hasher.write_u8(2);
                hasher.write_i64(*v);
            }
            Self::Float(v) => {
                hasher.write_u8(3);
                hasher.write_u64(v.to_bits());
            }
            Self::Text(v) => {
                hasher.write_u8(4);
                hasher.write(v.as_bytes());
            }
            Self::Bytes(v) => {
                hasher.write_u8(5);
                hasher.write(v);
            }
        }
        Some(hasher.finish())
    }
}

/// An entry of the grid partition.
///
/// Entries are immutable snapshots. A mutation produces a new [`GridEntry`] carried to the cache
/// layer, which owns version accounting.
#[derive(Debug, Clone, PartialEq)]
pub struct GridEntry {
    uid: Uid,
    type_code: TypeCode,
    version: EntryVersion,
    expiration_ms: Option<u64>,
    properties: Vec<PropertyValue>,
    dynamic: Option<BTreeMap<String, PropertyValue>>,
}

impl GridEntry {
    /// Create an entry with [`EntryVersion::INITIAL`] and no lease.
    pub fn new(uid: impl Into<Uid>, type_code: TypeCode, properties: Vec<PropertyValue>) -> Self {
        Self {
            uid: uid.into(),
            type_code,
            version: EntryVersion::INITIAL,
            expiration_ms: None,
            properties,
            dynamic: None,
        }
    }

    /// Entry uid.
    pub fn uid(&self) -> &Uid {
        &self.uid
    }

    /// Entry type code.
    pub fn type_code(&self) -> TypeCode {
        self.type_code
    }

    /// Entry version.
    pub fn version(&self) -> EntryVersion {
        self.version
    }

    /// Lease deadline in epoch milliseconds, if any.
    pub fn expiration_ms(&self) -> Option<u64> {
        self.expiration_ms
    }

    /// Fixed property array.
    pub fn properties(&self) -> &[PropertyValue] {
        &self.properties
    }

    /// Dynamic properties, if the type carries any.
    pub fn dynamic_properties(&self) -> Option<&BTreeMap<String, PropertyValue>> {
        self.dynamic.as_ref()
    }

    /// Replace the version.
    pub fn with_version(mut self, version: EntryVersion) -> Self {
        self.version = version;
        self
    }

    /// Attach a lease deadline in epoch milliseconds.
    pub fn with_expiration_ms(mut self, deadline: u64) -> Self {
        self.expiration_ms = Some(deadline);
        self
    }

    /// Attach dynamic properties.
    pub fn with_dynamic_properties(mut self, dynamic: BTreeMap<String, PropertyValue>) -> Self {
        self.dynamic = Some(dynamic);
        self
    }

    /// Whether the lease expired at `now_ms`.
    pub fn is_expired(&self, now_ms: u64) -> bool {
        matches!(self.expiration_ms, Some(deadline) if deadline <= now_ms)
    }

    /// Stable hash of the fixed property at `index`, `None` if absent or null.
    pub fn field_hash(&self, index: usize) -> Option<u64> {
        self.properties.get(index)?.stable_hash()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_bump_saturates() {
        let mut version = EntryVersion::from_raw(u16::MAX - 3);
        for _ in 0..10 {
            version = version.bumped();
        }
        assert!(version.is_exhausted());
        assert_eq!(version, EntryVersion::EXHAUSTED);
    }

    #[test]
    fn test_exhausted_version_never_matches() {
        let exhausted = EntryVersion::EXHAUSTED;
        assert!(!exhausted.matches(exhausted));
        assert!(EntryVersion::INITIAL.matches(EntryVersion::INITIAL));
        assert!(!EntryVersion::INITIAL.matches(EntryVersion::INITIAL.bumped()));
    }

    #[test]
    fn test_stable_hash_is_stable() {
        let a = PropertyValue::Text("tiering".to_string());
        let b = PropertyValue::Text("tiering".to_string());
        assert_eq!(a.stable_hash(), b.stable_hash());
        assert!(PropertyValue::Null.stable_hash().is_none());
        assert_ne!(
            PropertyValue::Int(42).stable_hash(),
            PropertyValue::Text("42".to_string()).stable_hash()
        );
    }

    #[test]
    fn test_uid_borrows_as_str() {
        let uid = Uid::from("node-7");
        assert_eq!(uid.as_str(), "node-7");
        let set = std::collections::BTreeMap::from([(uid, 1)]);
        assert_eq!(set.get("node-7"), Some(&1));
    }
}
