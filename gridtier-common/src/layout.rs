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

use std::collections::BTreeMap;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::entry::{EntryVersion, GridEntry, PropertyValue, TypeCode, Uid};

/// Pending transaction bookkeeping carried with an entry layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionInfo {
    /// Transaction id.
    pub txn_id: u64,
    /// Operation ordinal within the transaction.
    pub operation_id: u32,
}

/// Storage shape of an entry.
///
/// The fixed properties are carried either typed in `properties` or packed in `packed_properties`,
/// never both. Backends that move raw bytes receive packed layouts, typed backends keep the
/// property array as is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryLayout {
    /// Non-serialized fixed property array.
    pub properties: Option<Vec<PropertyValue>>,
    /// Packed fixed property array.
    pub packed_properties: Option<Bytes>,
    /// Dynamic properties, if the type carries any.
    pub dynamic: Option<BTreeMap<String, PropertyValue>>,
    /// Entry version the layout was built from.
    pub version: EntryVersion,
    /// Lease deadline in epoch milliseconds, if any.
    pub expiration_ms: Option<u64>,
    /// Pending transaction bookkeeping, if any.
    pub transaction: Option<TransactionInfo>,
}

impl EntryLayout {
    /// Build a typed layout from an entry snapshot.
    pub fn from_entry(entry: &GridEntry) -> Self {
        Self {
            properties: Some(entry.properties().to_vec()),
            packed_properties: None,
            dynamic: entry.dynamic_properties().cloned(),
            version: entry.version(),
            expiration_ms: entry.expiration_ms(),
            transaction: None,
        }
    }

    /// Pack the typed property array into bytes. No-op if already packed.
    pub fn pack(&mut self) -> Result<(), bincode::Error> {
        if let Some(properties) = self.properties.take() {
            let buf = bincode::serialize(&properties)?;
            self.packed_properties = Some(Bytes::from(buf));
        }
        Ok(())
    }

    /// Restore the typed property array from the packed bytes. No-op if already typed.
    pub fn unpack(&mut self) -> Result<(), bincode::Error> {
        if self.properties.is_none() {
            if let Some(packed) = self.packed_properties.take() {
                self.properties = Some(bincode::deserialize(&packed)?);
            }
        }
        Ok(())
    }

    /// Prune the layout down to the given indexed fields.
    ///
    /// Non-indexed fixed properties become [`PropertyValue::Null`] placeholders and dynamic
    /// properties are dropped. Packed layouts are returned unchanged.
    pub fn index_part(&self, index_fields: &[usize]) -> Self {
        let properties = match &self.properties {
            None => return self.clone(),
            Some(properties) => properties,
        };
        let pruned = properties
            .iter()
            .enumerate()
            .map(|(i, value)| {
                if index_fields.contains(&i) {
                    value.clone()
                } else {
                    PropertyValue::Null
                }
            })
            .collect();
        Self {
            properties: Some(pruned),
            packed_properties: None,
            dynamic: None,
            version: self.version,
            expiration_ms: self.expiration_ms,
            transaction: self.transaction,
        }
    }

    /// Rebuild an entry from the layout, unpacking the property array if needed.
    pub fn into_entry(mut self, uid: Uid, type_code: TypeCode) -> Result<GridEntry, bincode::Error> {
        self.unpack()?;
        let mut entry = GridEntry::new(uid, type_code, self.properties.unwrap_or_default())
            .with_version(self.version);
        if let Some(deadline) = self.expiration_ms {
            entry = entry.with_expiration_ms(deadline);
        }
        if let Some(dynamic) = self.dynamic {
            entry = entry.with_dynamic_properties(dynamic);
        }
        Ok(entry)
    }
}
