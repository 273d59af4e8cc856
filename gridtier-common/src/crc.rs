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

use crate::entry::{GridEntry, PropertyValue, TypeCode};

/// Number of fixed fields covered by a checksum word.
pub const CRC_FIELD_SLOTS: usize = 8;

/// Per-field checksum word of an entry.
///
/// One byte per fixed property, first [`CRC_FIELD_SLOTS`] properties only. A zero byte is
/// inconclusive and never rejects. The word allows rejecting a non-matching template without
/// loading the entry from storage; a non-rejection says nothing about an actual match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FieldChecksums([u8; CRC_FIELD_SLOTS]);

impl FieldChecksums {
    /// Compute the checksum word of an entry.
    pub fn from_entry(entry: &GridEntry) -> Self {
        Self::from_properties(entry.properties())
    }

    /// Compute the checksum word of a fixed property array.
    pub fn from_properties(properties: &[PropertyValue]) -> Self {
        let mut bytes = [0u8; CRC_FIELD_SLOTS];
        for (i, slot) in bytes.iter_mut().enumerate().take(properties.len().min(CRC_FIELD_SLOTS)) {
            *slot = match properties[i].stable_hash() {
                Some(hash) => fold(hash),
                None => 0,
            };
        }
        Self(bytes)
    }

    /// Checksum byte of field `index`, zero when inconclusive or out of range.
    pub fn byte(&self, index: usize) -> u8 {
        self.0.get(index).copied().unwrap_or(0)
    }

    /// Whether the word definitely rules out the template.
    ///
    /// True only if some constrained field has conclusive checksums on both sides and they differ.
    pub fn rejects(&self, template: &TemplateChecksums) -> bool {
        self.0
            .iter()
            .zip(template.0.iter())
            .any(|(&entry, &tmpl)| entry != 0 && tmpl != 0 && entry != tmpl)
    }
}

/// Checksum word of a match template, zero bytes for unconstrained fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TemplateChecksums([u8; CRC_FIELD_SLOTS]);

/// An equality template over fixed properties of one type.
#[derive(Debug, Clone)]
pub struct MatchTemplate {
    type_code: TypeCode,
    constraints: Vec<(usize, PropertyValue)>,
}

impl MatchTemplate {
    /// Create an unconstrained template for `type_code`.
    pub fn new(type_code: TypeCode) -> Self {
        Self {
            type_code,
            constraints: vec![],
        }
    }

    /// Constrain fixed property `index` to equal `value`.
    pub fn with_eq(mut self, index: usize, value: PropertyValue) -> Self {
        self.constraints.push((index, value));
        self
    }

    /// Type the template matches against.
    pub fn type_code(&self) -> TypeCode {
        self.type_code
    }

    /// Equality constraints of the template.
    pub fn constraints(&self) -> &[(usize, PropertyValue)] {
        &self.constraints
    }

    /// Checksum word of the constrained fields.
    pub fn checksums(&self) -> TemplateChecksums {
        let mut bytes = [0u8; CRC_FIELD_SLOTS];
        for (index, value) in &self.constraints {
            if *index < CRC_FIELD_SLOTS {
                if let Some(hash) = value.stable_hash() {
                    bytes[*index] = fold(hash);
                }
            }
        }
        TemplateChecksums(bytes)
    }

    /// Full equality match against an entry snapshot.
    pub fn matches(&self, entry: &GridEntry) -> bool {
        if entry.type_code() != self.type_code {
            return false;
        }
        self.constraints
            .iter()
            .all(|(index, value)| entry.properties().get(*index) == Some(value))
    }
}

/// Fold a stable field hash into a single checksum byte.
///
/// A zero result stays zero and degrades to inconclusive.
fn fold(hash: u64) -> u8 {
    hash.to_le_bytes().iter().fold(0, |acc, b| acc ^ b)
}
