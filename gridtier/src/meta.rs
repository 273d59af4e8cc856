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

use gridtier_common::entry::TypeCode;

/// Storage-relevant description of one entry type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeDescriptor {
    /// Type code the descriptor belongs to.
    pub type_code: TypeCode,
    /// Fixed property count of the type.
    pub field_count: usize,
    /// Fixed properties the type indexes on.
    pub index_fields: Vec<usize>,
    /// Whether index structures of this type track back-references per entry.
    pub requires_backrefs: bool,
}

impl TypeDescriptor {
    /// Descriptor of an unregistered type: no indexes, no back-reference tracking.
    pub fn untyped(type_code: TypeCode) -> Self {
        Self {
            type_code,
            field_count: 0,
            index_fields: vec![],
            requires_backrefs: false,
        }
    }
}

/// Resolves type codes to their storage-relevant metadata.
pub trait TypeMetadataProvider: Send + Sync + 'static {
    /// Descriptor of `type_code`, `None` for unregistered types.
    fn descriptor(&self, type_code: TypeCode) -> Option<TypeDescriptor>;
}

/// Fixed registry of type descriptors, populated before the cache starts.
#[derive(Debug, Default)]
pub struct StaticTypeRegistry {
    types: BTreeMap<TypeCode, TypeDescriptor>,
}

impl StaticTypeRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a descriptor. Replaces an existing descriptor of the same type.
    pub fn with_type(mut self, descriptor: TypeDescriptor) -> Self {
        self.types.insert(descriptor.type_code, descriptor);
        self
    }
}

impl TypeMetadataProvider for StaticTypeRegistry {
    fn descriptor(&self, type_code: TypeCode) -> Option<TypeDescriptor> {
        self.types.get(&type_code).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_resolves_registered_types() {
        let registry = StaticTypeRegistry::new().with_type(TypeDescriptor {
            type_code: 4,
            field_count: 3,
            index_fields: vec![0, 2],
            requires_backrefs: true,
        });

        let descriptor = registry.descriptor(4).unwrap();
        assert_eq!(descriptor.index_fields, vec![0, 2]);
        assert!(descriptor.requires_backrefs);
        assert!(registry.descriptor(5).is_none());
    }
}
