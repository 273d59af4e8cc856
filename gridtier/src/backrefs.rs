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

/// Handle of an index node an entry is referenced from.
///
/// Opaque to this layer. The index structures own the nodes, the residency only keeps the handles
/// as a lookup aid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexRef {
    /// Index the node belongs to.
    pub index_id: u32,
    /// Node handle within the index.
    pub node: u64,
}

/// Back-references from index structures to one entry.
///
/// Most entries sit in at most one index, so the single-reference form avoids a heap allocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum BackRefs {
    /// Not indexed.
    #[default]
    None,
    /// Referenced from one index node.
    Single(IndexRef),
    /// Referenced from several index nodes.
    Many(Vec<IndexRef>),
}

impl BackRefs {
    /// Record a reference.
    pub fn add(&mut self, backref: IndexRef) {
        match self {
            Self::None => *self = Self::Single(backref),
            Self::Single(existing) => *self = Self::Many(vec![*existing, backref]),
            Self::Many(refs) => refs.push(backref),
        }
    }

    /// Drop a reference. Returns whether it was present.
    pub fn remove(&mut self, backref: &IndexRef) -> bool {
        match self {
            Self::None => false,
            Self::Single(existing) => {
                if existing == backref {
                    *self = Self::None;
                    true
                } else {
                    false
                }
            }
            Self::Many(refs) => match refs.iter().position(|r| r == backref) {
                Some(i) => {
                    refs.swap_remove(i);
                    true
                }
                None => false,
            },
        }
    }

    /// Reference count.
    pub fn len(&self) -> usize {
        match self {
            Self::None => 0,
            Self::Single(_) => 1,
            Self::Many(refs) => refs.len(),
        }
    }

    /// Whether no reference is recorded.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Shrink the representation to the smallest form holding the current references.
    ///
    /// With `keep_full` the list form is preserved, only its spare capacity is released. Index
    /// structures that hand out interior pointers into the list require the stable form.
    pub fn economize(&mut self, keep_full: bool) {
        match self {
            Self::None | Self::Single(_) => {}
            Self::Many(refs) => {
                if keep_full {
                    refs.shrink_to_fit();
                    return;
                }
                match refs.len() {
                    0 => *self = Self::None,
                    1 => *self = Self::Single(refs[0]),
                    _ => refs.shrink_to_fit(),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backref(node: u64) -> IndexRef {
        IndexRef { index_id: 1, node }
    }

    #[test]
    fn test_add_promotes_representation() {
        let mut refs = BackRefs::default();
        assert!(refs.is_empty());

        refs.add(backref(10));
        assert_eq!(refs, BackRefs::Single(backref(10)));

        refs.add(backref(11));
        assert_eq!(refs.len(), 2);
        assert!(matches!(refs, BackRefs::Many(_)));
    }

    #[test]
    fn test_remove_and_economize_demote() {
        let mut refs = BackRefs::default();
        refs.add(backref(10));
        refs.add(backref(11));
        refs.add(backref(12));

        assert!(refs.remove(&backref(11)));
        assert!(!refs.remove(&backref(11)));
        assert_eq!(refs.len(), 2);

        refs.remove(&backref(12));
        refs.economize(false);
        assert_eq!(refs, BackRefs::Single(backref(10)));

        refs.remove(&backref(10));
        assert_eq!(refs, BackRefs::None);
    }

    #[test]
    fn test_economize_keeps_full_form_when_forced() {
        let mut refs = BackRefs::default();
        refs.add(backref(10));
        refs.add(backref(11));
        refs.remove(&backref(11));

        refs.economize(true);
        assert!(matches!(refs, BackRefs::Many(_)));
        assert_eq!(refs.len(), 1);
    }
}
