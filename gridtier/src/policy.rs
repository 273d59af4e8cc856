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

/// Space operation that triggered a cache interaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOperation {
    /// Template or id read.
    Read,
    /// First write of an entry.
    Write,
    /// In-place update of an existing entry.
    Update,
    /// Destructive read.
    Take,
    /// Recovery from a persistent blob store at startup.
    InitialLoad,
}

/// What the hot cache does with the entry after the operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HotCacheAction {
    /// Register or refresh the snapshot.
    Touch,
    /// Drop the snapshot.
    Remove,
    /// Leave the cache alone.
    None,
}

/// Outcome of the policy table for one operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PolicyDecision {
    /// Hot cache action to apply.
    pub action: HotCacheAction,
    /// Whether a cold-data miss is counted for observability.
    pub count_miss: bool,
}

/// Hot cache policy per space operation.
///
/// `is_hot` is the classifier verdict on the current snapshot, `was_hot` the verdict recorded at
/// the previous store. `cache_full` only gates initial load, which never evicts to make room for
/// recovered entries.
pub fn hot_cache_action(op: CacheOperation, is_hot: bool, was_hot: bool, cache_full: bool) -> PolicyDecision {
    match op {
        CacheOperation::Read => PolicyDecision {
            action: if is_hot { HotCacheAction::Touch } else { HotCacheAction::None },
            count_miss: !is_hot,
        },
        CacheOperation::Write => PolicyDecision {
            action: if is_hot { HotCacheAction::Touch } else { HotCacheAction::None },
            count_miss: false,
        },
        CacheOperation::Update => PolicyDecision {
            action: if is_hot { HotCacheAction::Touch } else { HotCacheAction::Remove },
            count_miss: was_hot && !is_hot,
        },
        CacheOperation::Take => PolicyDecision {
            action: HotCacheAction::Remove,
            count_miss: false,
        },
        CacheOperation::InitialLoad => PolicyDecision {
            action: if is_hot && !cache_full {
                HotCacheAction::Touch
            } else {
                HotCacheAction::None
            },
            count_miss: false,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_touches_hot_and_counts_cold_misses() {
        let hot = hot_cache_action(CacheOperation::Read, true, true, false);
        assert_eq!(hot.action, HotCacheAction::Touch);
        assert!(!hot.count_miss);

        let cold = hot_cache_action(CacheOperation::Read, false, false, false);
        assert_eq!(cold.action, HotCacheAction::None);
        assert!(cold.count_miss);
    }

    #[test]
    fn test_update_removes_entries_that_went_cold() {
        let still_hot = hot_cache_action(CacheOperation::Update, true, true, false);
        assert_eq!(still_hot.action, HotCacheAction::Touch);
        assert!(!still_hot.count_miss);

        let went_cold = hot_cache_action(CacheOperation::Update, false, true, false);
        assert_eq!(went_cold.action, HotCacheAction::Remove);
        assert!(went_cold.count_miss);

        let never_hot = hot_cache_action(CacheOperation::Update, false, false, false);
        assert_eq!(never_hot.action, HotCacheAction::Remove);
        assert!(!never_hot.count_miss);
    }

    #[test]
    fn test_take_always_removes() {
        for (is_hot, was_hot) in [(true, true), (true, false), (false, true), (false, false)] {
            let decision = hot_cache_action(CacheOperation::Take, is_hot, was_hot, false);
            assert_eq!(decision.action, HotCacheAction::Remove);
            assert!(!decision.count_miss);
        }
    }

    #[test]
    fn test_initial_load_respects_capacity() {
        let decision = hot_cache_action(CacheOperation::InitialLoad, true, false, false);
        assert_eq!(decision.action, HotCacheAction::Touch);

        let full = hot_cache_action(CacheOperation::InitialLoad, true, false, true);
        assert_eq!(full.action, HotCacheAction::None);

        let cold = hot_cache_action(CacheOperation::InitialLoad, false, false, false);
        assert_eq!(cold.action, HotCacheAction::None);
    }

    #[test]
    fn test_write_never_counts_misses() {
        let cold = hot_cache_action(CacheOperation::Write, false, true, false);
        assert_eq!(cold.action, HotCacheAction::None);
        assert!(!cold.count_miss);
    }
}
