//! Membership Cache for Sequences
//!
//! Provides the fast path of record for sequence membership: an ordered index from
//! `(graph_id, sequence_id)` to the member list, with O(1) membership, cardinality
//! and index lookup.
//!
//! # Architecture
//!
//! Each entry keeps two views of the same members:
//!
//! - `order`: `BTreeMap<index, member>` for ordered iteration
//! - `positions`: `HashMap<member, index>` for lookups
//!
//! Indices come from a per-entry counter that only grows, so indices handed out for
//! one key are unique and strictly increasing even across removals.
//!
//! # Concurrency
//!
//! The outer map lock is held only long enough to find, insert or remove a key's
//! slot. All reads and writes of an entry go through that entry's own lock, so
//! unrelated sequences never contend while writers on the same sequence are
//! totally ordered. A slot that was dropped or replaced is marked retired; a writer
//! that raced with the drop sees the flag and fails instead of resurrecting it.

use super::error::CacheError;
use crate::models::{MemberIndex, SequenceKey, SequenceSnapshot};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Result of appending a member
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppendOutcome {
    /// Index of the member (new or pre-existing)
    pub index: MemberIndex,
    /// False when the member was already present and nothing changed
    pub inserted: bool,
}

/// Ordered membership index keyed by sequence
///
/// Appending a member that is already present is idempotent: the existing index is
/// returned with `inserted == false`.
#[async_trait]
pub trait MembershipCache: Send + Sync {
    /// Initialize an entry with `ids` at indices `0..n`, replacing any prior entry
    ///
    /// Duplicate ids keep their first position.
    async fn create(&self, key: &SequenceKey, ids: Vec<String>);

    /// Populate an entry from persisted `(member, index)` pairs unless one exists
    ///
    /// Returns true if the entry was installed.
    async fn restore_if_absent(&self, key: &SequenceKey, entries: Vec<(String, MemberIndex)>)
        -> bool;

    /// Append `id` at the end of the sequence
    async fn append(&self, key: &SequenceKey, id: &str) -> Result<AppendOutcome, CacheError>;

    /// Remove `id`; returns false when it was not a member
    async fn remove(&self, key: &SequenceKey, id: &str) -> bool;

    /// Remove the whole entry; returns false when nothing was cached
    async fn drop_sequence(&self, key: &SequenceKey) -> bool;

    /// Whether an entry exists for the key
    async fn exists(&self, key: &SequenceKey) -> bool;

    /// Members in current order (empty when not cached)
    async fn members(&self, key: &SequenceKey) -> Vec<String>;

    async fn contains(&self, key: &SequenceKey, id: &str) -> bool;

    /// Number of members (zero when not cached)
    async fn size(&self, key: &SequenceKey) -> u64;

    /// Stable index of a member
    async fn index_of(&self, key: &SequenceKey, id: &str) -> Option<MemberIndex>;

    /// Members with their indices, or `None` when not cached
    async fn snapshot(&self, key: &SequenceKey) -> Option<SequenceSnapshot>;

    async fn stats(&self) -> CacheStats;
}

/// Statistics about the membership cache
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of cached sequences
    pub sequences: usize,
    /// Total members across all cached sequences
    pub total_members: usize,
}

#[derive(Debug, Default)]
struct SequenceEntry {
    order: BTreeMap<MemberIndex, String>,
    positions: HashMap<String, MemberIndex>,
    next_index: MemberIndex,
    retired: bool,
}

impl SequenceEntry {
    fn from_members(ids: Vec<String>) -> Self {
        let mut entry = Self::default();
        for id in ids {
            entry.append(&id);
        }
        entry
    }

    fn from_indexed(mut entries: Vec<(String, MemberIndex)>) -> Self {
        entries.sort_by_key(|(_, index)| *index);

        let mut entry = Self::default();
        for (id, index) in entries {
            if entry.positions.contains_key(&id) {
                continue;
            }
            // Colliding or out-of-order indices are renumbered past the current tail
            let index = if index >= entry.next_index {
                index
            } else {
                entry.next_index
            };
            entry.insert_at(id, index);
        }
        entry
    }

    fn insert_at(&mut self, id: String, index: MemberIndex) {
        self.order.insert(index, id.clone());
        self.positions.insert(id, index);
        self.next_index = index + 1;
    }

    fn append(&mut self, id: &str) -> AppendOutcome {
        if let Some(&index) = self.positions.get(id) {
            return AppendOutcome {
                index,
                inserted: false,
            };
        }
        let index = self.next_index;
        self.insert_at(id.to_string(), index);
        AppendOutcome {
            index,
            inserted: true,
        }
    }

    fn remove(&mut self, id: &str) -> bool {
        match self.positions.remove(id) {
            Some(index) => {
                self.order.remove(&index);
                true
            }
            None => false,
        }
    }

    fn members(&self) -> Vec<String> {
        self.order.values().cloned().collect()
    }
}

type Slot = Arc<RwLock<SequenceEntry>>;

/// Process-local `MembershipCache`
#[derive(Debug, Default)]
pub struct InMemoryMembershipCache {
    entries: RwLock<HashMap<SequenceKey, Slot>>,
}

impl InMemoryMembershipCache {
    pub fn new() -> Self {
        Self::default()
    }

    async fn slot(&self, key: &SequenceKey) -> Option<Slot> {
        self.entries.read().await.get(key).cloned()
    }

    async fn retire(slot: Slot) {
        slot.write().await.retired = true;
    }
}

#[async_trait]
impl MembershipCache for InMemoryMembershipCache {
    async fn create(&self, key: &SequenceKey, ids: Vec<String>) {
        let slot = Arc::new(RwLock::new(SequenceEntry::from_members(ids)));
        let replaced = self.entries.write().await.insert(key.clone(), slot);
        if let Some(old) = replaced {
            tracing::debug!(sequence = %key, "Replacing existing cache entry");
            Self::retire(old).await;
        }
    }

    async fn restore_if_absent(
        &self,
        key: &SequenceKey,
        entries: Vec<(String, MemberIndex)>,
    ) -> bool {
        let mut map = self.entries.write().await;
        if map.contains_key(key) {
            return false;
        }
        map.insert(
            key.clone(),
            Arc::new(RwLock::new(SequenceEntry::from_indexed(entries))),
        );
        true
    }

    async fn append(&self, key: &SequenceKey, id: &str) -> Result<AppendOutcome, CacheError> {
        let slot = self
            .slot(key)
            .await
            .ok_or_else(|| CacheError::SequenceNotFound(key.clone()))?;

        let mut entry = slot.write().await;
        if entry.retired {
            return Err(CacheError::SequenceRetired(key.clone()));
        }
        Ok(entry.append(id))
    }

    async fn remove(&self, key: &SequenceKey, id: &str) -> bool {
        let Some(slot) = self.slot(key).await else {
            return false;
        };
        let mut entry = slot.write().await;
        !entry.retired && entry.remove(id)
    }

    async fn drop_sequence(&self, key: &SequenceKey) -> bool {
        let removed = self.entries.write().await.remove(key);
        match removed {
            Some(slot) => {
                Self::retire(slot).await;
                true
            }
            None => false,
        }
    }

    async fn exists(&self, key: &SequenceKey) -> bool {
        self.entries.read().await.contains_key(key)
    }

    async fn members(&self, key: &SequenceKey) -> Vec<String> {
        match self.slot(key).await {
            Some(slot) => {
                let entry = slot.read().await;
                if entry.retired {
                    Vec::new()
                } else {
                    entry.members()
                }
            }
            None => Vec::new(),
        }
    }

    async fn contains(&self, key: &SequenceKey, id: &str) -> bool {
        match self.slot(key).await {
            Some(slot) => {
                let entry = slot.read().await;
                !entry.retired && entry.positions.contains_key(id)
            }
            None => false,
        }
    }

    async fn size(&self, key: &SequenceKey) -> u64 {
        match self.slot(key).await {
            Some(slot) => {
                let entry = slot.read().await;
                if entry.retired {
                    0
                } else {
                    entry.positions.len() as u64
                }
            }
            None => 0,
        }
    }

    async fn index_of(&self, key: &SequenceKey, id: &str) -> Option<MemberIndex> {
        let slot = self.slot(key).await?;
        let entry = slot.read().await;
        if entry.retired {
            return None;
        }
        entry.positions.get(id).copied()
    }

    async fn snapshot(&self, key: &SequenceKey) -> Option<SequenceSnapshot> {
        let slot = self.slot(key).await?;
        let entry = slot.read().await;
        if entry.retired {
            return None;
        }
        Some(SequenceSnapshot {
            key: key.clone(),
            members: entry
                .order
                .iter()
                .map(|(index, id)| (id.clone(), *index))
                .collect(),
        })
    }

    async fn stats(&self) -> CacheStats {
        let slots: Vec<Slot> = self.entries.read().await.values().cloned().collect();
        let mut stats = CacheStats {
            sequences: slots.len(),
            total_members: 0,
        };
        for slot in slots {
            stats.total_members += slot.read().await.positions.len();
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn test_entry_from_members_dedupes_first_occurrence() {
        let entry = SequenceEntry::from_members(ids(&["a", "b", "a", "c"]));
        assert_eq!(entry.members(), ids(&["a", "b", "c"]));
        assert_eq!(entry.positions["c"], 2);
        assert_eq!(entry.next_index, 3);
    }

    #[test]
    fn test_entry_indices_survive_removal() {
        let mut entry = SequenceEntry::from_members(ids(&["a", "b"]));
        assert!(entry.remove("b"));
        let outcome = entry.append("c");
        assert_eq!(outcome.index, 2);
        assert!(outcome.inserted);
        assert_eq!(entry.members(), ids(&["a", "c"]));
    }

    #[test]
    fn test_entry_from_indexed_orders_and_renumbers() {
        let entry = SequenceEntry::from_indexed(vec![
            ("c".to_string(), 9),
            ("a".to_string(), 0),
            ("b".to_string(), 0),
            ("a".to_string(), 4),
        ]);
        assert_eq!(entry.members(), ids(&["a", "b", "c"]));
        assert_eq!(entry.positions["a"], 0);
        assert_eq!(entry.positions["b"], 1);
        assert_eq!(entry.positions["c"], 9);
        assert_eq!(entry.next_index, 10);
    }

    #[tokio::test]
    async fn test_append_to_unknown_sequence_fails() {
        let cache = InMemoryMembershipCache::new();
        let key = SequenceKey::new("g1", "missing");
        let err = cache.append(&key, "m1").await.unwrap_err();
        assert_eq!(err, CacheError::SequenceNotFound(key));
    }

    #[tokio::test]
    async fn test_duplicate_append_is_idempotent() {
        let cache = InMemoryMembershipCache::new();
        let key = SequenceKey::new("g1", "c1");
        cache.create(&key, ids(&["m1", "m2"])).await;

        let outcome = cache.append(&key, "m1").await.unwrap();
        assert_eq!(
            outcome,
            AppendOutcome {
                index: 0,
                inserted: false
            }
        );
        assert_eq!(cache.size(&key).await, 2);
    }

    #[tokio::test]
    async fn test_create_overwrites_previous_entry() {
        let cache = InMemoryMembershipCache::new();
        let key = SequenceKey::new("g1", "c1");
        cache.create(&key, ids(&["m1", "m2"])).await;
        cache.create(&key, ids(&["m9"])).await;

        assert_eq!(cache.members(&key).await, ids(&["m9"]));
        assert_eq!(cache.index_of(&key, "m9").await, Some(0));
        assert_eq!(cache.index_of(&key, "m1").await, None);
    }

    #[tokio::test]
    async fn test_writer_holding_retired_slot_cannot_resurrect() {
        let cache = InMemoryMembershipCache::new();
        let key = SequenceKey::new("g1", "c1");
        cache.create(&key, ids(&["m1"])).await;

        // Simulate a writer that fetched the slot just before the drop
        let stale = cache.slot(&key).await.unwrap();
        assert!(cache.drop_sequence(&key).await);

        assert!(stale.read().await.retired);
        assert!(!cache.exists(&key).await);
        assert_eq!(
            cache.append(&key, "m2").await.unwrap_err(),
            CacheError::SequenceNotFound(key)
        );
    }

    #[tokio::test]
    async fn test_restore_if_absent_does_not_clobber() {
        let cache = InMemoryMembershipCache::new();
        let key = SequenceKey::new("g1", "c1");
        cache.create(&key, ids(&["live"])).await;

        let installed = cache
            .restore_if_absent(&key, vec![("stale".to_string(), 0)])
            .await;
        assert!(!installed);
        assert_eq!(cache.members(&key).await, ids(&["live"]));
    }

    #[tokio::test]
    async fn test_stats_counts_members() {
        let cache = InMemoryMembershipCache::new();
        cache.create(&SequenceKey::new("g1", "a"), ids(&["m1", "m2"])).await;
        cache.create(&SequenceKey::new("g2", "a"), ids(&["m1"])).await;

        let stats = cache.stats().await;
        assert_eq!(stats.sequences, 2);
        assert_eq!(stats.total_members, 3);
    }

    #[tokio::test]
    async fn test_snapshot_pairs_members_with_indices() {
        let cache = InMemoryMembershipCache::new();
        let key = SequenceKey::new("g1", "c1");
        cache.create(&key, ids(&["m1", "m2", "m3"])).await;
        cache.remove(&key, "m2").await;

        let snapshot = cache.snapshot(&key).await.unwrap();
        assert_eq!(
            snapshot.members,
            vec![("m1".to_string(), 0), ("m3".to_string(), 2)]
        );
        assert_eq!(snapshot.member_ids(), ids(&["m1", "m3"]));
    }
}
