//! Sequence Engine
//!
//! Orchestrates the lifecycle of sequences: ordered collections of node
//! references owned by a node in a graph.
//!
//! # Consistency Model
//!
//! The membership cache is the fast path of record and the graph store is an
//! eventually-consistent durability layer behind it:
//!
//! - `create` validates members and creates the backing node on the caller's path
//!   (the caller needs the generated id), then commits to the cache
//! - Every relationship write (`create`, `add_member`, `remove_member`, `delete`) is
//!   dispatched to the [`BackgroundWriter`] after the cache commit; the caller gets
//!   its answer without waiting for the store
//! - A failed background write is drift: logged, counted and emitted as
//!   `SequenceEvent::PersistenceFailed`, never returned to the caller
//!
//! No cache lock is held across a store call.
//!
//! # Cold Cache
//!
//! By default a sequence missing from the cache reads as empty and cannot be
//! appended to. With `SequenceConfig::read_through_on_miss` the engine rebuilds the
//! entry from the store's membership relationships first. Deleted sequences are
//! remembered until their store deletion completes, so they cannot be read back in.
//!
//! # Example
//!
//! ```rust
//! use sequence_core::db::InMemoryGraphStore;
//! use sequence_core::models::NodeSpec;
//! use sequence_core::services::SequenceEngine;
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() -> anyhow::Result<()> {
//! let store = Arc::new(InMemoryGraphStore::new());
//! store.insert_node("g1", "m1", NodeSpec::new("concept")).await;
//! store.insert_node("g1", "m2", NodeSpec::new("concept")).await;
//!
//! let engine = SequenceEngine::new(store);
//! let id = engine.create("g1", vec!["m1".into(), "m2".into()]).await?;
//! assert_eq!(engine.get_members("g1", &id).await?, vec!["m1", "m2"]);
//! # Ok(())
//! # }
//! ```

use super::error::SequenceError;
use super::membership_cache::{CacheStats, InMemoryMembershipCache, MembershipCache};
use super::reference_validator::ReferenceValidator;
use crate::config::SequenceConfig;
use crate::db::{EventSink, GraphStore, NoopEventSink, SequenceEvent};
use crate::models::{MemberIndex, NodeSpec, SequenceKey, IL_SEQUENCE_INDEX, SEQUENCE_MEMBERSHIP};
use crate::operations::{BackgroundWriter, DriftStats, StoreWrite, WritePolicy};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Reloads allowed while deletes keep landing during a read-through load
const MAX_LOAD_ATTEMPTS: usize = 8;

/// Reject blank required fields, naming every one that is missing
fn require(operation: &'static str, fields: &[(&'static str, &str)]) -> Result<(), SequenceError> {
    let missing: Vec<&'static str> = fields
        .iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| *name)
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(SequenceError::missing_parameters(operation, missing))
    }
}

/// Cache-first sequence lifecycle protocol
///
/// All collaborators are injected; cloning the `Arc`s lets several engines share
/// one cache or store.
pub struct SequenceEngine {
    store: Arc<dyn GraphStore>,
    cache: Arc<dyn MembershipCache>,
    validator: ReferenceValidator,
    writer: BackgroundWriter,
    events: Arc<dyn EventSink>,
    config: SequenceConfig,
    /// Deleted sequences whose store deletion has not completed yet
    ///
    /// Only maintained with read-through on. Held for reading while a loaded
    /// entry is installed and for writing while `delete` drops one.
    tombstones: Arc<RwLock<HashSet<SequenceKey>>>,
    /// Bumped by every read-through `delete`; a load that sees it change retries
    deletions: AtomicU64,
}

impl SequenceEngine {
    /// Create an engine with an in-memory cache, no event sink and default config
    pub fn new(store: Arc<dyn GraphStore>) -> Self {
        let cache: Arc<dyn MembershipCache> = Arc::new(InMemoryMembershipCache::new());
        Self::assemble(store, cache, Arc::new(NoopEventSink), SequenceConfig::default())
    }

    /// Create an engine from explicit components
    ///
    /// # Errors
    ///
    /// Returns an error if `config` fails validation.
    pub fn with_components(
        store: Arc<dyn GraphStore>,
        cache: Arc<dyn MembershipCache>,
        events: Arc<dyn EventSink>,
        config: SequenceConfig,
    ) -> anyhow::Result<Self> {
        config.validate().map_err(anyhow::Error::msg)?;
        Ok(Self::assemble(store, cache, events, config))
    }

    fn assemble(
        store: Arc<dyn GraphStore>,
        cache: Arc<dyn MembershipCache>,
        events: Arc<dyn EventSink>,
        config: SequenceConfig,
    ) -> Self {
        let validator = ReferenceValidator::new(Arc::clone(&store), config.validation_concurrency);
        let writer = BackgroundWriter::new(
            Arc::clone(&store),
            Arc::clone(&events),
            WritePolicy::from_config(&config),
        );
        Self {
            store,
            cache,
            validator,
            writer,
            events,
            config,
            tombstones: Arc::new(RwLock::new(HashSet::new())),
            deletions: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &SequenceConfig {
        &self.config
    }

    /// Create a sequence holding `members` in the given order
    ///
    /// Duplicate member ids keep their first position. When members are given,
    /// every one must exist in `graph_id`; otherwise nothing is created.
    ///
    /// # Errors
    ///
    /// - `MissingParameters` for a blank graph id or member id
    /// - `InvalidMembers` listing the ids that do not exist
    /// - `StoreUnavailable` if validation or node creation could not reach the store
    pub async fn create(&self, graph_id: &str, members: Vec<String>) -> Result<String, SequenceError> {
        require("create", &[("graph_id", graph_id)])?;
        if members.iter().any(|m| m.trim().is_empty()) {
            return Err(SequenceError::missing_parameters("create", vec!["member_id"]));
        }

        let mut seen = HashSet::new();
        let members: Vec<String> = members
            .into_iter()
            .filter(|m| seen.insert(m.clone()))
            .collect();

        if !members.is_empty() {
            let validation = self.validator.check(graph_id, &members).await?;
            if !validation.is_valid() {
                tracing::warn!(
                    graph_id,
                    missing = ?validation.missing,
                    "Rejected sequence with invalid member ids"
                );
                return Err(SequenceError::invalid_members(validation.missing));
            }
        }

        let sequence_id = self
            .store
            .add_node(graph_id, NodeSpec::sequence())
            .await
            .map_err(|e| {
                SequenceError::store_unavailable(
                    format!("failed to create sequence node in graph '{}'", graph_id),
                    e,
                )
            })?;

        let key = SequenceKey::new(graph_id, &sequence_id);
        self.cache.create(&key, members.clone()).await;

        if !members.is_empty() {
            self.writer.dispatch(StoreWrite::CreateCollection {
                key: key.clone(),
                members: members.clone(),
            });
        }

        tracing::info!(sequence = %key, members = members.len(), "Created sequence");
        self.events.emit(SequenceEvent::SequenceCreated {
            graph_id: key.graph_id,
            sequence_id: key.sequence_id,
            members,
        });

        Ok(sequence_id)
    }

    /// Append a member and return its index
    ///
    /// Adding a member that is already present returns its existing index and
    /// changes nothing. The member is not checked against the store.
    ///
    /// # Errors
    ///
    /// - `MissingParameters` for any blank id
    /// - `MemberAddFailed` if the sequence is not cached (or was dropped meanwhile)
    pub async fn add_member(
        &self,
        graph_id: &str,
        sequence_id: &str,
        member_id: &str,
    ) -> Result<MemberIndex, SequenceError> {
        require(
            "add_member",
            &[
                ("graph_id", graph_id),
                ("sequence_id", sequence_id),
                ("member_id", member_id),
            ],
        )?;

        let key = SequenceKey::new(graph_id, sequence_id);
        self.ensure_cached(&key).await?;

        let outcome = self
            .cache
            .append(&key, member_id)
            .await
            .map_err(|e| SequenceError::member_add_failed(sequence_id, member_id, e))?;

        if !outcome.inserted {
            tracing::debug!(sequence = %key, member_id, index = outcome.index, "Member already present");
            return Ok(outcome.index);
        }

        self.writer.dispatch(StoreWrite::AddRelation {
            key: key.clone(),
            member_id: member_id.to_string(),
            index: outcome.index,
        });

        tracing::debug!(sequence = %key, member_id, index = outcome.index, "Added member");
        self.events.emit(SequenceEvent::MemberAdded {
            graph_id: key.graph_id,
            sequence_id: key.sequence_id,
            member_id: member_id.to_string(),
            index: outcome.index,
        });

        Ok(outcome.index)
    }

    /// Remove a member; removing a non-member is a no-op
    ///
    /// Returns the sequence id.
    pub async fn remove_member(
        &self,
        graph_id: &str,
        sequence_id: &str,
        member_id: &str,
    ) -> Result<String, SequenceError> {
        require(
            "remove_member",
            &[
                ("graph_id", graph_id),
                ("sequence_id", sequence_id),
                ("member_id", member_id),
            ],
        )?;

        let key = SequenceKey::new(graph_id, sequence_id);
        self.ensure_cached(&key).await?;

        if self.cache.remove(&key, member_id).await {
            self.writer.dispatch(StoreWrite::DeleteRelation {
                key: key.clone(),
                member_id: member_id.to_string(),
            });

            tracing::debug!(sequence = %key, member_id, "Removed member");
            self.events.emit(SequenceEvent::MemberRemoved {
                graph_id: key.graph_id,
                sequence_id: key.sequence_id,
                member_id: member_id.to_string(),
            });
        } else {
            tracing::debug!(sequence = %key, member_id, "Remove of non-member ignored");
        }

        Ok(sequence_id.to_string())
    }

    /// Members in current order; empty when the sequence is unknown
    pub async fn get_members(
        &self,
        graph_id: &str,
        sequence_id: &str,
    ) -> Result<Vec<String>, SequenceError> {
        require(
            "get_members",
            &[("graph_id", graph_id), ("sequence_id", sequence_id)],
        )?;
        let key = SequenceKey::new(graph_id, sequence_id);
        self.ensure_cached(&key).await?;
        Ok(self.cache.members(&key).await)
    }

    pub async fn is_member(
        &self,
        graph_id: &str,
        sequence_id: &str,
        member_id: &str,
    ) -> Result<bool, SequenceError> {
        require(
            "is_member",
            &[
                ("graph_id", graph_id),
                ("sequence_id", sequence_id),
                ("member_id", member_id),
            ],
        )?;
        let key = SequenceKey::new(graph_id, sequence_id);
        self.ensure_cached(&key).await?;
        Ok(self.cache.contains(&key, member_id).await)
    }

    /// Number of members; zero when the sequence is unknown
    pub async fn get_cardinality(
        &self,
        graph_id: &str,
        sequence_id: &str,
    ) -> Result<u64, SequenceError> {
        require(
            "get_cardinality",
            &[("graph_id", graph_id), ("sequence_id", sequence_id)],
        )?;
        let key = SequenceKey::new(graph_id, sequence_id);
        self.ensure_cached(&key).await?;
        Ok(self.cache.size(&key).await)
    }

    /// Stable index a member was admitted with
    pub async fn index_of(
        &self,
        graph_id: &str,
        sequence_id: &str,
        member_id: &str,
    ) -> Result<Option<MemberIndex>, SequenceError> {
        require(
            "index_of",
            &[
                ("graph_id", graph_id),
                ("sequence_id", sequence_id),
                ("member_id", member_id),
            ],
        )?;
        let key = SequenceKey::new(graph_id, sequence_id);
        self.ensure_cached(&key).await?;
        Ok(self.cache.index_of(&key, member_id).await)
    }

    /// Drop the sequence from the cache and queue its deletion from the store
    ///
    /// Returns the deleted id.
    pub async fn delete(&self, graph_id: &str, sequence_id: &str) -> Result<String, SequenceError> {
        require("delete", &[("graph_id", graph_id), ("sequence_id", sequence_id)])?;

        let key = SequenceKey::new(graph_id, sequence_id);
        let write = StoreWrite::DeleteCollection { key: key.clone() };

        let was_cached = if self.config.read_through_on_miss {
            let mut tombstones = self.tombstones.write().await;
            tombstones.insert(key.clone());
            self.deletions.fetch_add(1, Ordering::AcqRel);
            let was_cached = self.cache.drop_sequence(&key).await;
            drop(tombstones);

            // Once the store no longer has the sequence a load finds nothing
            let tombstones = Arc::clone(&self.tombstones);
            let deleted = key.clone();
            self.writer.dispatch_then(write, move |succeeded| async move {
                if succeeded {
                    tombstones.write().await.remove(&deleted);
                }
            });
            was_cached
        } else {
            let was_cached = self.cache.drop_sequence(&key).await;
            self.writer.dispatch(write);
            was_cached
        };

        tracing::info!(sequence = %key, was_cached, "Deleted sequence");
        self.events.emit(SequenceEvent::SequenceDeleted {
            graph_id: key.graph_id,
            sequence_id: key.sequence_id,
        });

        Ok(sequence_id.to_string())
    }

    /// Wait until every queued store write has finished
    pub async fn wait_for_background_writes(&self) {
        self.writer.wait_idle().await;
    }

    pub fn drift_stats(&self) -> DriftStats {
        self.writer.stats()
    }

    pub async fn cache_stats(&self) -> CacheStats {
        self.cache.stats().await
    }

    /// Rebuild a missing cache entry from the store when read-through is enabled
    ///
    /// The install happens under the tombstone read lock and only if no delete
    /// ran since the load started, so a concurrent `delete` always wins.
    async fn ensure_cached(&self, key: &SequenceKey) -> Result<(), SequenceError> {
        if !self.config.read_through_on_miss || self.cache.exists(key).await {
            return Ok(());
        }

        for attempt in 0..MAX_LOAD_ATTEMPTS {
            let epoch = self.deletions.load(Ordering::Acquire);
            if self.tombstones.read().await.contains(key) {
                return Ok(());
            }

            let Some(members) = self.load_members(key).await? else {
                return Ok(());
            };

            let tombstones = self.tombstones.read().await;
            if tombstones.contains(key) {
                return Ok(());
            }
            if self.deletions.load(Ordering::Acquire) != epoch {
                tracing::debug!(sequence = %key, attempt, "Delete raced with cache load, reloading");
                continue;
            }

            let loaded = members.len();
            if self.cache.restore_if_absent(key, members).await {
                tracing::info!(sequence = %key, members = loaded, "Rebuilt cache entry from store");
            }
            drop(tombstones);
            return Ok(());
        }

        Err(SequenceError::unknown(
            format!("failed to load sequence '{}'", key),
            anyhow::anyhow!("deletes kept racing the load for {} attempts", MAX_LOAD_ATTEMPTS),
        ))
    }

    /// Persisted members of `key`, or `None` if the store has no such sequence
    async fn load_members(
        &self,
        key: &SequenceKey,
    ) -> Result<Option<Vec<(String, MemberIndex)>>, SequenceError> {
        let members = self
            .store
            .get_collection_members(
                &key.graph_id,
                &key.sequence_id,
                SEQUENCE_MEMBERSHIP,
                IL_SEQUENCE_INDEX,
            )
            .await
            .map_err(|e| {
                SequenceError::store_unavailable(
                    format!("failed to load members of sequence '{}'", key),
                    e,
                )
            })?;

        // An empty relation set is only a sequence if its node exists
        if members.is_empty() {
            let exists = self
                .store
                .node_exists(&key.graph_id, &key.sequence_id)
                .await
                .map_err(|e| {
                    SequenceError::store_unavailable(
                        format!("failed to look up sequence '{}'", key),
                        e,
                    )
                })?;
            if !exists {
                return Ok(None);
            }
        }

        Ok(Some(members))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::InMemoryGraphStore;

    #[test]
    fn test_require_names_every_blank_field() {
        let err = require(
            "add_member",
            &[("graph_id", "g1"), ("sequence_id", " "), ("member_id", "")],
        )
        .unwrap_err();
        match err {
            SequenceError::MissingParameters { operation, missing } => {
                assert_eq!(operation, "add_member");
                assert_eq!(missing, vec!["sequence_id", "member_id"]);
            }
            other => panic!("Expected MissingParameters, got {:?}", other),
        }
    }

    #[test]
    fn test_with_components_rejects_invalid_config() {
        let store = Arc::new(InMemoryGraphStore::new());
        let result = SequenceEngine::with_components(
            store,
            Arc::new(InMemoryMembershipCache::new()),
            Arc::new(NoopEventSink),
            SequenceConfig {
                validation_concurrency: 0,
                ..Default::default()
            },
        );
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_tombstone_cleared_once_store_deletion_lands() {
        let store = Arc::new(InMemoryGraphStore::new());
        store.insert_node("g1", "m1", NodeSpec::new("concept")).await;
        let engine = SequenceEngine::with_components(
            store.clone(),
            Arc::new(InMemoryMembershipCache::new()),
            Arc::new(NoopEventSink),
            SequenceConfig {
                read_through_on_miss: true,
                ..Default::default()
            },
        )
        .unwrap();

        let id = engine.create("g1", vec!["m1".into()]).await.unwrap();
        engine.delete("g1", &id).await.unwrap();
        engine.wait_for_background_writes().await;
        assert!(engine.tombstones.read().await.is_empty());
        // The store answers for the key now
        assert!(engine.get_members("g1", &id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_tombstone_kept_when_store_deletion_fails() {
        let store = Arc::new(InMemoryGraphStore::new());
        let engine = SequenceEngine::with_components(
            store.clone(),
            Arc::new(InMemoryMembershipCache::new()),
            Arc::new(NoopEventSink),
            SequenceConfig {
                read_through_on_miss: true,
                ..Default::default()
            },
        )
        .unwrap();

        let id = engine.create("g1", Vec::new()).await.unwrap();
        store.set_available(false);
        engine.delete("g1", &id).await.unwrap();
        engine.wait_for_background_writes().await;
        store.set_available(true);

        assert_eq!(engine.drift_stats().failed, 1);
        assert_eq!(engine.tombstones.read().await.len(), 1);
        // The node is still in the store but must not come back
        assert!(store.node_exists("g1", &id).await.unwrap());
        assert_eq!(engine.get_cardinality("g1", &id).await.unwrap(), 0);
        assert!(engine.add_member("g1", &id, "m1").await.is_err());
    }

    #[tokio::test]
    async fn test_create_collapses_duplicate_members() {
        let store = Arc::new(InMemoryGraphStore::new());
        for id in ["m1", "m2"] {
            store.insert_node("g1", id, NodeSpec::new("concept")).await;
        }
        let engine = SequenceEngine::new(store.clone());

        let id = engine
            .create("g1", vec!["m1".into(), "m2".into(), "m1".into()])
            .await
            .unwrap();
        engine.wait_for_background_writes().await;

        assert_eq!(engine.get_members("g1", &id).await.unwrap(), vec!["m1", "m2"]);
        assert_eq!(store.relations_from("g1", &id).await.len(), 2);
    }
}
