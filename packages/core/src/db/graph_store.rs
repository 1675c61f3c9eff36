//! GraphStore Trait - Storage Abstraction for Sequences
//!
//! This module defines the `GraphStore` trait through which the sequence core
//! persists nodes and membership relationships. The trait lets the engine run
//! against any backend (embedded SurrealDB, a remote graph database, or the
//! in-memory reference store) without changing protocol logic.
//!
//! # Design Decisions
//!
//! 1. **Async-First**: All methods are async so both embedded and network
//!    backends fit behind the same interface
//! 2. **Graph-Scoped**: Every call names the graph (namespace) it operates on
//! 3. **Error Handling**: Uses `anyhow::Result`; backends wrap a
//!    [`StoreError`](super::StoreError) in the chain so callers can classify failures
//! 4. **Concurrency**: Implementations must be `Send + Sync` and safe to call from
//!    many tasks at once; the engine never serializes store calls itself
//!
//! # Examples
//!
//! ```rust
//! use sequence_core::db::{GraphStore, InMemoryGraphStore};
//! use sequence_core::models::NodeSpec;
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() -> anyhow::Result<()> {
//! let store: Arc<dyn GraphStore> = Arc::new(InMemoryGraphStore::new());
//! let id = store.add_node("domain", NodeSpec::new("concept")).await?;
//! assert!(store.node_exists("domain", &id).await?);
//! # Ok(())
//! # }
//! ```

use crate::models::{MemberIndex, NodeSpec};
use anyhow::Result;
use async_trait::async_trait;
use serde_json::{Map, Value};

/// Abstraction layer for graph persistence used by the sequence core
///
/// # Method Categories
///
/// - **Nodes**: `add_node`, `node_exists`
/// - **Relations**: `add_relation`, `delete_relation`
/// - **Collections**: `create_collection`, `delete_collection`, `get_collection_members`
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Create a node and return the id the store assigned to it
    async fn add_node(&self, graph_id: &str, node: NodeSpec) -> Result<String>;

    /// Check whether a node exists in the graph
    ///
    /// # Returns
    ///
    /// - `Ok(true)` / `Ok(false)` for a definitive answer
    /// - `Err(_)` if the store could not answer (transport/backend failure)
    async fn node_exists(&self, graph_id: &str, node_id: &str) -> Result<bool>;

    /// Create a single typed relationship carrying `metadata` as edge properties
    async fn add_relation(
        &self,
        graph_id: &str,
        from_id: &str,
        relation_type: &str,
        to_id: &str,
        metadata: Map<String, Value>,
    ) -> Result<()>;

    /// Delete a typed relationship; deleting a missing relationship succeeds
    async fn delete_relation(
        &self,
        graph_id: &str,
        from_id: &str,
        relation_type: &str,
        to_id: &str,
    ) -> Result<()>;

    /// Bulk-create one relationship per member, tagging each edge with its
    /// position in `members` under `index_property`
    async fn create_collection(
        &self,
        graph_id: &str,
        collection_id: &str,
        relation_type: &str,
        index_property: &str,
        members: Vec<String>,
    ) -> Result<()>;

    /// Delete a collection node together with all of its outgoing relationships
    async fn delete_collection(&self, graph_id: &str, collection_id: &str) -> Result<()>;

    /// List the members linked from a collection, ordered by the index stored
    /// under `index_property`
    ///
    /// Used to rebuild a cold cache entry. Edges without an index come last and
    /// are numbered past the highest stored index, in creation order.
    async fn get_collection_members(
        &self,
        graph_id: &str,
        collection_id: &str,
        relation_type: &str,
        index_property: &str,
    ) -> Result<Vec<(String, MemberIndex)>>;
}

/// Order collection edges by stored index; unindexed edges follow in the order given
pub(crate) fn order_collection_members(
    mut indexed: Vec<(String, MemberIndex)>,
    unindexed: Vec<String>,
) -> Vec<(String, MemberIndex)> {
    // Stable sort keeps creation order among equal indices
    indexed.sort_by_key(|(_, index)| *index);
    let mut next = indexed.last().map(|(_, index)| index + 1).unwrap_or(0);
    for member in unindexed {
        indexed.push((member, next));
        next += 1;
    }
    indexed
}
