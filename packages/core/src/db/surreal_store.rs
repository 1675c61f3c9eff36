//! SurrealGraphStore - GraphStore Implementation for SurrealDB Backend
//!
//! Persists sequence nodes and membership relationships in an embedded SurrealDB
//! instance (RocksDB on disk, or the in-memory engine for tests).
//!
//! # Layout
//!
//! - `seq_node` - one row per node: `uuid`, `graph_id`, `node_type`, `metadata`
//! - `seq_relation` - one row per edge: `graph_id`, `from_id`, `relation_type`,
//!   `to_id`, `metadata`, `created_at`
//!
//! Both tables are SCHEMALESS. Edges are plain rows keyed by their endpoints
//! rather than `RELATE` edges, since node ids are only unique within a graph.
//!
//! # Examples
//!
//! ```rust,no_run
//! use sequence_core::db::{GraphStore, SurrealGraphStore};
//! use sequence_core::models::NodeSpec;
//! use std::path::PathBuf;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store = SurrealGraphStore::open(PathBuf::from("./data/sequences.db")).await?;
//!     let id = store.add_node("domain", NodeSpec::sequence()).await?;
//!     assert!(store.node_exists("domain", &id).await?);
//!     Ok(())
//! }
//! ```

use super::error::StoreError;
use super::graph_store::{order_collection_members, GraphStore};
use crate::models::{MemberIndex, NodeSpec};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use surrealdb::engine::local::{Db, Mem, RocksDb};
use surrealdb::Surreal;
use uuid::Uuid;

/// Row shape returned when listing collection edges
#[derive(Debug, Deserialize)]
struct RelationRow {
    to_id: String,
    #[serde(default)]
    metadata: Value,
}

fn now_nanos() -> i64 {
    Utc::now().timestamp_nanos_opt().unwrap_or_default()
}

/// GraphStore backed by embedded SurrealDB
pub struct SurrealGraphStore {
    db: Arc<Surreal<Db>>,
}

impl SurrealGraphStore {
    /// Open (or create) a RocksDB-backed store at `db_path`
    ///
    /// # Errors
    ///
    /// Returns error if RocksDB cannot be opened or the schema cannot be defined.
    pub async fn open(db_path: PathBuf) -> Result<Self> {
        let db = Surreal::new::<RocksDb>(db_path)
            .await
            .context("Failed to initialize SurrealDB with RocksDB backend")?;
        Self::init(db).await
    }

    /// Create a store on the in-memory engine; contents are lost on drop
    pub async fn in_memory() -> Result<Self> {
        let db = Surreal::new::<Mem>(())
            .await
            .context("Failed to initialize in-memory SurrealDB")?;
        Self::init(db).await
    }

    async fn init(db: Surreal<Db>) -> Result<Self> {
        db.use_ns("sequences")
            .use_db("graph")
            .await
            .context("Failed to set namespace/database")?;

        db.query(
            "
            DEFINE TABLE IF NOT EXISTS seq_node SCHEMALESS;
            DEFINE TABLE IF NOT EXISTS seq_relation SCHEMALESS;
            ",
        )
        .await
        .and_then(|response| response.check())
        .context("Failed to define sequence tables")?;

        Ok(Self { db: Arc::new(db) })
    }

    /// Insert a node under a caller-chosen id
    pub async fn insert_node(&self, graph_id: &str, node_id: &str, node: NodeSpec) -> Result<()> {
        self.db
            .query(
                "CREATE seq_node CONTENT {
                    uuid: $uuid,
                    graph_id: $graph_id,
                    node_type: $node_type,
                    metadata: $metadata
                };",
            )
            .bind(("uuid", node_id.to_string()))
            .bind(("graph_id", graph_id.to_string()))
            .bind(("node_type", node.node_type))
            .bind(("metadata", Value::Object(node.metadata)))
            .await
            .and_then(|response| response.check())
            .with_context(|| format!("Failed to create node '{}' in graph '{}'", node_id, graph_id))?;
        Ok(())
    }

    /// Ids among `node_ids` that exist in the graph
    async fn existing_nodes(&self, graph_id: &str, node_ids: Vec<String>) -> Result<HashSet<String>> {
        let mut response = self
            .db
            .query("SELECT VALUE uuid FROM seq_node WHERE graph_id = $graph_id AND uuid INSIDE $ids;")
            .bind(("graph_id", graph_id.to_string()))
            .bind(("ids", node_ids))
            .await
            .context("Failed to query nodes")?;

        let found: Vec<String> = response
            .take(0)
            .context("Failed to extract node query results")?;
        Ok(found.into_iter().collect())
    }

    /// Fail with `StoreError::NodeNotFound` for the first id not in the graph
    async fn require_nodes(&self, graph_id: &str, node_ids: &[&str]) -> Result<()> {
        let ids: Vec<String> = node_ids.iter().map(|id| id.to_string()).collect();
        let found = self.existing_nodes(graph_id, ids).await?;
        match node_ids.iter().find(|id| !found.contains(**id)) {
            Some(missing) => Err(StoreError::node_not_found(graph_id, *missing).into()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl GraphStore for SurrealGraphStore {
    async fn add_node(&self, graph_id: &str, node: NodeSpec) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        self.insert_node(graph_id, &id, node).await?;
        Ok(id)
    }

    async fn node_exists(&self, graph_id: &str, node_id: &str) -> Result<bool> {
        let found = self
            .existing_nodes(graph_id, vec![node_id.to_string()])
            .await?;
        Ok(found.contains(node_id))
    }

    async fn add_relation(
        &self,
        graph_id: &str,
        from_id: &str,
        relation_type: &str,
        to_id: &str,
        metadata: Map<String, Value>,
    ) -> Result<()> {
        self.require_nodes(graph_id, &[from_id, to_id]).await?;

        // Replace any existing edge between the same endpoints
        let query = "
            BEGIN TRANSACTION;
            DELETE seq_relation WHERE graph_id = $graph_id AND from_id = $from_id
                AND relation_type = $relation_type AND to_id = $to_id;
            CREATE seq_relation CONTENT {
                graph_id: $graph_id,
                from_id: $from_id,
                relation_type: $relation_type,
                to_id: $to_id,
                metadata: $metadata,
                created_at: $created_at
            };
            COMMIT TRANSACTION;
        ";

        self.db
            .query(query)
            .bind(("graph_id", graph_id.to_string()))
            .bind(("from_id", from_id.to_string()))
            .bind(("relation_type", relation_type.to_string()))
            .bind(("to_id", to_id.to_string()))
            .bind(("metadata", Value::Object(metadata)))
            .bind(("created_at", now_nanos()))
            .await
            .and_then(|response| response.check())
            .context("Failed to create relation")?;
        Ok(())
    }

    async fn delete_relation(
        &self,
        graph_id: &str,
        from_id: &str,
        relation_type: &str,
        to_id: &str,
    ) -> Result<()> {
        self.db
            .query(
                "DELETE seq_relation WHERE graph_id = $graph_id AND from_id = $from_id
                    AND relation_type = $relation_type AND to_id = $to_id;",
            )
            .bind(("graph_id", graph_id.to_string()))
            .bind(("from_id", from_id.to_string()))
            .bind(("relation_type", relation_type.to_string()))
            .bind(("to_id", to_id.to_string()))
            .await
            .and_then(|response| response.check())
            .context("Failed to delete relation")?;
        Ok(())
    }

    async fn create_collection(
        &self,
        graph_id: &str,
        collection_id: &str,
        relation_type: &str,
        index_property: &str,
        members: Vec<String>,
    ) -> Result<()> {
        let mut endpoints: Vec<&str> = vec![collection_id];
        endpoints.extend(members.iter().map(String::as_str));
        self.require_nodes(graph_id, &endpoints).await?;

        let created_at = now_nanos();
        let rows: Vec<Value> = members
            .iter()
            .enumerate()
            .map(|(position, member)| {
                let mut metadata = Map::new();
                metadata.insert(index_property.to_string(), Value::from(position as u64));
                json!({
                    "graph_id": graph_id,
                    "from_id": collection_id,
                    "relation_type": relation_type,
                    "to_id": member,
                    "metadata": metadata,
                    "created_at": created_at + position as i64,
                })
            })
            .collect();

        let query = "
            BEGIN TRANSACTION;
            DELETE seq_relation WHERE graph_id = $graph_id AND from_id = $from_id
                AND relation_type = $relation_type AND to_id INSIDE $members;
            INSERT INTO seq_relation $rows;
            COMMIT TRANSACTION;
        ";

        self.db
            .query(query)
            .bind(("graph_id", graph_id.to_string()))
            .bind(("from_id", collection_id.to_string()))
            .bind(("relation_type", relation_type.to_string()))
            .bind(("members", members))
            .bind(("rows", rows))
            .await
            .and_then(|response| response.check())
            .context("Failed to create collection relations")?;
        Ok(())
    }

    async fn delete_collection(&self, graph_id: &str, collection_id: &str) -> Result<()> {
        let query = "
            BEGIN TRANSACTION;
            DELETE seq_relation WHERE graph_id = $graph_id AND from_id = $uuid;
            DELETE seq_node WHERE graph_id = $graph_id AND uuid = $uuid;
            COMMIT TRANSACTION;
        ";

        self.db
            .query(query)
            .bind(("graph_id", graph_id.to_string()))
            .bind(("uuid", collection_id.to_string()))
            .await
            .and_then(|response| response.check())
            .context("Failed to delete collection and relations")?;
        Ok(())
    }

    async fn get_collection_members(
        &self,
        graph_id: &str,
        collection_id: &str,
        relation_type: &str,
        index_property: &str,
    ) -> Result<Vec<(String, MemberIndex)>> {
        let mut response = self
            .db
            .query(
                "SELECT to_id, metadata, created_at FROM seq_relation
                    WHERE graph_id = $graph_id AND from_id = $from_id
                    AND relation_type = $relation_type
                    ORDER BY created_at ASC;",
            )
            .bind(("graph_id", graph_id.to_string()))
            .bind(("from_id", collection_id.to_string()))
            .bind(("relation_type", relation_type.to_string()))
            .await
            .context("Failed to query collection members")?;

        let rows: Vec<RelationRow> = response
            .take(0)
            .context("Failed to extract collection members")?;

        let mut indexed = Vec::new();
        let mut unindexed = Vec::new();
        for row in rows {
            match row.metadata.get(index_property).and_then(Value::as_u64) {
                Some(index) => indexed.push((row.to_id, index)),
                None => unindexed.push(row.to_id),
            }
        }
        Ok(order_collection_members(indexed, unindexed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{IL_SEQUENCE_INDEX, SEQUENCE_MEMBERSHIP};
    use tempfile::TempDir;

    async fn create_test_store() -> Result<(SurrealGraphStore, TempDir)> {
        let temp_dir = TempDir::new()?;
        let db_path = temp_dir.path().join("test_sequences.db");
        let store = SurrealGraphStore::open(db_path).await?;
        Ok((store, temp_dir))
    }

    fn indexed(index: u64) -> Map<String, Value> {
        let mut metadata = Map::new();
        metadata.insert(IL_SEQUENCE_INDEX.to_string(), Value::from(index));
        metadata
    }

    #[tokio::test]
    async fn test_add_node_and_exists() -> Result<()> {
        let (store, _temp_dir) = create_test_store().await?;

        let id = store.add_node("g1", NodeSpec::sequence()).await?;
        assert!(store.node_exists("g1", &id).await?);
        assert!(!store.node_exists("g2", &id).await?);
        assert!(!store.node_exists("g1", "missing").await?);

        Ok(())
    }

    #[tokio::test]
    async fn test_relation_requires_endpoints() -> Result<()> {
        let store = SurrealGraphStore::in_memory().await?;
        store.insert_node("g1", "c1", NodeSpec::sequence()).await?;

        let err = store
            .add_relation("g1", "c1", SEQUENCE_MEMBERSHIP, "ghost", indexed(0))
            .await
            .unwrap_err();
        assert!(matches!(
            StoreError::find_in(&err),
            Some(StoreError::NodeNotFound { .. })
        ));

        Ok(())
    }

    #[tokio::test]
    async fn test_collection_lifecycle() -> Result<()> {
        let (store, _temp_dir) = create_test_store().await?;
        store.insert_node("g1", "c1", NodeSpec::sequence()).await?;
        for id in ["m1", "m2", "m3"] {
            store.insert_node("g1", id, NodeSpec::new("concept")).await?;
        }

        store
            .create_collection(
                "g1",
                "c1",
                SEQUENCE_MEMBERSHIP,
                IL_SEQUENCE_INDEX,
                vec!["m2".into(), "m1".into()],
            )
            .await?;
        store
            .add_relation("g1", "c1", SEQUENCE_MEMBERSHIP, "m3", indexed(2))
            .await?;
        store
            .delete_relation("g1", "c1", SEQUENCE_MEMBERSHIP, "m2")
            .await?;

        let members = store
            .get_collection_members("g1", "c1", SEQUENCE_MEMBERSHIP, IL_SEQUENCE_INDEX)
            .await?;
        assert_eq!(members, vec![("m1".to_string(), 1), ("m3".to_string(), 2)]);

        store.delete_collection("g1", "c1").await?;
        assert!(!store.node_exists("g1", "c1").await?);
        assert!(store
            .get_collection_members("g1", "c1", SEQUENCE_MEMBERSHIP, IL_SEQUENCE_INDEX)
            .await?
            .is_empty());
        // Members themselves survive
        assert!(store.node_exists("g1", "m1").await?);

        Ok(())
    }
}
