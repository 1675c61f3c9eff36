//! In-Memory GraphStore
//!
//! Reference implementation of [`GraphStore`] that keeps nodes and relationships in
//! process memory. It behaves like a strict graph backend (relationships require
//! both endpoints to exist) and supports fault injection, so the engine's
//! failure paths can be exercised without a database.

use super::error::StoreError;
use super::graph_store::{order_collection_members, GraphStore};
use crate::models::{MemberIndex, MembershipRelation, NodeSpec};
use anyhow::Result;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Default)]
struct GraphData {
    nodes: HashMap<String, NodeSpec>,
    /// Relationships in creation order
    relations: Vec<MembershipRelation>,
}

impl GraphData {
    fn require_node(&self, graph_id: &str, node_id: &str) -> Result<(), StoreError> {
        if self.nodes.contains_key(node_id) {
            Ok(())
        } else {
            Err(StoreError::node_not_found(graph_id, node_id))
        }
    }

    fn upsert_relation(&mut self, relation: MembershipRelation) {
        match self.relations.iter_mut().find(|r| {
            r.from_id == relation.from_id
                && r.relation_type == relation.relation_type
                && r.to_id == relation.to_id
        }) {
            Some(existing) => existing.metadata = relation.metadata,
            None => self.relations.push(relation),
        }
    }
}

/// Number of successful write calls per operation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreWriteCounts {
    pub add_node: u64,
    pub add_relation: u64,
    pub delete_relation: u64,
    pub create_collection: u64,
    pub delete_collection: u64,
}

/// GraphStore backed by process memory
#[derive(Debug)]
pub struct InMemoryGraphStore {
    graphs: RwLock<HashMap<String, GraphData>>,
    available: AtomicBool,
    latency: Option<Duration>,
    add_node_calls: AtomicU64,
    add_relation_calls: AtomicU64,
    delete_relation_calls: AtomicU64,
    create_collection_calls: AtomicU64,
    delete_collection_calls: AtomicU64,
}

impl Default for InMemoryGraphStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryGraphStore {
    /// Create an empty, available store
    pub fn new() -> Self {
        Self {
            graphs: RwLock::new(HashMap::new()),
            available: AtomicBool::new(true),
            latency: None,
            add_node_calls: AtomicU64::new(0),
            add_relation_calls: AtomicU64::new(0),
            delete_relation_calls: AtomicU64::new(0),
            create_collection_calls: AtomicU64::new(0),
            delete_collection_calls: AtomicU64::new(0),
        }
    }

    /// Create a store that sleeps for `latency` before answering every call
    ///
    /// Useful for checking that callers are not blocked on background writes.
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency: Some(latency),
            ..Self::new()
        }
    }

    /// Toggle availability; while unavailable every call fails with
    /// `StoreError::Unavailable`
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::Release);
    }

    /// Insert a node under a caller-chosen id (fixture helper)
    pub async fn insert_node(&self, graph_id: &str, node_id: &str, node: NodeSpec) {
        let mut graphs = self.graphs.write().await;
        graphs
            .entry(graph_id.to_string())
            .or_default()
            .nodes
            .insert(node_id.to_string(), node);
    }

    /// Remove a node and every relationship touching it
    pub async fn remove_node(&self, graph_id: &str, node_id: &str) -> bool {
        let mut graphs = self.graphs.write().await;
        let Some(graph) = graphs.get_mut(graph_id) else {
            return false;
        };
        graph
            .relations
            .retain(|r| r.from_id != node_id && r.to_id != node_id);
        graph.nodes.remove(node_id).is_some()
    }

    /// Relationships leaving `from_id`, in creation order
    pub async fn relations_from(&self, graph_id: &str, from_id: &str) -> Vec<MembershipRelation> {
        let graphs = self.graphs.read().await;
        graphs
            .get(graph_id)
            .map(|g| {
                g.relations
                    .iter()
                    .filter(|r| r.from_id == from_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Number of nodes stored in a graph
    pub async fn node_count(&self, graph_id: &str) -> usize {
        let graphs = self.graphs.read().await;
        graphs.get(graph_id).map(|g| g.nodes.len()).unwrap_or(0)
    }

    /// Successful write calls so far
    pub fn write_counts(&self) -> StoreWriteCounts {
        StoreWriteCounts {
            add_node: self.add_node_calls.load(Ordering::Acquire),
            add_relation: self.add_relation_calls.load(Ordering::Acquire),
            delete_relation: self.delete_relation_calls.load(Ordering::Acquire),
            create_collection: self.create_collection_calls.load(Ordering::Acquire),
            delete_collection: self.delete_collection_calls.load(Ordering::Acquire),
        }
    }

    async fn enter(&self, operation: &str) -> Result<()> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if self.available.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(StoreError::unavailable(format!("{} rejected: store offline", operation)).into())
        }
    }
}

#[async_trait]
impl GraphStore for InMemoryGraphStore {
    async fn add_node(&self, graph_id: &str, node: NodeSpec) -> Result<String> {
        self.enter("add_node").await?;

        let id = Uuid::new_v4().to_string();
        let mut graphs = self.graphs.write().await;
        graphs
            .entry(graph_id.to_string())
            .or_default()
            .nodes
            .insert(id.clone(), node);
        self.add_node_calls.fetch_add(1, Ordering::AcqRel);
        Ok(id)
    }

    async fn node_exists(&self, graph_id: &str, node_id: &str) -> Result<bool> {
        self.enter("node_exists").await?;

        let graphs = self.graphs.read().await;
        Ok(graphs
            .get(graph_id)
            .is_some_and(|g| g.nodes.contains_key(node_id)))
    }

    async fn add_relation(
        &self,
        graph_id: &str,
        from_id: &str,
        relation_type: &str,
        to_id: &str,
        metadata: Map<String, Value>,
    ) -> Result<()> {
        self.enter("add_relation").await?;

        let mut graphs = self.graphs.write().await;
        let graph = graphs
            .get_mut(graph_id)
            .ok_or_else(|| StoreError::node_not_found(graph_id, from_id))?;
        graph.require_node(graph_id, from_id)?;
        graph.require_node(graph_id, to_id)?;
        graph.upsert_relation(MembershipRelation {
            from_id: from_id.to_string(),
            relation_type: relation_type.to_string(),
            to_id: to_id.to_string(),
            metadata,
        });
        self.add_relation_calls.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    async fn delete_relation(
        &self,
        graph_id: &str,
        from_id: &str,
        relation_type: &str,
        to_id: &str,
    ) -> Result<()> {
        self.enter("delete_relation").await?;

        let mut graphs = self.graphs.write().await;
        if let Some(graph) = graphs.get_mut(graph_id) {
            graph.relations.retain(|r| {
                !(r.from_id == from_id && r.relation_type == relation_type && r.to_id == to_id)
            });
        }
        self.delete_relation_calls.fetch_add(1, Ordering::AcqRel);
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
        self.enter("create_collection").await?;

        let mut graphs = self.graphs.write().await;
        let graph = graphs
            .get_mut(graph_id)
            .ok_or_else(|| StoreError::node_not_found(graph_id, collection_id))?;

        // All-or-nothing: check every endpoint before writing any edge
        graph.require_node(graph_id, collection_id)?;
        for member in &members {
            graph.require_node(graph_id, member)?;
        }

        for (index, member) in members.into_iter().enumerate() {
            let mut metadata = Map::new();
            metadata.insert(index_property.to_string(), Value::from(index as u64));
            graph.upsert_relation(MembershipRelation {
                from_id: collection_id.to_string(),
                relation_type: relation_type.to_string(),
                to_id: member,
                metadata,
            });
        }
        self.create_collection_calls.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    async fn delete_collection(&self, graph_id: &str, collection_id: &str) -> Result<()> {
        self.enter("delete_collection").await?;

        let mut graphs = self.graphs.write().await;
        if let Some(graph) = graphs.get_mut(graph_id) {
            graph.relations.retain(|r| r.from_id != collection_id);
            graph.nodes.remove(collection_id);
        }
        self.delete_collection_calls.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    async fn get_collection_members(
        &self,
        graph_id: &str,
        collection_id: &str,
        relation_type: &str,
        index_property: &str,
    ) -> Result<Vec<(String, MemberIndex)>> {
        self.enter("get_collection_members").await?;

        let graphs = self.graphs.read().await;
        let Some(graph) = graphs.get(graph_id) else {
            return Ok(Vec::new());
        };

        let mut indexed = Vec::new();
        let mut unindexed = Vec::new();
        for relation in graph
            .relations
            .iter()
            .filter(|r| r.from_id == collection_id && r.relation_type == relation_type)
        {
            match relation.metadata.get(index_property).and_then(Value::as_u64) {
                Some(index) => indexed.push((relation.to_id.clone(), index)),
                None => unindexed.push(relation.to_id.clone()),
            }
        }

        Ok(order_collection_members(indexed, unindexed))
    }
}
