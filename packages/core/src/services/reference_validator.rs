//! Reference Validator
//!
//! Checks that candidate member ids exist as nodes in a graph before they are
//! admitted to a sequence. Existence checks run concurrently in bounded batches.
//!
//! A definitive "not found" and a failed lookup are kept apart: missing ids are
//! reported in [`Validation::missing`], while a transport/backend failure aborts
//! validation with `SequenceError::StoreUnavailable` (fail closed).

use super::error::SequenceError;
use crate::db::{GraphStore, StoreError};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::task::JoinSet;

/// Outcome of a completed validation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Validation {
    /// Ids with no node in the graph, in input order
    pub missing: Vec<String>,
}

impl Validation {
    pub fn is_valid(&self) -> bool {
        self.missing.is_empty()
    }
}

/// Verifies member references against a `GraphStore`
pub struct ReferenceValidator {
    store: Arc<dyn GraphStore>,
    concurrency: usize,
}

impl ReferenceValidator {
    /// Create a validator running at most `concurrency` checks at once
    pub fn new(store: Arc<dyn GraphStore>, concurrency: usize) -> Self {
        Self {
            store,
            concurrency: concurrency.max(1),
        }
    }

    /// True only if every id exists in `graph_id`
    pub async fn validate_all(&self, graph_id: &str, ids: &[String]) -> Result<bool, SequenceError> {
        Ok(self.check(graph_id, ids).await?.is_valid())
    }

    /// Check every distinct id and collect the missing ones
    pub async fn check(&self, graph_id: &str, ids: &[String]) -> Result<Validation, SequenceError> {
        let mut seen = HashSet::new();
        let distinct: Vec<&String> = ids.iter().filter(|id| seen.insert(id.as_str())).collect();

        let mut missing: Vec<(usize, String)> = Vec::new();

        for (batch_no, batch) in distinct.chunks(self.concurrency).enumerate() {
            let offset = batch_no * self.concurrency;
            let mut tasks = JoinSet::new();

            for (i, id) in batch.iter().enumerate() {
                let store = Arc::clone(&self.store);
                let graph = graph_id.to_string();
                let id = (*id).clone();
                tasks.spawn(async move {
                    let exists = store.node_exists(&graph, &id).await;
                    (offset + i, id, exists)
                });
            }

            let mut lookup_failure = None;
            while let Some(joined) = tasks.join_next().await {
                let (position, id, exists) = joined.map_err(|e| {
                    tracing::error!(graph_id, "Node existence check did not complete: {}", e);
                    SequenceError::unknown("node existence check did not complete", e)
                })?;

                match exists {
                    Ok(true) => {}
                    Ok(false) => missing.push((position, id)),
                    Err(e) => {
                        if matches!(StoreError::find_in(&e), Some(StoreError::NodeNotFound { .. })) {
                            missing.push((position, id));
                        } else {
                            tracing::warn!(graph_id, node_id = %id, "Node existence check failed: {:#}", e);
                            lookup_failure.get_or_insert((id, e));
                        }
                    }
                }
            }

            if let Some((id, e)) = lookup_failure {
                return Err(SequenceError::store_unavailable(
                    format!("failed to check node '{}' in graph '{}'", id, graph_id),
                    e,
                ));
            }
        }

        missing.sort_by_key(|(position, _)| *position);
        let validation = Validation {
            missing: missing.into_iter().map(|(_, id)| id).collect(),
        };

        tracing::debug!(
            graph_id,
            checked = distinct.len(),
            missing = validation.missing.len(),
            "Validated member references"
        );
        Ok(validation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::InMemoryGraphStore;
    use crate::models::NodeSpec;

    async fn store_with(graph_id: &str, nodes: &[&str]) -> Arc<InMemoryGraphStore> {
        let store = Arc::new(InMemoryGraphStore::new());
        for id in nodes {
            store.insert_node(graph_id, id, NodeSpec::new("concept")).await;
        }
        store
    }

    fn ids(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[tokio::test]
    async fn test_all_present() {
        let store = store_with("g1", &["m1", "m2"]).await;
        let validator = ReferenceValidator::new(store, 4);
        assert!(validator.validate_all("g1", &ids(&["m1", "m2"])).await.unwrap());
    }

    #[tokio::test]
    async fn test_missing_reported_in_input_order() {
        let store = store_with("g1", &["m2"]).await;
        // Batch size 1 forces several batches
        let validator = ReferenceValidator::new(store, 1);

        let validation = validator
            .check("g1", &ids(&["x3", "m2", "x1", "x3"]))
            .await
            .unwrap();
        assert_eq!(validation.missing, ids(&["x3", "x1"]));
        assert!(!validation.is_valid());
    }

    #[tokio::test]
    async fn test_nodes_are_graph_scoped() {
        let store = store_with("g2", &["m1"]).await;
        let validator = ReferenceValidator::new(store, 8);
        assert!(!validator.validate_all("g1", &ids(&["m1"])).await.unwrap());
    }

    #[tokio::test]
    async fn test_transport_failure_is_not_not_found() {
        let store = store_with("g1", &["m1"]).await;
        store.set_available(false);
        let validator = ReferenceValidator::new(store, 8);

        let err = validator.validate_all("g1", &ids(&["m1"])).await.unwrap_err();
        assert!(matches!(err, SequenceError::StoreUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_empty_input_is_valid() {
        let store = store_with("g1", &[]).await;
        let validator = ReferenceValidator::new(store, 8);
        assert!(validator.validate_all("g1", &[]).await.unwrap());
    }
}
