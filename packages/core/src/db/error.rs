//! Graph Store Error Types
//!
//! This module defines the error classification shared by `GraphStore` backends.
//! Backends return `anyhow::Result`; wrapping a `StoreError` inside lets the
//! service layer tell "the node is not there" apart from "the store could not answer".

use thiserror::Error;

/// Graph store operation errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Referenced node does not exist in the graph
    #[error("Node not found in graph '{graph_id}': {node_id}")]
    NodeNotFound { graph_id: String, node_id: String },

    /// Store could not be reached or refused the request
    #[error("Graph store unavailable: {0}")]
    Unavailable(String),

    /// Backend-specific failure with context
    #[error("Graph store operation failed: {context}")]
    Backend { context: String },
}

impl StoreError {
    /// Create a node not found error
    pub fn node_not_found(graph_id: impl Into<String>, node_id: impl Into<String>) -> Self {
        Self::NodeNotFound {
            graph_id: graph_id.into(),
            node_id: node_id.into(),
        }
    }

    /// Create an unavailable error
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    /// Create a backend error with context
    pub fn backend(context: impl Into<String>) -> Self {
        Self::Backend {
            context: context.into(),
        }
    }

    /// Find a `StoreError` anywhere in an `anyhow` error chain
    pub fn find_in(err: &anyhow::Error) -> Option<&StoreError> {
        err.chain().find_map(|cause| cause.downcast_ref::<StoreError>())
    }
}
