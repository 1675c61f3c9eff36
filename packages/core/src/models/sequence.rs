//! Sequence Data Structures
//!
//! A sequence is a node in a graph that owns an ordered list of member node ids.
//! Membership is materialized twice:
//!
//! - As `SEQUENCE_MEMBERSHIP` relationships in the graph store, each tagged with the
//!   member's position under the `IL_SEQUENCE_INDEX` property
//! - As a cache entry keyed by [`SequenceKey`] for ordered, low-latency reads
//!
//! # Index Semantics
//!
//! Indices are zero-based and assigned once, when a member is admitted. They are never
//! renumbered when other members are removed, so an index is a stable historical tag
//! rather than a live rank. Current order always comes from the cache.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Relationship type used for every collection → member edge
pub const SEQUENCE_MEMBERSHIP: &str = "SEQUENCE_MEMBERSHIP";

/// Relation metadata key holding the member's positional index
pub const IL_SEQUENCE_INDEX: &str = "IL_SEQUENCE_INDEX";

/// System node type of a sequence's backing node
pub const SEQUENCE_NODE_TYPE: &str = "SEQUENCE";

/// Stable positional index of a member within a sequence
pub type MemberIndex = u64;

/// Identity of a sequence: the graph it lives in plus its store-assigned id
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SequenceKey {
    pub graph_id: String,
    pub sequence_id: String,
}

impl SequenceKey {
    pub fn new(graph_id: impl Into<String>, sequence_id: impl Into<String>) -> Self {
        Self {
            graph_id: graph_id.into(),
            sequence_id: sequence_id.into(),
        }
    }
}

impl fmt::Display for SequenceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.graph_id, self.sequence_id)
    }
}

/// Node description passed to `GraphStore::add_node`
///
/// The store assigns the id; `node_type` carries the system type and `metadata`
/// any additional properties.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeSpec {
    pub node_type: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl NodeSpec {
    /// Create a spec for an arbitrary node type with empty metadata
    pub fn new(node_type: impl Into<String>) -> Self {
        Self {
            node_type: node_type.into(),
            metadata: Map::new(),
        }
    }

    /// Spec for the backing node of a new sequence
    pub fn sequence() -> Self {
        Self::new(SEQUENCE_NODE_TYPE)
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// A persisted, directed edge from a collection node to a member node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MembershipRelation {
    pub from_id: String,
    pub relation_type: String,
    pub to_id: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl MembershipRelation {
    /// Index recorded on the edge under `IL_SEQUENCE_INDEX`, if present
    pub fn index(&self) -> Option<MemberIndex> {
        self.metadata.get(IL_SEQUENCE_INDEX).and_then(Value::as_u64)
    }
}

/// Point-in-time copy of one cached sequence
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SequenceSnapshot {
    pub key: SequenceKey,
    /// Members in current order, paired with their stable index
    pub members: Vec<(String, MemberIndex)>,
}

impl SequenceSnapshot {
    pub fn member_ids(&self) -> Vec<String> {
        self.members.iter().map(|(id, _)| id.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sequence_key_display() {
        let key = SequenceKey::new("domain", "seq-1");
        assert_eq!(key.to_string(), "domain/seq-1");
    }

    #[test]
    fn test_sequence_key_serialization_contract() {
        let key = SequenceKey::new("g1", "c1");
        let json = serde_json::to_value(&key).unwrap();
        assert_eq!(json["graphId"], "g1");
        assert_eq!(json["sequenceId"], "c1");
    }

    #[test]
    fn test_node_spec_sequence_type() {
        let spec = NodeSpec::sequence().with_metadata("name", json!("chapter-1"));
        assert_eq!(spec.node_type, SEQUENCE_NODE_TYPE);
        assert_eq!(spec.metadata["name"], "chapter-1");
    }

    #[test]
    fn test_relation_index_reads_metadata() {
        let mut metadata = Map::new();
        metadata.insert(IL_SEQUENCE_INDEX.to_string(), json!(4));
        let relation = MembershipRelation {
            from_id: "c1".to_string(),
            relation_type: SEQUENCE_MEMBERSHIP.to_string(),
            to_id: "m1".to_string(),
            metadata,
        };
        assert_eq!(relation.index(), Some(4));

        let untagged = MembershipRelation {
            metadata: Map::new(),
            ..relation
        };
        assert_eq!(untagged.index(), None);
    }
}
