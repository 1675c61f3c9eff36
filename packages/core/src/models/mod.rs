//! Data Models
//!
//! This module contains the data structures shared by the sequence core:
//!
//! - `SequenceKey` - Cache/identity key of a sequence within a graph
//! - `NodeSpec` - Description of a node handed to the graph store
//! - `MembershipRelation` - A persisted collection → member edge
//! - Relation and property constants used on every membership edge

mod sequence;

pub use sequence::{
    MemberIndex, MembershipRelation, NodeSpec, SequenceKey, SequenceSnapshot,
    IL_SEQUENCE_INDEX, SEQUENCE_MEMBERSHIP, SEQUENCE_NODE_TYPE,
};
