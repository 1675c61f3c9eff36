//! Graph Store Layer
//!
//! This module holds everything the sequence core consumes from the outside:
//!
//! - `GraphStore` - abstract node/relation persistence
//! - `InMemoryGraphStore` - reference backend used by tests and benchmarks
//! - `SurrealGraphStore` - embedded SurrealDB backend (`surrealdb` feature)
//! - `EventSink` and `SequenceEvent` - fire-and-forget lifecycle notifications
//!
//! The store is an eventually-consistent durability layer behind the membership
//! cache; see `services::sequence_engine` for the protocol.

mod error;
pub mod events;
mod graph_store;
mod memory_store;
#[cfg(feature = "surrealdb")]
mod surreal_store;

pub use error::StoreError;
pub use events::{
    BroadcastEventSink, EventSink, NoopEventSink, SequenceEvent, TracingEventSink,
};
pub use graph_store::GraphStore;
pub use memory_store::{InMemoryGraphStore, StoreWriteCounts};
#[cfg(feature = "surrealdb")]
pub use surreal_store::SurrealGraphStore;
