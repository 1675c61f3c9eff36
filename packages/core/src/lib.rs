//! Sequence Core
//!
//! Ordered, stable-indexed collections ("sequences") of node references inside a
//! graph, kept in a fast in-memory membership cache and persisted asynchronously
//! to a graph store as membership relationships.
//!
//! # Architecture
//!
//! - **Cache-first**: a change is committed once the membership cache accepts it
//! - **Background persistence**: relationship writes run off the caller's path;
//!   failures surface as drift (logs, counters, events) rather than errors
//! - **Stable indices**: a member keeps the index it was admitted with; indices
//!   are never reused within a sequence
//!
//! # Modules
//!
//! - [`models`] - Keys, node specs and relationship records
//! - [`db`] - `GraphStore` seam, in-memory and SurrealDB backends, lifecycle events
//! - [`services`] - `SequenceEngine`, membership cache, reference validator
//! - [`operations`] - Background store writer with retry and drift tracking
//! - [`config`] - Engine configuration

pub mod config;
pub mod db;
pub mod models;
pub mod operations;
pub mod services;

// Re-export commonly used types
pub use config::SequenceConfig;
pub use models::*;
pub use services::*;
