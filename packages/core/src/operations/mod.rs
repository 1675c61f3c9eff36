//! Store Write Operations
//!
//! This module holds the machinery that runs store mutations behind the
//! membership cache:
//!
//! - [`BackgroundWriter`] - spawns writes, retries them, and reports drift
//! - [`StoreWrite`] - the mutations the sequence engine queues

pub mod background_writes;

pub use background_writes::{BackgroundWriter, DriftStats, StoreWrite, WritePolicy};
