//! Sequence Services
//!
//! - `SequenceEngine` - Lifecycle protocol for sequences (create, add, remove, delete, reads)
//! - `MembershipCache` - Per-sequence ordered membership, the fast path of record
//! - `ReferenceValidator` - Concurrent member existence checks against the graph store
//!
//! The engine coordinates the cache, the validator and the background writer,
//! committing to the cache first and persisting relationships behind it.

pub mod error;
pub mod membership_cache;
pub mod reference_validator;
pub mod sequence_engine;

pub use error::{CacheError, ResponseCode, SequenceError};
pub use membership_cache::{AppendOutcome, CacheStats, InMemoryMembershipCache, MembershipCache};
pub use reference_validator::{ReferenceValidator, Validation};
pub use sequence_engine::SequenceEngine;
