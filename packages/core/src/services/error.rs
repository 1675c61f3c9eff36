//! Service Layer Error Types
//!
//! This module defines the errors reported by the membership cache and the
//! sequence engine. Every engine operation returns `Result<_, SequenceError>`;
//! each variant carries a stable machine code and a client/server classification
//! for whatever envelope layer sits on top.

use crate::models::SequenceKey;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Who is at fault for a failed request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResponseCode {
    ClientError,
    ServerError,
}

/// Membership cache errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// No cache entry exists for the key
    #[error("Sequence not found in cache: {0}")]
    SequenceNotFound(SequenceKey),

    /// The entry was dropped or replaced while a writer was waiting on it
    #[error("Sequence {0} was dropped during the update")]
    SequenceRetired(SequenceKey),
}

/// Sequence engine errors
#[derive(Error, Debug)]
pub enum SequenceError {
    /// A client-supplied required field is absent or blank
    #[error("Required parameters are missing for {operation}: {}", .missing.join(", "))]
    MissingParameters {
        operation: &'static str,
        missing: Vec<&'static str>,
    },

    /// One or more candidate members do not exist in the graph
    #[error("Member ids are invalid: {}", .missing.join(", "))]
    InvalidMembers { missing: Vec<String> },

    /// The cache refused the new member (unknown sequence or concurrent drop)
    #[error("Failed to add member '{member_id}' to sequence '{sequence_id}': {source}")]
    MemberAddFailed {
        sequence_id: String,
        member_id: String,
        #[source]
        source: CacheError,
    },

    /// The graph store failed on the synchronous path
    #[error("Graph store unavailable: {context}")]
    StoreUnavailable {
        context: String,
        #[source]
        source: anyhow::Error,
    },

    /// Unanticipated failure, wrapped with its original cause
    #[error("Unknown sequence error: {context}")]
    Unknown {
        context: String,
        #[source]
        source: anyhow::Error,
    },
}

impl SequenceError {
    /// Create a missing parameters error
    pub fn missing_parameters(operation: &'static str, missing: Vec<&'static str>) -> Self {
        Self::MissingParameters { operation, missing }
    }

    /// Create an invalid members error
    pub fn invalid_members(missing: Vec<String>) -> Self {
        Self::InvalidMembers { missing }
    }

    /// Create a member add failed error
    pub fn member_add_failed(
        sequence_id: impl Into<String>,
        member_id: impl Into<String>,
        source: CacheError,
    ) -> Self {
        Self::MemberAddFailed {
            sequence_id: sequence_id.into(),
            member_id: member_id.into(),
            source,
        }
    }

    /// Create a store unavailable error
    pub fn store_unavailable(context: impl Into<String>, source: anyhow::Error) -> Self {
        Self::StoreUnavailable {
            context: context.into(),
            source,
        }
    }

    /// Create an unknown error
    pub fn unknown(context: impl Into<String>, source: impl Into<anyhow::Error>) -> Self {
        Self::Unknown {
            context: context.into(),
            source: source.into(),
        }
    }

    /// Stable machine-readable error code
    pub fn code(&self) -> &'static str {
        match self {
            SequenceError::MissingParameters { .. } => "ERR_GRAPH_SEQUENCE_MISSING_REQ_PARAMS",
            SequenceError::InvalidMembers { .. } => "ERR_GRAPH_CREATE_SEQUENCE_INVALID_MEMBERIDS",
            SequenceError::MemberAddFailed { .. } => "ERR_GRAPH_ADD_SEQUENCE_MEMBER_UNKNOWN_ERROR",
            SequenceError::StoreUnavailable { .. } => "ERR_GRAPH_STORE_UNAVAILABLE",
            SequenceError::Unknown { .. } => "ERR_GRAPH_SEQUENCE_UNKNOWN_ERROR",
        }
    }

    /// Whether the caller or the server is at fault
    pub fn response_code(&self) -> ResponseCode {
        match self {
            SequenceError::MissingParameters { .. }
            | SequenceError::InvalidMembers { .. }
            | SequenceError::MemberAddFailed { .. } => ResponseCode::ClientError,
            SequenceError::StoreUnavailable { .. } | SequenceError::Unknown { .. } => {
                ResponseCode::ServerError
            }
        }
    }
}
