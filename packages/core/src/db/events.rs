//! Sequence Lifecycle Events
//!
//! This module defines the lifecycle notifications emitted by the sequence engine
//! and the `EventSink` seam through which they leave the core.
//!
//! # Architecture
//!
//! Sinks are fire-and-forget: `emit` returns nothing and must never block or fail
//! the protocol. Three sinks are provided:
//!
//! - `NoopEventSink` - discards everything
//! - `BroadcastEventSink` - tokio broadcast channel, any number of subscribers
//! - `TracingEventSink` - one JSON lifecycle envelope per event on the
//!   `object_lifecycle` tracing target
//!
//! `PersistenceFailed` is how cache/store drift becomes observable: it is emitted
//! whenever a background store write gives up.

use crate::models::MemberIndex;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Events emitted by the sequence engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SequenceEvent {
    /// A sequence became readable in the cache
    #[serde(rename = "sequence:created", rename_all = "camelCase")]
    SequenceCreated {
        graph_id: String,
        sequence_id: String,
        members: Vec<String>,
    },

    /// A new member was appended
    #[serde(rename = "sequence:member_added", rename_all = "camelCase")]
    MemberAdded {
        graph_id: String,
        sequence_id: String,
        member_id: String,
        index: MemberIndex,
    },

    /// A member was removed
    #[serde(rename = "sequence:member_removed", rename_all = "camelCase")]
    MemberRemoved {
        graph_id: String,
        sequence_id: String,
        member_id: String,
    },

    /// A sequence was dropped from the cache and queued for store deletion
    #[serde(rename = "sequence:deleted", rename_all = "camelCase")]
    SequenceDeleted {
        graph_id: String,
        sequence_id: String,
    },

    /// A background store write failed; cache and store have drifted
    #[serde(rename = "sequence:persistence_failed", rename_all = "camelCase")]
    PersistenceFailed {
        graph_id: String,
        sequence_id: String,
        operation: String,
        error: String,
    },
}

impl SequenceEvent {
    /// String identifier of the event kind
    pub fn event_type(&self) -> &'static str {
        match self {
            SequenceEvent::SequenceCreated { .. } => "sequence:created",
            SequenceEvent::MemberAdded { .. } => "sequence:member_added",
            SequenceEvent::MemberRemoved { .. } => "sequence:member_removed",
            SequenceEvent::SequenceDeleted { .. } => "sequence:deleted",
            SequenceEvent::PersistenceFailed { .. } => "sequence:persistence_failed",
        }
    }

    /// Sequence the event is about
    pub fn sequence_id(&self) -> &str {
        match self {
            SequenceEvent::SequenceCreated { sequence_id, .. }
            | SequenceEvent::MemberAdded { sequence_id, .. }
            | SequenceEvent::MemberRemoved { sequence_id, .. }
            | SequenceEvent::SequenceDeleted { sequence_id, .. }
            | SequenceEvent::PersistenceFailed { sequence_id, .. } => sequence_id,
        }
    }

    /// Event fields as a JSON map, without the type tag
    pub fn payload(&self) -> Map<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(mut map)) => {
                map.remove("type");
                map
            }
            _ => Map::new(),
        }
    }
}

/// Receiver of lifecycle notifications
///
/// Implementations must return quickly and swallow their own failures.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: SequenceEvent);
}

/// Sink that discards every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopEventSink;

impl EventSink for NoopEventSink {
    fn emit(&self, _event: SequenceEvent) {}
}

/// Sink that fans events out over a tokio broadcast channel
#[derive(Debug, Clone)]
pub struct BroadcastEventSink {
    tx: broadcast::Sender<SequenceEvent>,
}

impl BroadcastEventSink {
    /// Create a sink whose channel buffers up to `capacity` events per subscriber
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SequenceEvent> {
        self.tx.subscribe()
    }
}

impl EventSink for BroadcastEventSink {
    fn emit(&self, event: SequenceEvent) {
        // No subscribers is not an error
        let _ = self.tx.send(event);
    }
}

/// Lifecycle event id written into every envelope
pub const LIFECYCLE_EVENT_ID: &str = "BE_OBJECT_LIFECYCLE";

/// Sink that writes one JSON lifecycle envelope per event to the log
///
/// Envelope shape: `{ eid, ver, ets, mid, edata: { type, ...payload } }`.
/// `mid` is fixed per sink instance so one process's events can be correlated.
#[derive(Debug, Clone)]
pub struct TracingEventSink {
    mid: String,
}

impl Default for TracingEventSink {
    fn default() -> Self {
        Self::new()
    }
}

impl TracingEventSink {
    pub fn new() -> Self {
        Self {
            mid: format!("LP.{}.{}", Utc::now().timestamp_millis(), Uuid::new_v4()),
        }
    }

    /// Build the envelope that `emit` logs
    pub fn envelope(&self, event: &SequenceEvent) -> Value {
        let mut edata = event.payload();
        edata.insert("type".to_string(), json!(event.event_type()));
        json!({
            "eid": LIFECYCLE_EVENT_ID,
            "ver": "2.0",
            "ets": Utc::now().timestamp_millis(),
            "mid": self.mid,
            "edata": edata,
        })
    }
}

impl EventSink for TracingEventSink {
    fn emit(&self, event: SequenceEvent) {
        let envelope = self.envelope(&event);
        tracing::info!(target: "object_lifecycle", "{}", envelope);
    }
}
