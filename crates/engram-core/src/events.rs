//! Typed event stream
//!
//! Dual channel: an in-process `tokio::sync::broadcast` of [`EngineEvent`]
//! for subscribers inside the process, and a durable `events` table in the
//! storage layer for cross-process observers (at-least-once delivery).
//!
//! Every engine operation emits one of these events. The `type` set is
//! closed; adapters can rely on it exhaustively.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::memory::{Category, ConsolidationReport, MemoryType, Relationship};

/// Broadcast channel capacity - how many events buffer before slow
/// subscribers start lagging.
const EVENT_CHANNEL_CAPACITY: usize = 1024;

// ============================================================================
// EVENT TYPE
// ============================================================================

/// One change in a decay tick
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecayChange {
    pub id: i64,
    pub previous: f64,
    pub current: f64,
}

/// Every observable engine operation emits one of these.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum EngineEvent {
    // -- Memory lifecycle --
    MemoryCreated {
        id: i64,
        title: String,
        category: Category,
        memory_type: MemoryType,
        project: Option<String>,
        tags: Vec<String>,
        timestamp: DateTime<Utc>,
    },
    MemoryAccessed {
        id: i64,
        access_count: i64,
        timestamp: DateTime<Utc>,
    },
    MemoryUpdated {
        id: i64,
        fields: Vec<String>,
        timestamp: DateTime<Utc>,
    },
    MemoryDeleted {
        id: i64,
        title: String,
        timestamp: DateTime<Utc>,
    },

    // -- Consolidation & decay --
    ConsolidationComplete {
        report: ConsolidationReport,
        timestamp: DateTime<Utc>,
    },
    DecayTick {
        changes: Vec<DecayChange>,
        timestamp: DateTime<Utc>,
    },

    // -- Sessions --
    SessionStarted {
        id: String,
        project: Option<String>,
        timestamp: DateTime<Utc>,
    },
    SessionEnded {
        id: String,
        summary: Option<String>,
        timestamp: DateTime<Utc>,
    },

    // -- Worker --
    WorkerLightTick {
        activation_pruned: usize,
        timestamp: DateTime<Utc>,
    },
    WorkerMediumTick {
        links_discovered: usize,
        contradictions_found: usize,
        timestamp: DateTime<Utc>,
    },
    LinkDiscovered {
        source_id: i64,
        target_id: i64,
        relationship: Relationship,
        strength: f64,
        timestamp: DateTime<Utc>,
    },
    PredictiveConsolidation {
        reason: String,
        timestamp: DateTime<Utc>,
    },

    // -- Service lifecycle (emitted by the update/restart machinery) --
    UpdateStarted {
        version: String,
        timestamp: DateTime<Utc>,
    },
    UpdateComplete {
        version: String,
        timestamp: DateTime<Utc>,
    },
    UpdateFailed {
        error: String,
        timestamp: DateTime<Utc>,
    },
    ServerRestarting {
        timestamp: DateTime<Utc>,
    },
}

impl EngineEvent {
    /// The stable type string stored in the durable queue
    pub fn kind(&self) -> &'static str {
        match self {
            EngineEvent::MemoryCreated { .. } => "memory_created",
            EngineEvent::MemoryAccessed { .. } => "memory_accessed",
            EngineEvent::MemoryUpdated { .. } => "memory_updated",
            EngineEvent::MemoryDeleted { .. } => "memory_deleted",
            EngineEvent::ConsolidationComplete { .. } => "consolidation_complete",
            EngineEvent::DecayTick { .. } => "decay_tick",
            EngineEvent::SessionStarted { .. } => "session_started",
            EngineEvent::SessionEnded { .. } => "session_ended",
            EngineEvent::WorkerLightTick { .. } => "worker_light_tick",
            EngineEvent::WorkerMediumTick { .. } => "worker_medium_tick",
            EngineEvent::LinkDiscovered { .. } => "link_discovered",
            EngineEvent::PredictiveConsolidation { .. } => "predictive_consolidation",
            EngineEvent::UpdateStarted { .. } => "update_started",
            EngineEvent::UpdateComplete { .. } => "update_complete",
            EngineEvent::UpdateFailed { .. } => "update_failed",
            EngineEvent::ServerRestarting { .. } => "server_restarting",
        }
    }

    /// The `data` payload persisted into the durable queue
    pub fn payload(&self) -> serde_json::Value {
        match serde_json::to_value(self) {
            Ok(serde_json::Value::Object(mut obj)) => {
                obj.remove("data").unwrap_or(serde_json::Value::Null)
            }
            _ => serde_json::Value::Null,
        }
    }

    /// Serialize to the `{type, timestamp, data}` wire shape
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

// ============================================================================
// DURABLE QUEUE ROW
// ============================================================================

/// One row of the durable cross-process event queue
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredEvent {
    pub id: i64,
    pub event_type: String,
    pub data: serde_json::Value,
    pub timestamp: DateTime<Utc>,
    pub processed: bool,
}

// ============================================================================
// IN-PROCESS BUS
// ============================================================================

/// In-process fan-out of engine events.
///
/// Subscribers run in their own tasks; a send never blocks the emitter.
/// Lagging subscribers lose the oldest buffered events rather than applying
/// backpressure.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EngineEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Subscribe to the live stream
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }

    /// Emit to all current subscribers. A send with no subscribers is fine.
    pub fn broadcast(&self, event: EngineEvent) {
        let _ = self.tx.send(event);
    }

    /// Number of live subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// Persist to the durable queue (best-effort) and broadcast in-process.
///
/// Used for events that do not originate inside a storage transaction;
/// transactional operations persist their own rows and only broadcast here.
pub(crate) fn publish(store: &crate::storage::MemoryStore, bus: &EventBus, event: EngineEvent) {
    if let Err(e) = store.persist_event(&event) {
        tracing::warn!("Failed to persist {} event: {}", event.kind(), e);
    }
    bus.broadcast(event);
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_matches_serialized_type() {
        let event = EngineEvent::MemoryDeleted {
            id: 7,
            title: "old note".into(),
            timestamp: Utc::now(),
        };
        let value: serde_json::Value = serde_json::from_str(&event.to_json()).unwrap();
        assert_eq!(value["type"], event.kind());
    }

    #[test]
    fn test_payload_extracts_data() {
        let event = EngineEvent::MemoryAccessed {
            id: 3,
            access_count: 2,
            timestamp: Utc::now(),
        };
        let payload = event.payload();
        assert_eq!(payload["id"], 3);
        assert_eq!(payload["access_count"], 2);
    }

    #[test]
    fn test_every_kind_is_distinct() {
        let now = Utc::now();
        let events = vec![
            EngineEvent::MemoryCreated {
                id: 1,
                title: String::new(),
                category: Category::Note,
                memory_type: MemoryType::ShortTerm,
                project: None,
                tags: vec![],
                timestamp: now,
            },
            EngineEvent::MemoryAccessed { id: 1, access_count: 0, timestamp: now },
            EngineEvent::MemoryUpdated { id: 1, fields: vec![], timestamp: now },
            EngineEvent::MemoryDeleted { id: 1, title: String::new(), timestamp: now },
            EngineEvent::ConsolidationComplete { report: Default::default(), timestamp: now },
            EngineEvent::DecayTick { changes: vec![], timestamp: now },
            EngineEvent::SessionStarted { id: String::new(), project: None, timestamp: now },
            EngineEvent::SessionEnded { id: String::new(), summary: None, timestamp: now },
            EngineEvent::WorkerLightTick { activation_pruned: 0, timestamp: now },
            EngineEvent::WorkerMediumTick {
                links_discovered: 0,
                contradictions_found: 0,
                timestamp: now,
            },
            EngineEvent::LinkDiscovered {
                source_id: 1,
                target_id: 2,
                relationship: Relationship::Related,
                strength: 0.2,
                timestamp: now,
            },
            EngineEvent::PredictiveConsolidation { reason: String::new(), timestamp: now },
            EngineEvent::UpdateStarted { version: String::new(), timestamp: now },
            EngineEvent::UpdateComplete { version: String::new(), timestamp: now },
            EngineEvent::UpdateFailed { error: String::new(), timestamp: now },
            EngineEvent::ServerRestarting { timestamp: now },
        ];
        let mut kinds: Vec<&str> = events.iter().map(|e| e.kind()).collect();
        kinds.sort_unstable();
        kinds.dedup();
        assert_eq!(kinds.len(), 16);
    }

    #[tokio::test]
    async fn test_broadcast_reaches_subscriber() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        bus.broadcast(EngineEvent::ServerRestarting { timestamp: Utc::now() });
        let received = rx.recv().await.unwrap();
        assert_eq!(received.kind(), "server_restarting");
    }
}
