//! Shared wire and ledger types for the event-sync core.
//!
//! Everything here is `Serialize + Deserialize` and free of I/O. The ledger,
//! replay, broadcast and daemon crates all speak these types.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// EventType
// ---------------------------------------------------------------------------

/// Closed set of ledger event kinds.
///
/// Structural kinds (create/delete) are broadcast as full payloads; KPI kinds
/// are broadcast as field-level deltas against the room's last-sent snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    TaskCreated,
    TaskUpdated,
    TaskDeleted,
    AnalyticsDeltaApply,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::TaskCreated => "TASK_CREATED",
            EventType::TaskUpdated => "TASK_UPDATE",
            EventType::TaskDeleted => "TASK_DELETED",
            EventType::AnalyticsDeltaApply => "ANALYTICS_DELTA_APPLY",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "TASK_CREATED" => Ok(EventType::TaskCreated),
            "TASK_UPDATE" => Ok(EventType::TaskUpdated),
            "TASK_DELETED" => Ok(EventType::TaskDeleted),
            "ANALYTICS_DELTA_APPLY" => Ok(EventType::AnalyticsDeltaApply),
            other => Err(anyhow!("invalid event type: {}", other)),
        }
    }

    /// Structural changes (create/delete/update of an entity row).
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            EventType::TaskCreated | EventType::TaskUpdated | EventType::TaskDeleted
        )
    }

    /// KPI/analytics updates, eligible for delta-only broadcast.
    pub fn is_kpi(&self) -> bool {
        matches!(self, EventType::AnalyticsDeltaApply)
    }
}

impl Serialize for EventType {
    fn serialize<S: serde::Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        s.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for EventType {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(d)?;
        EventType::parse(&raw).map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// EventStatus
// ---------------------------------------------------------------------------

/// Lifecycle of a ledger event. PENDING rows are invisible to every read
/// path; COMPLETED and FAILED are terminal and immutable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventStatus {
    Pending,
    Completed,
    Failed,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::Pending => "PENDING",
            EventStatus::Completed => "COMPLETED",
            EventStatus::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "PENDING" => Ok(EventStatus::Pending),
            "COMPLETED" => Ok(EventStatus::Completed),
            "FAILED" => Ok(EventStatus::Failed),
            other => Err(anyhow!("invalid event status: {}", other)),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, EventStatus::Completed | EventStatus::Failed)
    }
}

// ---------------------------------------------------------------------------
// VectorClock
// ---------------------------------------------------------------------------

/// Per-device causal counters attached to offline-originated events.
///
/// Used only to label authorship of offline changes and to break ties in
/// display/audit paths. Server commit order (`sequence_num`) is always the
/// authoritative ordering key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VectorClock(pub BTreeMap<String, u64>);

impl VectorClock {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    pub fn increment(&mut self, device_id: &str) {
        *self.0.entry(device_id.to_string()).or_insert(0) += 1;
    }

    /// Component-wise max of the two clocks.
    pub fn merge(&self, other: &VectorClock) -> VectorClock {
        let mut out = self.0.clone();
        for (k, v) in &other.0 {
            let e = out.entry(k.clone()).or_insert(0);
            if *v > *e {
                *e = *v;
            }
        }
        VectorClock(out)
    }

    /// True when `self` is >= `other` on every component and > on at least one.
    pub fn dominates(&self, other: &VectorClock) -> bool {
        let mut strictly_greater = false;
        for (k, v) in &other.0 {
            match self.0.get(k) {
                Some(mine) if mine >= v => {
                    if mine > v {
                        strictly_greater = true;
                    }
                }
                _ => return false,
            }
        }
        strictly_greater || self.0.keys().any(|k| !other.0.contains_key(k))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Event
// ---------------------------------------------------------------------------

/// One committed ledger record. Immutable once status is terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub tenant_id: Uuid,
    /// Strictly increasing within `tenant_id`; assigned at commit time,
    /// never client-supplied.
    pub sequence_num: i64,
    pub event_type: EventType,
    pub payload: Value,
    pub vector_clock: VectorClock,
    pub idempotency_key: Option<String>,
    pub origin_hash: Option<String>,
    pub status: EventStatus,
    /// SHA-256 over the canonicalized payload, computed at commit time.
    pub checksum: String,
    pub created_at: DateTime<Utc>,
}

/// Client-submitted event fields. Sequence number, checksum and timestamps
/// are server-assigned and deliberately absent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewEvent {
    pub event_type: EventType,
    pub payload: Value,
    #[serde(default)]
    pub idempotency_key: Option<String>,
    #[serde(default)]
    pub origin_hash: Option<String>,
    #[serde(default)]
    pub vector_clock: VectorClock,
}

// ---------------------------------------------------------------------------
// Typed payloads
// ---------------------------------------------------------------------------

/// Task fields carried by structural events. Unknown fields are preserved
/// opaquely in `extra` for forward compatibility.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskPayload {
    pub task_id: Uuid,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub priority: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// KPI counter adjustments carried by analytics events. Values are deltas
/// to apply, keyed by KPI name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsDeltaPayload {
    pub deltas: BTreeMap<String, f64>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// Tagged view of an event payload, parsed on demand from the stored JSON.
#[derive(Debug, Clone)]
pub enum EventPayload {
    Task(TaskPayload),
    AnalyticsDelta(AnalyticsDeltaPayload),
}

impl Event {
    /// Parse the stored payload into its typed shape for this event kind.
    pub fn typed_payload(&self) -> Result<EventPayload> {
        match self.event_type {
            EventType::TaskCreated | EventType::TaskUpdated | EventType::TaskDeleted => {
                let p: TaskPayload = serde_json::from_value(self.payload.clone())?;
                Ok(EventPayload::Task(p))
            }
            EventType::AnalyticsDeltaApply => {
                let p: AnalyticsDeltaPayload = serde_json::from_value(self.payload.clone())?;
                Ok(EventPayload::AnalyticsDelta(p))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn event_type_round_trips_wire_names() {
        for t in [
            EventType::TaskCreated,
            EventType::TaskUpdated,
            EventType::TaskDeleted,
            EventType::AnalyticsDeltaApply,
        ] {
            assert_eq!(EventType::parse(t.as_str()).unwrap(), t);
        }
        assert!(EventType::parse("TASK_EXPLODED").is_err());
    }

    #[test]
    fn structural_vs_kpi_classification() {
        assert!(EventType::TaskCreated.is_structural());
        assert!(EventType::TaskDeleted.is_structural());
        assert!(!EventType::TaskCreated.is_kpi());
        assert!(EventType::AnalyticsDeltaApply.is_kpi());
        assert!(!EventType::AnalyticsDeltaApply.is_structural());
    }

    #[test]
    fn vector_clock_merge_takes_componentwise_max() {
        let mut a = VectorClock::new();
        a.increment("tab-1");
        a.increment("tab-1");
        let mut b = VectorClock::new();
        b.increment("tab-1");
        b.increment("tab-2");

        let m = a.merge(&b);
        assert_eq!(m.0.get("tab-1"), Some(&2));
        assert_eq!(m.0.get("tab-2"), Some(&1));
    }

    #[test]
    fn vector_clock_dominates_is_strict() {
        let mut a = VectorClock::new();
        a.increment("d1");
        a.increment("d1");
        let mut b = VectorClock::new();
        b.increment("d1");

        assert!(a.dominates(&b));
        assert!(!b.dominates(&a));
        // Equal clocks dominate neither way.
        assert!(!b.clone().dominates(&b));
    }

    #[test]
    fn task_payload_preserves_unknown_fields() {
        let raw = json!({
            "task_id": Uuid::new_v4(),
            "title": "write report",
            "due_phase": "Q3",
        });
        let p: TaskPayload = serde_json::from_value(raw).unwrap();
        assert_eq!(p.extra.get("due_phase"), Some(&json!("Q3")));
        let back = serde_json::to_value(&p).unwrap();
        assert_eq!(back["due_phase"], json!("Q3"));
    }
}
