//! Request and response types for all evs-daemon HTTP endpoints.
//!
//! These types are `Serialize + Deserialize` so they can be JSON-encoded by
//! Axum and decoded by tests. No business logic lives here.

use evs_reconcile::{Delta, SnapshotChecksums};
use evs_schemas::{Event, EventStatus, EventType, VectorClock};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// /v1/health  /v1/status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub service: &'static str,
    pub version: &'static str,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub daemon_uptime_secs: u64,
    pub db_ok: bool,
    pub has_events_table: bool,
}

// ---------------------------------------------------------------------------
// POST /v1/events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitRequest {
    pub tenant_id: Uuid,
    pub event_type: EventType,
    pub payload: Value,
    #[serde(default)]
    pub idempotency_key: Option<String>,
    #[serde(default)]
    pub origin_hash: Option<String>,
    #[serde(default)]
    pub vector_clock: VectorClock,
    /// Optional client checkpoint. A claim ahead of the server is a
    /// sequence regression and refuses the write.
    #[serde(default)]
    pub observed_sequence_num: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub event_id: Uuid,
    pub sequence_num: i64,
    pub checksum: String,
    pub status: EventStatus,
    /// True when the submission resolved to an already-committed event
    /// (idempotency key or origin hash hit) instead of creating a new one.
    pub existing: bool,
}

/// Structured error body for refused writes (governance, regression).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefusedResponse {
    pub error: String,
    /// Which check refused: "governance" | "sequence_regression"
    pub refused_by: String,
}

// ---------------------------------------------------------------------------
// GET /v1/replay
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct ReplayParams {
    pub tenant_id: Uuid,
    #[serde(default)]
    pub last_sequence_num: i64,
    #[serde(default)]
    pub is_initial_sync: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayResponse {
    pub events: Vec<Event>,
    pub total_events: usize,
    pub last_sequence_num: i64,
    pub truncated: bool,
}

// ---------------------------------------------------------------------------
// GET /v1/sequence/:tenant_id
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequenceResponse {
    pub tenant_id: Uuid,
    pub latest_sequence_num: i64,
}

// ---------------------------------------------------------------------------
// GET /v1/snapshot
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct SnapshotParams {
    pub tenant_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotResponse {
    pub data: Value,
    pub checksums: SnapshotChecksums,
    pub etag: String,
    pub as_of_sequence_num: i64,
}

// ---------------------------------------------------------------------------
// POST /v1/sync/idle
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdleSyncRequest {
    pub tenant_id: Uuid,
    pub client_etag: String,
    /// The client's cached snapshot, if it wants a field-level delta
    /// instead of a full snapshot on staleness.
    #[serde(default)]
    pub base_snapshot: Option<Value>,
    /// Checksum the client claims for `base_snapshot`. A mismatch against
    /// the server's recomputation forces a full fetch instead of trusting
    /// the client cache.
    #[serde(default)]
    pub base_checksum: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdleSyncResponse {
    pub stale: bool,
    /// Present only when `stale` is true.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delta: Option<Delta>,
    pub etag: String,
    /// True when the client's claimed checksum did not match and the delta
    /// was computed against an empty base (full re-fetch semantics).
    #[serde(default)]
    pub forced_full: bool,
}
