//! Test fixtures shared by the scenario tests: an in-memory ledger that
//! satisfies the replay read contract, and event builders.
//!
//! Nothing in this crate is meant for production use.

use anyhow::Result;
use evs_replay::LedgerRead;
use evs_schemas::{Event, EventStatus, EventType, VectorClock};
use serde_json::{json, Value};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// In-memory, per-tenant event log with ledger read semantics: only
/// COMPLETED events are visible, ordered by sequence number.
#[derive(Default)]
pub struct InMemoryLedger {
    tenants: RwLock<HashMap<Uuid, Vec<Event>>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a COMPLETED event with the next sequence number for the
    /// tenant and return it.
    pub async fn append_completed(
        &self,
        tenant_id: Uuid,
        event_type: EventType,
        payload: Value,
    ) -> Event {
        let mut tenants = self.tenants.write().await;
        let log = tenants.entry(tenant_id).or_default();
        let seq = log.last().map(|e| e.sequence_num).unwrap_or(0) + 1;
        let event = completed_event(tenant_id, seq, event_type, payload);
        log.push(event.clone());
        event
    }

    /// Seed `count` KPI events in one call.
    pub async fn seed_kpi_events(&self, tenant_id: Uuid, count: i64) {
        for _ in 0..count {
            self.append_completed(
                tenant_id,
                EventType::AnalyticsDeltaApply,
                json!({"deltas": {"total": 1.0}}),
            )
            .await;
        }
    }
}

impl LedgerRead for InMemoryLedger {
    async fn read_since(&self, tenant_id: Uuid, after_seq: i64, limit: i64) -> Result<Vec<Event>> {
        let tenants = self.tenants.read().await;
        Ok(tenants
            .get(&tenant_id)
            .map(|log| {
                log.iter()
                    .filter(|e| e.status == EventStatus::Completed && e.sequence_num > after_seq)
                    .take(limit.max(0) as usize)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn get_latest_sequence(&self, tenant_id: Uuid) -> Result<i64> {
        let tenants = self.tenants.read().await;
        Ok(tenants
            .get(&tenant_id)
            .and_then(|log| {
                log.iter()
                    .filter(|e| e.status == EventStatus::Completed)
                    .last()
                    .map(|e| e.sequence_num)
            })
            .unwrap_or(0))
    }
}

/// Build a COMPLETED event with a real payload checksum.
pub fn completed_event(
    tenant_id: Uuid,
    sequence_num: i64,
    event_type: EventType,
    payload: Value,
) -> Event {
    Event {
        id: Uuid::new_v4(),
        tenant_id,
        sequence_num,
        event_type,
        payload: payload.clone(),
        vector_clock: VectorClock::new(),
        idempotency_key: None,
        origin_hash: None,
        status: EventStatus::Completed,
        checksum: evs_reconcile::checksum(&payload),
        created_at: chrono::Utc::now(),
    }
}

/// A plausible task-creation payload.
pub fn task_payload(title: &str) -> Value {
    json!({
        "task_id": Uuid::new_v4(),
        "title": title,
        "priority": "medium",
    })
}
