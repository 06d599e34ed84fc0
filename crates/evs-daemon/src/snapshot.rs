//! On-demand snapshot materialization.
//!
//! A snapshot is a derived view, never stored: it is folded from the
//! tenant's COMPLETED events on every request. Sections are `tasks` (one
//! field per live task) and `kpis` (running counters).

use anyhow::Result;
use chrono::{DateTime, Utc};
use evs_broadcast::apply_kpi_deltas;
use evs_reconcile::{etag, sanitize, section_checksums, SnapshotChecksums};
use evs_schemas::{EventPayload, EventType};
use serde_json::{Map, Value};
use sqlx::PgPool;
use std::collections::HashMap;
use tracing::warn;
use uuid::Uuid;

const FOLD_BATCH: i64 = 1000;

/// A materialized snapshot plus its cache-validation fingerprints.
#[derive(Debug, Clone)]
pub struct Materialized {
    /// Sanitized snapshot: missing numeric data carries the placeholder,
    /// never a silent 0.
    pub data: Value,
    pub checksums: SnapshotChecksums,
    /// Fingerprint over entity modification timestamps — cheap staleness
    /// probe, distinct from the content checksums.
    pub etag: String,
    pub as_of_sequence_num: i64,
}

/// Fold the tenant's ledger into `{tasks, kpis}` as of the latest committed
/// sequence number.
pub async fn materialize(pool: &PgPool, tenant_id: Uuid) -> Result<Materialized> {
    let mut tasks: Map<String, Value> = Map::new();
    let mut kpi_snapshot = Value::Object(Map::new());
    // entity id -> last modification time, feeding the ETag.
    let mut touched: HashMap<Uuid, DateTime<Utc>> = HashMap::new();

    let mut cursor = 0i64;
    loop {
        let batch = evs_ledger::read_since(pool, tenant_id, cursor, FOLD_BATCH).await?;
        if batch.is_empty() {
            break;
        }
        for event in &batch {
            cursor = event.sequence_num;
            match (event.event_type, event.typed_payload()) {
                (EventType::TaskCreated | EventType::TaskUpdated, Ok(EventPayload::Task(p))) => {
                    let key = p.task_id.to_string();
                    let slot = tasks
                        .entry(key)
                        .or_insert_with(|| Value::Object(Map::new()));
                    if let (Value::Object(task), Ok(Value::Object(fields))) =
                        (slot, serde_json::to_value(&p))
                    {
                        for (k, v) in fields {
                            task.insert(k, v);
                        }
                    }
                    touched.insert(p.task_id, event.created_at);
                }
                (EventType::TaskDeleted, Ok(EventPayload::Task(p))) => {
                    tasks.remove(&p.task_id.to_string());
                    touched.remove(&p.task_id);
                }
                (EventType::AnalyticsDeltaApply, Ok(EventPayload::AnalyticsDelta(p))) => {
                    kpi_snapshot = apply_kpi_deltas(&kpi_snapshot, &p.deltas);
                    // KPIs are one logical entity per tenant.
                    touched.insert(tenant_id, event.created_at);
                }
                (_, Err(e)) => {
                    // Malformed payloads must not break the whole snapshot;
                    // the event is skipped and the gap shows up in checksums.
                    warn!(event_id = %event.id, "skipping unparseable payload: {e:#}");
                }
                _ => {}
            }
        }
    }

    let mut root = Map::new();
    root.insert("tasks".to_string(), Value::Object(tasks));
    root.insert(
        "kpis".to_string(),
        kpi_snapshot
            .get("kpis")
            .cloned()
            .unwrap_or(Value::Object(Map::new())),
    );
    let data = sanitize(&Value::Object(root));

    let rows: Vec<(Uuid, DateTime<Utc>)> = touched.into_iter().collect();

    Ok(Materialized {
        checksums: section_checksums(&data),
        etag: etag(&rows),
        as_of_sequence_num: cursor,
        data,
    })
}
