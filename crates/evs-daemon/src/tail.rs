//! Ledger tail: the single task that feeds committed events to the
//! broadcaster.
//!
//! One task per process owns all per-tenant watermarks, so every room sees
//! events in ascending sequence order no matter how many writers are
//! committing concurrently (on this instance or any other). Rooms with no
//! live subscribers are not followed; reconnecting clients catch up through
//! replay, not through buffered fan-out.

use crate::snapshot;
use crate::state::AppState;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;
use uuid::Uuid;

const TAIL_BATCH: i64 = 256;

/// Spawn the ledger tail loop. Returns the task handle; the daemon runs it
/// for the life of the process.
pub fn spawn_ledger_tail(state: Arc<AppState>, interval: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut watermarks: HashMap<Uuid, i64> = HashMap::new();
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let tenants = state.rooms.active_tenants().await;
            for tenant_id in tenants {
                if let Err(e) = tail_tenant(&state, &mut watermarks, tenant_id).await {
                    // Broadcast is best-effort; the ledger remains the
                    // durable source and the next tick retries.
                    warn!(tenant = %tenant_id, "ledger tail tick failed: {e:#}");
                }
            }
        }
    })
}

async fn tail_tenant(
    state: &AppState,
    watermarks: &mut HashMap<Uuid, i64>,
    tenant_id: Uuid,
) -> anyhow::Result<()> {
    let watermark = match watermarks.get(&tenant_id) {
        Some(w) => *w,
        None => {
            // First time we see this room: materialize the current state,
            // seed the room's KPI delta base with it and start at its head.
            // The stream then carries only new events, folded on top of the
            // real history; full history itself is replay's job.
            let snap = snapshot::materialize(&state.pool, tenant_id).await?;
            let mut base = Map::new();
            base.insert(
                "kpis".to_string(),
                snap.data
                    .get("kpis")
                    .cloned()
                    .unwrap_or(Value::Object(Map::new())),
            );
            state
                .rooms
                .seed_kpi_base(tenant_id, Value::Object(base))
                .await;
            watermarks.insert(tenant_id, snap.as_of_sequence_num);
            snap.as_of_sequence_num
        }
    };

    let mut cursor = watermark;
    loop {
        let batch = evs_ledger::read_since(&state.pool, tenant_id, cursor, TAIL_BATCH).await?;
        if batch.is_empty() {
            break;
        }
        for event in &batch {
            state.rooms.on_event_committed(event).await;
            cursor = event.sequence_num;
        }
    }
    watermarks.insert(tenant_id, cursor);
    Ok(())
}
