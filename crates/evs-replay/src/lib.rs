//! Offline queue replay: bounded, batched backlog reads for reconnecting
//! clients.
//!
//! The engine is generic over [`LedgerRead`] so it can be driven by the
//! Postgres ledger in production and by an in-memory ledger in tests. Each
//! batch boundary is an await point, so a dropped client future abandons the
//! replay mid-stream with no cleanup required — the client simply re-requests
//! from its last confirmed sequence number.

use anyhow::{bail, Result};
use evs_schemas::Event;
use serde::{Deserialize, Serialize};
use std::future::Future;
use uuid::Uuid;

/// Read contract the replay engine needs from the ledger. Only COMPLETED
/// events may be surfaced by implementations.
pub trait LedgerRead {
    /// Events with `sequence_num > after_seq`, ascending, at most `limit`.
    fn read_since(
        &self,
        tenant_id: Uuid,
        after_seq: i64,
        limit: i64,
    ) -> impl Future<Output = Result<Vec<Event>>> + Send;

    /// Latest committed sequence number for the tenant (0 when none).
    fn get_latest_sequence(&self, tenant_id: Uuid) -> impl Future<Output = Result<i64>> + Send;
}

/// Tuning for the replay loop.
#[derive(Debug, Clone, Copy)]
pub struct ReplayConfig {
    /// Rows fetched per batch; bounds per-query memory.
    pub batch_size: i64,
    /// Hard cap on events returned per replay call. Hitting the cap sets
    /// `truncated = true` and the client must re-bootstrap from a fresh
    /// snapshot — a deliberate trade-off that bounds worst-case memory and
    /// latency on pathological backlogs.
    pub max_events: usize,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            batch_size: 500,
            max_events: 5000,
        }
    }
}

/// Result of one replay call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayResult {
    /// Strictly ascending by `sequence_num`. The client applies these in
    /// order; sequence order, not vector-clock order, is authoritative.
    pub events: Vec<Event>,
    pub total_events: usize,
    /// Sequence number of the last event actually returned; equals the
    /// requested checkpoint when no events were returned.
    pub last_sequence_num: i64,
    /// True when the hard cap stopped the replay early. The partial set must
    /// not be trusted as complete — discard local cache and re-fetch a fresh
    /// snapshot.
    pub truncated: bool,
}

/// Serve the backlog after `last_sequence_num` in bounded batches.
///
/// `is_initial_sync` means the client has no local state at all; the replay
/// then starts from sequence 0 regardless of the checkpoint passed.
pub async fn replay<L: LedgerRead>(
    reader: &L,
    tenant_id: Uuid,
    last_sequence_num: i64,
    is_initial_sync: bool,
    config: ReplayConfig,
) -> Result<ReplayResult> {
    let start = if is_initial_sync { 0 } else { last_sequence_num };
    let cap = config.max_events.max(1);

    let mut events: Vec<Event> = Vec::new();
    let mut cursor = start;
    let mut truncated = false;

    loop {
        let remaining = (cap - events.len()) as i64;
        // Over-fetch by one row so a cap hit can tell "exactly full" from
        // "more events remain".
        let want = config.batch_size.max(1).min(remaining + 1);
        let batch = reader.read_since(tenant_id, cursor, want).await?;
        if batch.is_empty() {
            break;
        }

        // The ledger contract is strict ascending order; a violation here
        // means the read path is broken and the replay must not be trusted.
        let mut prev = cursor;
        for ev in &batch {
            if ev.sequence_num <= prev {
                bail!(
                    "ledger returned non-increasing sequence {} after {} for tenant {}",
                    ev.sequence_num,
                    prev,
                    tenant_id
                );
            }
            prev = ev.sequence_num;
        }
        cursor = prev;

        if batch.len() as i64 > remaining {
            truncated = true;
            events.extend(batch.into_iter().take(remaining as usize));
            break;
        }

        let got = batch.len() as i64;
        events.extend(batch);
        if got < want {
            break;
        }
    }

    let last = events.last().map(|e| e.sequence_num).unwrap_or(start);
    Ok(ReplayResult {
        total_events: events.len(),
        last_sequence_num: last,
        truncated,
        events,
    })
}
