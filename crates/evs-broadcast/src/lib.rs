//! Per-tenant room fan-out for committed ledger events.
//!
//! The [`Broadcaster`] is an explicit long-lived value constructed once at
//! process start and passed by handle to anything that needs to publish —
//! there is no module-level singleton. Delivery is at-least-once and
//! best-effort: a subscriber that is offline at publish time receives
//! nothing here and catches up through offline replay. Durability is the
//! ledger's job, never this crate's.

use evs_reconcile::{number_or_placeholder, section_checksums, Delta, SnapshotChecksums};
use evs_schemas::{Event, EventPayload, EventType};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, warn};
use uuid::Uuid;

/// Messages fanned out to a tenant room.
///
/// Structural changes carry the full event payload ("low-volume, send
/// everything"); KPI updates carry only the field-level delta plus the
/// checksums of the resulting snapshot ("high-volume, send the diff").
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RoomMsg {
    Event {
        event_type: EventType,
        sequence_num: i64,
        payload: Value,
        checksum: String,
    },
    KpiDelta {
        sequence_num: i64,
        delta: Delta,
    },
    /// Sent instead of a delta when the room has no prior KPI snapshot to
    /// diff against.
    KpiSnapshot {
        sequence_num: i64,
        snapshot: Value,
        checksums: SnapshotChecksums,
    },
}

struct Room {
    tx: broadcast::Sender<RoomMsg>,
    /// Last KPI snapshot fanned out to this room; the base for the next
    /// delta computation.
    last_kpi_snapshot: Option<Value>,
    /// Highest sequence number published to this room. Events at or below
    /// this watermark are dropped so no subscriber ever sees a duplicate.
    last_seq: i64,
}

/// Tenant-room registry over tokio broadcast channels.
///
/// `on_event_committed` must be fed events in ascending sequence order per
/// tenant (the daemon's single ledger-tail task guarantees this); the
/// watermark makes redundant feeds harmless.
pub struct Broadcaster {
    capacity: usize,
    rooms: RwLock<HashMap<Uuid, Room>>,
}

impl Broadcaster {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(16),
            rooms: RwLock::new(HashMap::new()),
        }
    }

    /// Join a tenant room, creating it on first subscription.
    pub async fn subscribe(&self, tenant_id: Uuid) -> broadcast::Receiver<RoomMsg> {
        let mut rooms = self.rooms.write().await;
        let room = rooms.entry(tenant_id).or_insert_with(|| {
            let (tx, _rx) = broadcast::channel(self.capacity);
            Room {
                tx,
                last_kpi_snapshot: None,
                last_seq: 0,
            }
        });
        room.tx.subscribe()
    }

    /// Install the KPI delta base for a room being followed from the middle
    /// of its history. Without this, the first KPI event would fold from an
    /// empty base and broadcast absolute values that ignore every prior
    /// event. A base that is already set is kept — the running fold is ahead
    /// of any snapshot the caller could supply.
    pub async fn seed_kpi_base(&self, tenant_id: Uuid, snapshot: Value) {
        let mut rooms = self.rooms.write().await;
        let Some(room) = rooms.get_mut(&tenant_id) else {
            return;
        };
        if room.last_kpi_snapshot.is_none() {
            room.last_kpi_snapshot = Some(snapshot);
        }
    }

    /// Live subscriber count for a tenant (0 when the room does not exist).
    pub async fn subscriber_count(&self, tenant_id: Uuid) -> usize {
        let rooms = self.rooms.read().await;
        rooms
            .get(&tenant_id)
            .map(|r| r.tx.receiver_count())
            .unwrap_or(0)
    }

    /// Tenants whose rooms currently have at least one live subscriber.
    /// The ledger tail only follows these.
    pub async fn active_tenants(&self) -> Vec<Uuid> {
        let rooms = self.rooms.read().await;
        rooms
            .iter()
            .filter(|(_, r)| r.tx.receiver_count() > 0)
            .map(|(t, _)| *t)
            .collect()
    }

    /// Publish one COMPLETED event to its tenant room.
    ///
    /// Publish failures are logged and dropped; they never propagate to the
    /// write path, which committed independently before this call.
    pub async fn on_event_committed(&self, event: &Event) {
        let mut rooms = self.rooms.write().await;
        let Some(room) = rooms.get_mut(&event.tenant_id) else {
            // Nobody ever subscribed; replay will serve them later.
            return;
        };

        if event.sequence_num <= room.last_seq {
            debug!(
                tenant = %event.tenant_id,
                seq = event.sequence_num,
                watermark = room.last_seq,
                "skipping already-published event"
            );
            return;
        }
        room.last_seq = event.sequence_num;

        let msg = if event.event_type.is_kpi() {
            kpi_message(room, event)
        } else {
            RoomMsg::Event {
                event_type: event.event_type,
                sequence_num: event.sequence_num,
                payload: event.payload.clone(),
                checksum: event.checksum.clone(),
            }
        };

        if let Err(e) = room.tx.send(msg) {
            // No live receivers; fine. Durability lives in the ledger.
            debug!(tenant = %event.tenant_id, "no live subscribers: {e}");
        }
    }
}

/// Fold a KPI event into the room's running snapshot and decide between a
/// delta and a full snapshot message.
fn kpi_message(room: &mut Room, event: &Event) -> RoomMsg {
    let next = match event.typed_payload() {
        Ok(EventPayload::AnalyticsDelta(p)) => {
            let base = room.last_kpi_snapshot.clone().unwrap_or_else(empty_snapshot);
            apply_kpi_deltas(&base, &p.deltas)
        }
        // Shouldn't happen for is_kpi() types; degrade to a full payload
        // broadcast rather than dropping the update.
        Ok(_) | Err(_) => {
            warn!(
                event_id = %event.id,
                "KPI event payload did not parse; broadcasting raw payload"
            );
            return RoomMsg::Event {
                event_type: event.event_type,
                sequence_num: event.sequence_num,
                payload: event.payload.clone(),
                checksum: event.checksum.clone(),
            };
        }
    };

    let msg = match &room.last_kpi_snapshot {
        Some(last) => RoomMsg::KpiDelta {
            sequence_num: event.sequence_num,
            delta: evs_reconcile::delta(last, &next),
        },
        None => RoomMsg::KpiSnapshot {
            sequence_num: event.sequence_num,
            checksums: section_checksums(&next),
            snapshot: next.clone(),
        },
    };
    room.last_kpi_snapshot = Some(next);
    msg
}

fn empty_snapshot() -> Value {
    let mut root = Map::new();
    root.insert("kpis".to_string(), Value::Object(Map::new()));
    Value::Object(root)
}

/// Apply counter adjustments onto the `kpis` section. A KPI that has never
/// been set starts from 0 when a delta establishes it; non-numeric current
/// values (including the "n/a" placeholder) are likewise overwritten from 0.
///
/// Shared with the daemon's snapshot materializer so broadcast deltas and
/// on-demand snapshots fold KPI events identically.
pub fn apply_kpi_deltas(
    snapshot: &Value,
    deltas: &std::collections::BTreeMap<String, f64>,
) -> Value {
    let mut root = match snapshot {
        Value::Object(m) => m.clone(),
        _ => Map::new(),
    };
    let slot = root
        .entry("kpis".to_string())
        .or_insert_with(|| Value::Object(Map::new()));
    if !slot.is_object() {
        *slot = Value::Object(Map::new());
    }
    if let Value::Object(kpis) = slot {
        for (name, dv) in deltas {
            let current = kpis.get(name).and_then(Value::as_f64).unwrap_or(0.0);
            kpis.insert(name.clone(), number_or_placeholder(current + dv));
        }
    }
    Value::Object(root)
}
