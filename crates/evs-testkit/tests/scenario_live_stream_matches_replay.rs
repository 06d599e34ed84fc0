//! A subscriber that stays online and a client that catches up later must
//! converge on the same event stream: same sequence numbers, same checksums.

use anyhow::Result;
use evs_broadcast::{Broadcaster, RoomMsg};
use evs_replay::{replay, ReplayConfig};
use evs_schemas::EventType;
use evs_testkit::{task_payload, InMemoryLedger};
use uuid::Uuid;

#[tokio::test]
async fn live_fanout_and_later_replay_agree() -> Result<()> {
    let ledger = InMemoryLedger::new();
    let rooms = Broadcaster::new(64);
    let tenant = Uuid::new_v4();
    let mut rx = rooms.subscribe(tenant).await;

    // Commit structural events and feed each to the room, ledger first —
    // the same order the daemon's tail enforces.
    let mut committed = Vec::new();
    for title in ["one", "two", "three"] {
        let ev = ledger
            .append_completed(tenant, EventType::TaskCreated, task_payload(title))
            .await;
        rooms.on_event_committed(&ev).await;
        committed.push(ev);
    }

    // Live subscriber: full payload per structural event, in order.
    let mut live = Vec::new();
    while let Ok(msg) = rx.try_recv() {
        match msg {
            RoomMsg::Event {
                sequence_num,
                checksum,
                ..
            } => live.push((sequence_num, checksum)),
            other => panic!("structural events broadcast full payloads, got {other:?}"),
        }
    }
    assert_eq!(live.len(), 3);

    // Late client: replay from zero.
    let r = replay(&ledger, tenant, 0, false, ReplayConfig::default()).await?;
    let replayed: Vec<(i64, String)> = r
        .events
        .iter()
        .map(|e| (e.sequence_num, e.checksum.clone()))
        .collect();

    assert_eq!(live, replayed, "live stream and replay must agree");
    assert_eq!(
        replayed,
        committed
            .iter()
            .map(|e| (e.sequence_num, e.checksum.clone()))
            .collect::<Vec<_>>()
    );
    Ok(())
}

#[tokio::test]
async fn subscriber_joining_mid_history_gets_deltas_on_top_of_it() -> Result<()> {
    let ledger = InMemoryLedger::new();
    let rooms = Broadcaster::new(64);
    let tenant = Uuid::new_v4();

    // History before anyone subscribes: total climbs to 10.
    for _ in 0..10 {
        ledger
            .append_completed(
                tenant,
                EventType::AnalyticsDeltaApply,
                serde_json::json!({"deltas": {"total": 1.0}}),
            )
            .await;
    }

    // A follower starts: fold the backlog into the room's delta base, the
    // way the daemon tail does on first follow, then track only new events.
    let mut rx = rooms.subscribe(tenant).await;
    let backlog = replay(&ledger, tenant, 0, true, ReplayConfig::default()).await?;
    let mut base = serde_json::json!({"kpis": {}});
    for ev in &backlog.events {
        if let Ok(evs_schemas::EventPayload::AnalyticsDelta(p)) = ev.typed_payload() {
            base = evs_broadcast::apply_kpi_deltas(&base, &p.deltas);
        }
    }
    rooms.seed_kpi_base(tenant, base).await;

    let ev = ledger
        .append_completed(
            tenant,
            EventType::AnalyticsDeltaApply,
            serde_json::json!({"deltas": {"total": 2.0}}),
        )
        .await;
    rooms.on_event_committed(&ev).await;

    match rx.try_recv()? {
        RoomMsg::KpiDelta { delta, .. } => match &delta.changes["kpis"] {
            evs_reconcile::SectionDelta::Fields(f) => {
                assert_eq!(
                    f["total"],
                    serde_json::json!(12.0),
                    "the broadcast value includes the pre-subscription history"
                );
            }
            other => panic!("expected field delta, got {other:?}"),
        },
        other => panic!("expected a delta over the seeded base, got {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn kpi_fanout_deltas_reconstruct_the_replayed_fold() -> Result<()> {
    let ledger = InMemoryLedger::new();
    let rooms = Broadcaster::new(64);
    let tenant = Uuid::new_v4();
    let mut rx = rooms.subscribe(tenant).await;

    ledger.seed_kpi_events(tenant, 3).await;
    let r = replay(&ledger, tenant, 0, false, ReplayConfig::default()).await?;
    for ev in &r.events {
        rooms.on_event_committed(ev).await;
    }

    // First message is a full snapshot, then field deltas. Applying them in
    // order lands on the same snapshot the ledger fold produces.
    let mut view = match rx.try_recv()? {
        RoomMsg::KpiSnapshot { snapshot, .. } => snapshot,
        other => panic!("first KPI message must be a snapshot, got {other:?}"),
    };
    while let Ok(msg) = rx.try_recv() {
        match msg {
            RoomMsg::KpiDelta { delta, .. } => {
                view = evs_reconcile::merge(&view, &delta);
                assert_eq!(
                    evs_reconcile::checksum(&view),
                    delta.checksums.full,
                    "delta checksums describe the post-merge snapshot"
                );
            }
            other => panic!("expected deltas after the snapshot, got {other:?}"),
        }
    }
    assert_eq!(view["kpis"]["total"], serde_json::json!(3.0));
    Ok(())
}
