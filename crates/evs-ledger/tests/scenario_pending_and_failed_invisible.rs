//! PENDING and FAILED events never appear on any read path; the two-phase
//! submit keeps the ledger row and the paired business write atomic.

use evs_schemas::{EventType, NewEvent, VectorClock};
use serde_json::json;
use uuid::Uuid;

fn task_event(title: &str) -> NewEvent {
    NewEvent {
        event_type: EventType::TaskCreated,
        payload: json!({"task_id": Uuid::new_v4(), "title": title}),
        idempotency_key: None,
        origin_hash: None,
        vector_clock: VectorClock::new(),
    }
}

#[tokio::test]
async fn uncommitted_and_failed_events_are_invisible() -> anyhow::Result<()> {
    let url = match std::env::var(evs_ledger::ENV_DB_URL) {
        Ok(v) => v,
        Err(_) => {
            eprintln!("SKIP: EVS_DATABASE_URL not set");
            return Ok(());
        }
    };

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(2)
        .connect(&url)
        .await?;
    evs_ledger::migrate(&pool).await?;

    let tenant = Uuid::new_v4();

    // Abandoned transaction: PENDING row rolls back with the business write.
    {
        let mut tx = pool.begin().await?;
        let ev = evs_ledger::begin_submit(&mut tx, tenant, &task_event("never lands")).await?;
        assert_eq!(ev.sequence_num, 1);
        tx.rollback().await?;
    }
    assert_eq!(evs_ledger::get_latest_sequence(&pool, tenant).await?, 0);
    assert!(evs_ledger::read_since(&pool, tenant, 0, 10).await?.is_empty());

    // Committed PENDING row that is then marked FAILED stays invisible.
    let failed_id = {
        let mut tx = pool.begin().await?;
        let ev = evs_ledger::begin_submit(&mut tx, tenant, &task_event("business write died")).await?;
        tx.commit().await?;
        ev.id
    };
    evs_ledger::mark_failed(&pool, failed_id).await?;
    assert_eq!(evs_ledger::get_latest_sequence(&pool, tenant).await?, 0);

    // A successful two-phase submit is visible.
    {
        let mut tx = pool.begin().await?;
        let ev = evs_ledger::begin_submit(&mut tx, tenant, &task_event("lands")).await?;
        evs_ledger::mark_completed(&mut tx, ev.id).await?;
        tx.commit().await?;
    }

    let visible = evs_ledger::read_since(&pool, tenant, 0, 10).await?;
    assert_eq!(visible.len(), 1);
    assert_eq!(visible[0].payload["title"], json!("lands"));

    Ok(())
}

#[tokio::test]
async fn governance_violation_writes_nothing() -> anyhow::Result<()> {
    let url = match std::env::var(evs_ledger::ENV_DB_URL) {
        Ok(v) => v,
        Err(_) => {
            eprintln!("SKIP: EVS_DATABASE_URL not set");
            return Ok(());
        }
    };

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(2)
        .connect(&url)
        .await?;
    evs_ledger::migrate(&pool).await?;

    let tenant = Uuid::new_v4();
    let bad = NewEvent {
        event_type: EventType::AnalyticsDeltaApply,
        payload: json!({"deltas": {"total": 1}, "transcript": "raw meeting text"}),
        idempotency_key: Some("bad-1".to_string()),
        origin_hash: None,
        vector_clock: VectorClock::new(),
    };

    let err = evs_ledger::submit(&pool, tenant, &bad).await.unwrap_err();
    assert!(
        err.downcast_ref::<evs_ledger::GovernanceViolation>().is_some(),
        "expected a governance violation, got: {err:#}"
    );

    // Rejected before commit: no event, no sequence consumed.
    assert_eq!(evs_ledger::get_latest_sequence(&pool, tenant).await?, 0);
    assert!(evs_ledger::read_since(&pool, tenant, 0, 10).await?.is_empty());

    Ok(())
}
