//! In-process scenario tests for evs-daemon HTTP endpoints.
//!
//! These tests spin up the Axum router **without** binding a TCP socket.
//! Each test calls `routes::build_router` and drives it via
//! `tower::ServiceExt::oneshot` — no network I/O required. Routes that need
//! a live database use the skip-if-unconfigured pattern; the rest run
//! against a lazy pool that never dials.

use std::sync::Arc;

use axum::http::{Request, StatusCode};
use evs_daemon::{routes, state};
use http_body_util::BodyExt;
use serde_json::json;
use tower::ServiceExt; // oneshot
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Router over a lazy pool: DB-free routes work, DB routes would 500.
fn make_router() -> axum::Router {
    let st = state::AppState::with_lazy_pool("postgres://localhost/evs_unused")
        .expect("lazy pool construction cannot dial");
    routes::build_router(Arc::new(st))
}

/// Router over the configured test database, or None to skip.
async fn make_db_router() -> Option<(axum::Router, sqlx::PgPool)> {
    let url = match std::env::var(evs_ledger::ENV_DB_URL) {
        Ok(v) => v,
        Err(_) => {
            eprintln!("SKIP: EVS_DATABASE_URL not set");
            return None;
        }
    };
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(4)
        .connect(&url)
        .await
        .expect("connect test db");
    evs_ledger::migrate(&pool).await.expect("migrate test db");

    let st = Arc::new(state::AppState::new(
        pool.clone(),
        evs_replay::ReplayConfig::default(),
        256,
    ));
    Some((routes::build_router(st), pool))
}

/// Drive the router with a single request and return (status, body_bytes).
async fn call(router: axum::Router, req: Request<axum::body::Body>) -> (StatusCode, bytes::Bytes) {
    let resp = router.oneshot(req).await.expect("oneshot failed");
    let status = resp.status();
    let body = resp
        .into_body()
        .collect()
        .await
        .expect("body collect failed")
        .to_bytes();
    (status, body)
}

fn parse_json(b: bytes::Bytes) -> serde_json::Value {
    serde_json::from_slice(&b).expect("body is not valid JSON")
}

fn get(uri: &str) -> Request<axum::body::Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(axum::body::Body::empty())
        .unwrap()
}

fn post_json(uri: &str, body: &serde_json::Value) -> Request<axum::body::Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(axum::body::Body::from(body.to_string()))
        .unwrap()
}

// ---------------------------------------------------------------------------
// GET /v1/health
// ---------------------------------------------------------------------------

#[tokio::test]
async fn health_returns_200_ok_true() {
    let (status, body) = call(make_router(), get("/v1/health")).await;
    assert_eq!(status, StatusCode::OK);

    let json = parse_json(body);
    assert_eq!(json["ok"], true);
    assert_eq!(json["service"], "evs-daemon");
}

// ---------------------------------------------------------------------------
// POST /v1/events — refusals
// ---------------------------------------------------------------------------

#[tokio::test]
async fn governance_violation_is_refused_with_422() {
    let Some((router, _pool)) = make_db_router().await else {
        return;
    };

    let body = json!({
        "tenant_id": Uuid::new_v4(),
        "event_type": "ANALYTICS_DELTA_APPLY",
        "payload": {"deltas": {"total": 1.0}, "raw_transcript": "secret"},
    });
    let (status, resp) = call(router, post_json("/v1/events", &body)).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let json = parse_json(resp);
    assert_eq!(json["refused_by"], "governance");
    assert!(json["error"].as_str().unwrap().contains("raw_transcript"));
}

#[tokio::test]
async fn sequence_claim_ahead_of_server_is_a_409() {
    let Some((router, _pool)) = make_db_router().await else {
        return;
    };

    let body = json!({
        "tenant_id": Uuid::new_v4(),
        "event_type": "TASK_CREATED",
        "payload": {"task_id": Uuid::new_v4(), "title": "x"},
        "observed_sequence_num": 40,
    });
    let (status, resp) = call(router, post_json("/v1/events", &body)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(parse_json(resp)["refused_by"], "sequence_regression");
}

// ---------------------------------------------------------------------------
// Submit → replay → sequence round trip
// ---------------------------------------------------------------------------

#[tokio::test]
async fn submitted_events_are_replayable_in_order() {
    let Some((router, _pool)) = make_db_router().await else {
        return;
    };
    let tenant = Uuid::new_v4();

    for i in 0..3 {
        let body = json!({
            "tenant_id": tenant,
            "event_type": "TASK_CREATED",
            "payload": {"task_id": Uuid::new_v4(), "title": format!("task {i}")},
            "idempotency_key": format!("k{i}"),
        });
        let (status, resp) = call(router.clone(), post_json("/v1/events", &body)).await;
        assert_eq!(status, StatusCode::OK);
        let json = parse_json(resp);
        assert_eq!(json["sequence_num"], i + 1);
        assert_eq!(json["existing"], false);
        assert_eq!(json["status"], "COMPLETED");
    }

    // Retry of the first key resolves to the original event.
    let retry = json!({
        "tenant_id": tenant,
        "event_type": "TASK_CREATED",
        "payload": {"task_id": Uuid::new_v4(), "title": "task 0 retried"},
        "idempotency_key": "k0",
    });
    let (status, resp) = call(router.clone(), post_json("/v1/events", &retry)).await;
    assert_eq!(status, StatusCode::OK);
    let json = parse_json(resp);
    assert_eq!(json["sequence_num"], 1);
    assert_eq!(json["existing"], true);

    let (status, resp) = call(
        router.clone(),
        get(&format!("/v1/replay?tenant_id={tenant}&last_sequence_num=0")),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let json = parse_json(resp);
    assert_eq!(json["total_events"], 3);
    assert_eq!(json["truncated"], false);
    assert_eq!(json["last_sequence_num"], 3);
    let seqs: Vec<i64> = json["events"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["sequence_num"].as_i64().unwrap())
        .collect();
    assert_eq!(seqs, vec![1, 2, 3]);

    let (status, resp) = call(router, get(&format!("/v1/sequence/{tenant}"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(parse_json(resp)["latest_sequence_num"], 3);
}

// ---------------------------------------------------------------------------
// Snapshot + idle sync
// ---------------------------------------------------------------------------

#[tokio::test]
async fn idle_sync_short_circuits_on_matching_etag() {
    let Some((router, _pool)) = make_db_router().await else {
        return;
    };
    let tenant = Uuid::new_v4();

    let submit = json!({
        "tenant_id": tenant,
        "event_type": "ANALYTICS_DELTA_APPLY",
        "payload": {"deltas": {"total": 10.0}},
    });
    let (status, _) = call(router.clone(), post_json("/v1/events", &submit)).await;
    assert_eq!(status, StatusCode::OK);

    let (status, resp) = call(
        router.clone(),
        get(&format!("/v1/snapshot?tenant_id={tenant}")),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let snap = parse_json(resp);
    assert_eq!(snap["data"]["kpis"]["total"], json!(10.0));
    let etag = snap["etag"].as_str().unwrap().to_string();

    // Fresh client: etag matches, zero payload.
    let idle = json!({"tenant_id": tenant, "client_etag": etag});
    let (status, resp) = call(router.clone(), post_json("/v1/sync/idle", &idle)).await;
    assert_eq!(status, StatusCode::OK);
    let json = parse_json(resp);
    assert_eq!(json["stale"], false);
    assert!(json.get("delta").is_none(), "no payload when fresh");

    // New KPI event staleness: delta against the client's base snapshot.
    let submit2 = json!({
        "tenant_id": tenant,
        "event_type": "ANALYTICS_DELTA_APPLY",
        "payload": {"deltas": {"total": 2.0}},
    });
    let (status, _) = call(router.clone(), post_json("/v1/events", &submit2)).await;
    assert_eq!(status, StatusCode::OK);

    let idle2 = json!({
        "tenant_id": tenant,
        "client_etag": etag,
        "base_snapshot": snap["data"],
        "base_checksum": snap["checksums"]["full"],
    });
    let (status, resp) = call(router, post_json("/v1/sync/idle", &idle2)).await;
    assert_eq!(status, StatusCode::OK);
    let json = parse_json(resp);
    assert_eq!(json["stale"], true);
    assert_eq!(json["forced_full"], false);
    assert_eq!(json["delta"]["changes"]["kpis"]["total"], json!(12.0));
}

#[tokio::test]
async fn idle_sync_distrusts_mismatched_base_checksum() {
    let Some((router, _pool)) = make_db_router().await else {
        return;
    };
    let tenant = Uuid::new_v4();

    let submit = json!({
        "tenant_id": tenant,
        "event_type": "ANALYTICS_DELTA_APPLY",
        "payload": {"deltas": {"total": 5.0}},
    });
    let (status, _) = call(router.clone(), post_json("/v1/events", &submit)).await;
    assert_eq!(status, StatusCode::OK);

    let idle = json!({
        "tenant_id": tenant,
        "client_etag": "stale-etag",
        "base_snapshot": {"kpis": {"total": 999.0}},
        "base_checksum": "not-the-real-checksum",
    });
    let (status, resp) = call(router, post_json("/v1/sync/idle", &idle)).await;
    assert_eq!(status, StatusCode::OK);
    let json = parse_json(resp);
    assert_eq!(json["stale"], true);
    assert_eq!(json["forced_full"], true, "bad checksum forces full delta");
    // Full delta rebuilds the kpis section from scratch.
    assert_eq!(json["delta"]["changes"]["kpis"]["total"], json!(5.0));
}
