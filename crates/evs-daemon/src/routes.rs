//! Axum router and all HTTP handlers for evs-daemon.
//!
//! `build_router` is the single entry point; `main.rs` calls it and attaches
//! middleware layers. All handlers are `pub(crate)` so the scenario tests in
//! `tests/` can compose the router directly.

use std::{convert::Infallible, sync::Arc};

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{
        sse::{Event as SseEvent, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use evs_broadcast::RoomMsg;
use futures_util::{Stream, StreamExt};
use serde_json::{Map, Value};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    api_types::{
        HealthResponse, IdleSyncRequest, IdleSyncResponse, RefusedResponse, ReplayParams,
        ReplayResponse, SequenceResponse, SnapshotParams, SnapshotResponse, StatusResponse,
        SubmitRequest, SubmitResponse,
    },
    snapshot,
    state::{uptime_secs, AppState},
};

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Build the complete application router wired to the given shared state.
///
/// Middleware layers (CORS, tracing) are **not** applied here; `main.rs`
/// attaches them after this call so tests can use the bare router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/status", get(status_handler))
        .route("/v1/events", post(submit_event))
        .route("/v1/replay", get(replay_handler))
        .route("/v1/sequence/:tenant_id", get(latest_sequence))
        .route("/v1/snapshot", get(snapshot_handler))
        .route("/v1/sync/idle", post(idle_sync))
        .route("/v1/stream/:tenant_id", get(stream))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// GET /v1/health
// ---------------------------------------------------------------------------

pub(crate) async fn health(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            ok: true,
            service: st.build.service,
            version: st.build.version,
        }),
    )
}

// ---------------------------------------------------------------------------
// GET /v1/status
// ---------------------------------------------------------------------------

pub(crate) async fn status_handler(State(st): State<Arc<AppState>>) -> Response {
    let db = match evs_ledger::status(&st.pool).await {
        Ok(s) => s,
        Err(e) => {
            warn!("status db probe failed: {e:#}");
            return (
                StatusCode::OK,
                Json(StatusResponse {
                    daemon_uptime_secs: uptime_secs(),
                    db_ok: false,
                    has_events_table: false,
                }),
            )
                .into_response();
        }
    };

    (
        StatusCode::OK,
        Json(StatusResponse {
            daemon_uptime_secs: uptime_secs(),
            db_ok: db.ok,
            has_events_table: db.has_events_table,
        }),
    )
        .into_response()
}

// ---------------------------------------------------------------------------
// POST /v1/events
// ---------------------------------------------------------------------------

/// Submit one event for sequencing and commit.
///
/// Refusals are structured, never silent:
/// - 409 when the caller claims a sequence checkpoint ahead of the server;
/// - 422 when the payload violates the governance gate;
/// - 500 for infrastructure failures.
pub(crate) async fn submit_event(
    State(st): State<Arc<AppState>>,
    Json(req): Json<SubmitRequest>,
) -> Response {
    if let Some(observed) = req.observed_sequence_num {
        let latest = match evs_ledger::get_latest_sequence(&st.pool, req.tenant_id).await {
            Ok(v) => v,
            Err(e) => return internal_error("latest-sequence lookup", e),
        };
        if let Err(reg) = evs_ledger::assert_caller_sequence(observed, latest) {
            return (
                StatusCode::CONFLICT,
                Json(RefusedResponse {
                    error: reg.to_string(),
                    refused_by: "sequence_regression".to_string(),
                }),
            )
                .into_response();
        }
    }

    let new = evs_schemas::NewEvent {
        event_type: req.event_type,
        payload: req.payload,
        idempotency_key: req.idempotency_key,
        origin_hash: req.origin_hash,
        vector_clock: req.vector_clock,
    };

    let outcome = match evs_ledger::submit(&st.pool, req.tenant_id, &new).await {
        Ok(o) => o,
        Err(e) => {
            if let Some(gv) = e.downcast_ref::<evs_ledger::GovernanceViolation>() {
                return (
                    StatusCode::UNPROCESSABLE_ENTITY,
                    Json(RefusedResponse {
                        error: gv.to_string(),
                        refused_by: "governance".to_string(),
                    }),
                )
                    .into_response();
            }
            return internal_error("event submit", e);
        }
    };

    let existing = !outcome.was_created();
    let event = outcome.into_event();
    info!(
        tenant = %event.tenant_id,
        seq = event.sequence_num,
        event_type = event.event_type.as_str(),
        existing,
        "event committed"
    );

    (
        StatusCode::OK,
        Json(SubmitResponse {
            event_id: event.id,
            sequence_num: event.sequence_num,
            checksum: event.checksum,
            status: event.status,
            existing,
        }),
    )
        .into_response()
}

// ---------------------------------------------------------------------------
// GET /v1/replay
// ---------------------------------------------------------------------------

pub(crate) async fn replay_handler(
    State(st): State<Arc<AppState>>,
    Query(params): Query<ReplayParams>,
) -> Response {
    let ledger = st.ledger();
    let result = match evs_replay::replay(
        &ledger,
        params.tenant_id,
        params.last_sequence_num,
        params.is_initial_sync,
        st.replay,
    )
    .await
    {
        Ok(r) => r,
        Err(e) => return internal_error("replay", e),
    };

    if result.truncated {
        warn!(
            tenant = %params.tenant_id,
            returned = result.total_events,
            "replay truncated at cap; client must re-bootstrap"
        );
    }

    (
        StatusCode::OK,
        Json(ReplayResponse {
            total_events: result.total_events,
            last_sequence_num: result.last_sequence_num,
            truncated: result.truncated,
            events: result.events,
        }),
    )
        .into_response()
}

// ---------------------------------------------------------------------------
// GET /v1/sequence/:tenant_id
// ---------------------------------------------------------------------------

pub(crate) async fn latest_sequence(
    State(st): State<Arc<AppState>>,
    Path(tenant_id): Path<Uuid>,
) -> Response {
    match evs_ledger::get_latest_sequence(&st.pool, tenant_id).await {
        Ok(latest) => (
            StatusCode::OK,
            Json(SequenceResponse {
                tenant_id,
                latest_sequence_num: latest,
            }),
        )
            .into_response(),
        Err(e) => internal_error("latest-sequence lookup", e),
    }
}

// ---------------------------------------------------------------------------
// GET /v1/snapshot
// ---------------------------------------------------------------------------

pub(crate) async fn snapshot_handler(
    State(st): State<Arc<AppState>>,
    Query(params): Query<SnapshotParams>,
) -> Response {
    match snapshot::materialize(&st.pool, params.tenant_id).await {
        Ok(m) => (
            StatusCode::OK,
            Json(SnapshotResponse {
                data: m.data,
                checksums: m.checksums,
                etag: m.etag,
                as_of_sequence_num: m.as_of_sequence_num,
            }),
        )
            .into_response(),
        Err(e) => internal_error("snapshot materialize", e),
    }
}

// ---------------------------------------------------------------------------
// POST /v1/sync/idle
// ---------------------------------------------------------------------------

/// Cheap staleness probe plus optional catch-up delta.
///
/// A matching ETag answers `stale=false` with zero payload. On a mismatch
/// the response carries a delta against the client's base snapshot when its
/// claimed checksum verifies, or against an empty base (full re-fetch
/// semantics) when it does not.
pub(crate) async fn idle_sync(
    State(st): State<Arc<AppState>>,
    Json(req): Json<IdleSyncRequest>,
) -> Response {
    let current = match snapshot::materialize(&st.pool, req.tenant_id).await {
        Ok(m) => m,
        Err(e) => return internal_error("idle-sync materialize", e),
    };

    if req.client_etag == current.etag {
        return (
            StatusCode::OK,
            Json(IdleSyncResponse {
                stale: false,
                delta: None,
                etag: current.etag,
                forced_full: false,
            }),
        )
            .into_response();
    }

    let (base, forced_full) = match (&req.base_snapshot, &req.base_checksum) {
        (Some(base), Some(claimed)) => {
            let recomputed = evs_reconcile::checksum(base);
            if &recomputed == claimed {
                (base.clone(), false)
            } else {
                // Client cache cannot be trusted; diff from scratch so the
                // delta rebuilds everything.
                warn!(
                    tenant = %req.tenant_id,
                    claimed, recomputed,
                    "base snapshot checksum mismatch; forcing full delta"
                );
                (Value::Object(Map::new()), true)
            }
        }
        (Some(base), None) => (base.clone(), false),
        _ => (Value::Object(Map::new()), false),
    };

    let delta = evs_reconcile::delta(&base, &current.data);
    (
        StatusCode::OK,
        Json(IdleSyncResponse {
            stale: true,
            delta: Some(delta),
            etag: current.etag,
            forced_full,
        }),
    )
        .into_response()
}

// ---------------------------------------------------------------------------
// GET /v1/stream/:tenant_id  (SSE)
// ---------------------------------------------------------------------------

pub(crate) async fn stream(
    State(st): State<Arc<AppState>>,
    Path(tenant_id): Path<Uuid>,
) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert("Cache-Control", HeaderValue::from_static("no-cache"));
    headers.insert("Connection", HeaderValue::from_static("keep-alive"));

    let rx = st.rooms.subscribe(tenant_id).await;
    let events = room_to_sse(rx);

    (headers, Sse::new(events).keep_alive(KeepAlive::new())).into_response()
}

fn room_to_sse(
    rx: broadcast::Receiver<RoomMsg>,
) -> impl Stream<Item = Result<SseEvent, Infallible>> {
    BroadcastStream::new(rx).filter_map(|msg| async move {
        match msg {
            Ok(m) => {
                let event_name = match &m {
                    RoomMsg::Event { .. } => "event",
                    RoomMsg::KpiDelta { .. } => "kpi_delta",
                    RoomMsg::KpiSnapshot { .. } => "kpi_snapshot",
                };
                let data = serde_json::to_string(&m).ok()?;
                Some(Ok(SseEvent::default().event(event_name).data(data)))
            }
            Err(_) => None, // lagged / closed
        }
    })
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn internal_error(what: &str, e: anyhow::Error) -> Response {
    warn!("{what} failed: {e:#}");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(RefusedResponse {
            error: format!("{what} failed"),
            refused_by: "internal".to_string(),
        }),
    )
        .into_response()
}
