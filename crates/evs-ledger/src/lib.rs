//! Event ledger + sequencer + content dedup over Postgres.
//!
//! The ledger is the single source of truth for "what happened and in what
//! order". Sequence numbers are reserved through a transactional per-tenant
//! counter row, so ordering holds across multiple service instances — there
//! is deliberately no process-local counter here.

use anyhow::{Context, Result};
use evs_schemas::{Event, EventStatus, EventType, NewEvent, VectorClock};
use serde_json::Value;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

pub mod error;
pub mod governance;

pub use error::{assert_caller_sequence, SequenceRegression};
pub use governance::{check_payload, GovernanceViolation, RESTRICTED_FIELDS};

pub const ENV_DB_URL: &str = "EVS_DATABASE_URL";

/// Connect to Postgres using EVS_DATABASE_URL.
pub async fn connect_from_env() -> Result<PgPool> {
    let url =
        std::env::var(ENV_DB_URL).with_context(|| format!("missing env var {ENV_DB_URL}"))?;
    connect(&url).await
}

/// Connect to Postgres at the given URL.
pub async fn connect(url: &str) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(url)
        .await
        .context("failed to connect to Postgres")?;
    Ok(pool)
}

/// Run embedded SQLx migrations.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("db migrate failed")?;
    Ok(())
}

/// Simple status query (connectivity + schema presence).
pub async fn status(pool: &PgPool) -> Result<DbStatus> {
    let (one,): (i32,) = sqlx::query_as::<_, (i32,)>("select 1")
        .fetch_one(pool)
        .await
        .context("status connectivity query failed")?;

    let (exists,): (bool,) = sqlx::query_as::<_, (bool,)>(
        r#"
        select exists (
            select 1
            from information_schema.tables
            where table_schema='public' and table_name='events'
        )
        "#,
    )
    .fetch_one(pool)
    .await
    .context("status table-exists query failed")?;

    Ok(DbStatus {
        ok: one == 1,
        has_events_table: exists,
    })
}

#[derive(Debug, Clone)]
pub struct DbStatus {
    pub ok: bool,
    pub has_events_table: bool,
}

// ---------------------------------------------------------------------------
// Submission
// ---------------------------------------------------------------------------

/// Outcome of a submission. Duplicate submission is an expected, successful
/// outcome, not an error path.
#[derive(Debug, Clone)]
pub enum SubmitOutcome {
    /// A new event was committed with a freshly reserved sequence number.
    Created(Event),
    /// An already-committed event absorbed this submission; no sequence
    /// number was consumed.
    Existing(Event),
}

impl SubmitOutcome {
    pub fn event(&self) -> &Event {
        match self {
            SubmitOutcome::Created(e) | SubmitOutcome::Existing(e) => e,
        }
    }

    pub fn into_event(self) -> Event {
        match self {
            SubmitOutcome::Created(e) | SubmitOutcome::Existing(e) => e,
        }
    }

    pub fn was_created(&self) -> bool {
        matches!(self, SubmitOutcome::Created(_))
    }
}

/// Atomically reserve the next sequence number for a tenant.
///
/// The `insert .. on conflict do update .. returning` form takes a row lock
/// on the tenant's counter, so concurrent submitters for the same tenant
/// serialize here and nowhere else.
async fn reserve_sequence(tx: &mut Transaction<'_, Postgres>, tenant_id: Uuid) -> Result<i64> {
    let (seq,): (i64,) = sqlx::query_as::<_, (i64,)>(
        r#"
        insert into sequence_counters (tenant_id, next_seq)
        values ($1, 1)
        on conflict (tenant_id)
        do update set next_seq = sequence_counters.next_seq + 1
        returning next_seq
        "#,
    )
    .bind(tenant_id)
    .fetch_one(&mut **tx)
    .await
    .context("reserve_sequence failed")?;
    Ok(seq)
}

/// Insert a PENDING event with a freshly reserved sequence number.
///
/// Part of the two-phase API: the caller performs its paired business write
/// in the same transaction, then calls [`mark_completed`]. If the business
/// write fails the transaction rolls back and neither row exists — atomic
/// truth. The payload checksum is computed here, at commit time.
pub async fn begin_submit(
    tx: &mut Transaction<'_, Postgres>,
    tenant_id: Uuid,
    new: &NewEvent,
) -> Result<Event> {
    governance::check_payload(&new.payload)?;

    let sequence_num = reserve_sequence(tx, tenant_id).await?;
    let event = Event {
        id: Uuid::new_v4(),
        tenant_id,
        sequence_num,
        event_type: new.event_type,
        payload: new.payload.clone(),
        vector_clock: new.vector_clock.clone(),
        idempotency_key: new.idempotency_key.clone(),
        origin_hash: new.origin_hash.clone(),
        status: EventStatus::Pending,
        checksum: evs_reconcile::checksum(&new.payload),
        created_at: chrono::Utc::now(),
    };

    sqlx::query(
        r#"
        insert into events (
          id, tenant_id, sequence_num, event_type, payload, vector_clock,
          idempotency_key, origin_hash, status, checksum, created_at
        ) values (
          $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11
        )
        "#,
    )
    .bind(event.id)
    .bind(event.tenant_id)
    .bind(event.sequence_num)
    .bind(event.event_type.as_str())
    .bind(&event.payload)
    .bind(serde_json::to_value(&event.vector_clock).unwrap_or(Value::Object(Default::default())))
    .bind(&event.idempotency_key)
    .bind(&event.origin_hash)
    .bind(event.status.as_str())
    .bind(&event.checksum)
    .bind(event.created_at)
    .execute(&mut **tx)
    .await
    .context("begin_submit insert failed")?;

    Ok(event)
}

/// Transition a PENDING event to COMPLETED.
///
/// The partial unique indexes on idempotency_key and origin_hash apply to
/// COMPLETED rows, so a concurrent duplicate surfaces here as a unique
/// violation — callers of the two-phase API should treat that as "resolved
/// to the existing event", same as [`submit`] does.
pub async fn mark_completed(tx: &mut Transaction<'_, Postgres>, event_id: Uuid) -> Result<()> {
    mark_completed_raw(tx, event_id)
        .await
        .context("mark_completed update failed")?;
    Ok(())
}

async fn mark_completed_raw(
    tx: &mut Transaction<'_, Postgres>,
    event_id: Uuid,
) -> std::result::Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        update events
        set status = 'COMPLETED'
        where id = $1 and status = 'PENDING'
        "#,
    )
    .bind(event_id)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Transition a PENDING event to FAILED (terminal; excluded from all reads,
/// replays and broadcasts).
pub async fn mark_failed(pool: &PgPool, event_id: Uuid) -> Result<()> {
    sqlx::query(
        r#"
        update events
        set status = 'FAILED'
        where id = $1 and status = 'PENDING'
        "#,
    )
    .bind(event_id)
    .execute(pool)
    .await
    .context("mark_failed update failed")?;
    Ok(())
}

/// Submit an event whose only business effect is the ledger record itself
/// (analytics deltas, task events whose row writes are driven off the
/// ledger).
///
/// Order of checks:
/// 1. governance gate (rejected before anything is written);
/// 2. idempotency key among COMPLETED events — request-identity dedup,
///    cheapest, checked first;
/// 3. origin hash among COMPLETED events — business-content dedup;
/// 4. transactional sequence reservation + insert + completion.
///
/// A concurrent duplicate that slips past the pre-checks hits the partial
/// unique index at completion time and is resolved to the existing event.
pub async fn submit(pool: &PgPool, tenant_id: Uuid, new: &NewEvent) -> Result<SubmitOutcome> {
    governance::check_payload(&new.payload)?;

    if let Some(key) = &new.idempotency_key {
        if let Some(existing) = find_completed_by_idempotency_key(pool, tenant_id, key).await? {
            return Ok(SubmitOutcome::Existing(existing));
        }
    }
    if let Some(hash) = &new.origin_hash {
        if let Some(existing) = find_by_origin_hash(pool, tenant_id, hash).await? {
            return Ok(SubmitOutcome::Existing(existing));
        }
    }

    let mut tx = pool.begin().await.context("submit begin tx failed")?;
    let mut event = begin_submit(&mut tx, tenant_id, new).await?;

    match mark_completed_raw(&mut tx, event.id).await {
        Ok(()) => {}
        Err(e) => {
            if is_unique_violation(&e, "uq_events_tenant_idempotency")
                || is_unique_violation(&e, "uq_events_tenant_origin_hash")
            {
                tx.rollback().await.ok();
                return resolve_duplicate(pool, tenant_id, new).await;
            }
            return Err(anyhow::Error::new(e).context("submit completion failed"));
        }
    }

    tx.commit().await.context("submit commit failed")?;
    event.status = EventStatus::Completed;
    Ok(SubmitOutcome::Created(event))
}

/// After losing a duplicate race, fetch the event that won.
async fn resolve_duplicate(
    pool: &PgPool,
    tenant_id: Uuid,
    new: &NewEvent,
) -> Result<SubmitOutcome> {
    if let Some(key) = &new.idempotency_key {
        if let Some(existing) = find_completed_by_idempotency_key(pool, tenant_id, key).await? {
            return Ok(SubmitOutcome::Existing(existing));
        }
    }
    if let Some(hash) = &new.origin_hash {
        if let Some(existing) = find_by_origin_hash(pool, tenant_id, hash).await? {
            return Ok(SubmitOutcome::Existing(existing));
        }
    }
    anyhow::bail!("duplicate submission detected but winning event not found");
}

/// Detect a Postgres unique constraint violation by name.
fn is_unique_violation(err: &sqlx::Error, constraint: &str) -> bool {
    match err {
        sqlx::Error::Database(db_err) => {
            db_err.constraint() == Some(constraint)
                || db_err.code().as_deref() == Some("23505")
                    && db_err.constraint() == Some(constraint)
        }
        _ => false,
    }
}

// ---------------------------------------------------------------------------
// Reads — only COMPLETED events are visible on any read path
// ---------------------------------------------------------------------------

const EVENT_COLUMNS: &str = r#"
  id, tenant_id, sequence_num, event_type, payload, vector_clock,
  idempotency_key, origin_hash, status, checksum, created_at
"#;

/// Ordered tail read: COMPLETED events with `sequence_num > after_seq`,
/// ascending, at most `limit` rows. Used by both the broadcaster tail and
/// offline replay.
pub async fn read_since(
    pool: &PgPool,
    tenant_id: Uuid,
    after_seq: i64,
    limit: i64,
) -> Result<Vec<Event>> {
    let rows = sqlx::query(&format!(
        r#"
        select {EVENT_COLUMNS}
        from events
        where tenant_id = $1
          and status = 'COMPLETED'
          and sequence_num > $2
        order by sequence_num asc
        limit $3
        "#
    ))
    .bind(tenant_id)
    .bind(after_seq)
    .bind(limit)
    .fetch_all(pool)
    .await
    .context("read_since failed")?;

    rows.iter().map(event_from_row).collect()
}

/// Latest COMPLETED sequence number for a tenant; 0 when none exist.
/// Clients use this to checkpoint before subscribing.
pub async fn get_latest_sequence(pool: &PgPool, tenant_id: Uuid) -> Result<i64> {
    let (seq,): (i64,) = sqlx::query_as::<_, (i64,)>(
        r#"
        select coalesce(max(sequence_num), 0)
        from events
        where tenant_id = $1 and status = 'COMPLETED'
        "#,
    )
    .bind(tenant_id)
    .fetch_one(pool)
    .await
    .context("get_latest_sequence failed")?;
    Ok(seq)
}

pub async fn find_completed_by_idempotency_key(
    pool: &PgPool,
    tenant_id: Uuid,
    key: &str,
) -> Result<Option<Event>> {
    let row = sqlx::query(&format!(
        r#"
        select {EVENT_COLUMNS}
        from events
        where tenant_id = $1 and idempotency_key = $2 and status = 'COMPLETED'
        "#
    ))
    .bind(tenant_id)
    .bind(key)
    .fetch_optional(pool)
    .await
    .context("find_completed_by_idempotency_key failed")?;

    row.as_ref().map(event_from_row).transpose()
}

/// Content-level dedup lookup. Two submissions carrying the same origin
/// hash converge on the first committed event regardless of differing
/// free-text fields.
pub async fn find_by_origin_hash(
    pool: &PgPool,
    tenant_id: Uuid,
    origin_hash: &str,
) -> Result<Option<Event>> {
    let row = sqlx::query(&format!(
        r#"
        select {EVENT_COLUMNS}
        from events
        where tenant_id = $1 and origin_hash = $2 and status = 'COMPLETED'
        "#
    ))
    .bind(tenant_id)
    .bind(origin_hash)
    .fetch_optional(pool)
    .await
    .context("find_by_origin_hash failed")?;

    row.as_ref().map(event_from_row).transpose()
}

fn event_from_row(row: &PgRow) -> Result<Event> {
    let vector_clock: VectorClock =
        serde_json::from_value(row.try_get::<Value, _>("vector_clock")?)
            .context("vector_clock column is not a valid clock map")?;

    Ok(Event {
        id: row.try_get("id")?,
        tenant_id: row.try_get("tenant_id")?,
        sequence_num: row.try_get("sequence_num")?,
        event_type: EventType::parse(&row.try_get::<String, _>("event_type")?)?,
        payload: row.try_get("payload")?,
        vector_clock,
        idempotency_key: row.try_get("idempotency_key")?,
        origin_hash: row.try_get("origin_hash")?,
        status: EventStatus::parse(&row.try_get::<String, _>("status")?)?,
        checksum: row.try_get("checksum")?,
        created_at: row.try_get("created_at")?,
    })
}
