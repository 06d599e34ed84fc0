//! Shared runtime state for evs-daemon.
//!
//! Handlers receive `State<Arc<AppState>>` from Axum. The broadcaster is an
//! explicit handle owned here — constructed once at startup and passed by
//! reference, never a module-level singleton.

use evs_broadcast::Broadcaster;
use evs_replay::{LedgerRead, ReplayConfig};
use evs_schemas::Event;
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

/// Static build metadata included in health / status responses.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BuildInfo {
    pub service: &'static str,
    pub version: &'static str,
}

/// Cloneable (Arc) handle shared across all Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub rooms: Arc<Broadcaster>,
    pub build: BuildInfo,
    pub replay: ReplayConfig,
}

impl AppState {
    pub fn new(pool: PgPool, replay: ReplayConfig, room_capacity: usize) -> Self {
        Self {
            pool,
            rooms: Arc::new(Broadcaster::new(room_capacity)),
            build: BuildInfo {
                service: "evs-daemon",
                version: env!("CARGO_PKG_VERSION"),
            },
            replay,
        }
    }

    /// State backed by a lazy pool that never dials until a query runs.
    /// Lets router tests exercise DB-free routes without a database.
    pub fn with_lazy_pool(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(2)
            .connect_lazy(database_url)?;
        Ok(Self::new(pool, ReplayConfig::default(), 256))
    }

    /// The replay engine's view of the Postgres ledger.
    pub fn ledger(&self) -> PgLedger {
        PgLedger {
            pool: self.pool.clone(),
        }
    }
}

/// Adapter giving the Postgres ledger the replay read contract.
#[derive(Clone)]
pub struct PgLedger {
    pool: PgPool,
}

impl LedgerRead for PgLedger {
    async fn read_since(
        &self,
        tenant_id: Uuid,
        after_seq: i64,
        limit: i64,
    ) -> anyhow::Result<Vec<Event>> {
        evs_ledger::read_since(&self.pool, tenant_id, after_seq, limit).await
    }

    async fn get_latest_sequence(&self, tenant_id: Uuid) -> anyhow::Result<i64> {
        evs_ledger::get_latest_sequence(&self.pool, tenant_id).await
    }
}

/// Monotonically increasing uptime since first call (process lifetime).
pub fn uptime_secs() -> u64 {
    static START: std::sync::OnceLock<std::time::Instant> = std::sync::OnceLock::new();
    START
        .get_or_init(std::time::Instant::now)
        .elapsed()
        .as_secs()
}
