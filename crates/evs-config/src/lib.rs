//! Runtime configuration for the sync daemon, read once from the
//! environment at startup and passed by value from there on.

use anyhow::{bail, Context, Result};
use std::net::SocketAddr;

pub const ENV_DB_URL: &str = "EVS_DATABASE_URL";
pub const ENV_DAEMON_ADDR: &str = "EVS_DAEMON_ADDR";
pub const ENV_REPLAY_BATCH: &str = "EVS_REPLAY_BATCH";
pub const ENV_REPLAY_CAP: &str = "EVS_REPLAY_CAP";
pub const ENV_ROOM_CAPACITY: &str = "EVS_ROOM_CAPACITY";

const DEFAULT_ADDR: ([u8; 4], u16) = ([127, 0, 0, 1], 8900);
const DEFAULT_REPLAY_BATCH: i64 = 500;
const DEFAULT_REPLAY_CAP: usize = 5000;
const DEFAULT_ROOM_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_addr: SocketAddr,
    /// Rows per replay batch query.
    pub replay_batch: i64,
    /// Hard cap on events per replay call.
    pub replay_cap: usize,
    /// Broadcast channel capacity per tenant room.
    pub room_capacity: usize,
}

impl Config {
    /// Read and validate the full configuration from the environment.
    pub fn from_env() -> Result<Self> {
        let database_url =
            std::env::var(ENV_DB_URL).with_context(|| format!("missing env var {ENV_DB_URL}"))?;

        Self::from_parts(
            database_url,
            std::env::var(ENV_DAEMON_ADDR).ok(),
            std::env::var(ENV_REPLAY_BATCH).ok(),
            std::env::var(ENV_REPLAY_CAP).ok(),
            std::env::var(ENV_ROOM_CAPACITY).ok(),
        )
    }

    /// Pure assembly/validation; split out so tests do not mutate process
    /// environment.
    fn from_parts(
        database_url: String,
        addr: Option<String>,
        replay_batch: Option<String>,
        replay_cap: Option<String>,
        room_capacity: Option<String>,
    ) -> Result<Self> {
        let bind_addr = match addr {
            Some(raw) => raw
                .parse()
                .with_context(|| format!("invalid {ENV_DAEMON_ADDR}: {raw}"))?,
            None => SocketAddr::from(DEFAULT_ADDR),
        };

        let replay_batch = parse_or(replay_batch, DEFAULT_REPLAY_BATCH, ENV_REPLAY_BATCH)?;
        let replay_cap = parse_or(replay_cap, DEFAULT_REPLAY_CAP, ENV_REPLAY_CAP)?;
        let room_capacity = parse_or(room_capacity, DEFAULT_ROOM_CAPACITY, ENV_ROOM_CAPACITY)?;

        if replay_batch <= 0 {
            bail!("{ENV_REPLAY_BATCH} must be > 0, got {replay_batch}");
        }
        if replay_cap == 0 {
            bail!("{ENV_REPLAY_CAP} must be > 0");
        }
        if replay_batch as usize > replay_cap {
            bail!(
                "{ENV_REPLAY_BATCH} ({replay_batch}) must not exceed {ENV_REPLAY_CAP} ({replay_cap})"
            );
        }

        Ok(Self {
            database_url,
            bind_addr,
            replay_batch,
            replay_cap,
            room_capacity,
        })
    }
}

fn parse_or<T: std::str::FromStr>(raw: Option<String>, default: T, name: &str) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match raw {
        Some(s) => s.parse().with_context(|| format!("invalid {name}: {s}")),
        None => Ok(default),
    }
}
