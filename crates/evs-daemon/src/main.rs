//! evs-daemon entry point.
//!
//! This file is intentionally thin: it sets up tracing, loads config,
//! connects and migrates the ledger, wires middleware, spawns the ledger
//! tail and starts the HTTP server. All route handlers live in `routes.rs`;
//! shared state lives in `state.rs`.

use std::{sync::Arc, time::Duration};

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use evs_daemon::{routes, state, tail};
use evs_replay::ReplayConfig;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{info, Level};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env.local if present (dev convenience). Silent if the file does
    // not exist — production injects env vars directly.
    let _ = dotenvy::from_filename(".env.local");

    init_tracing();

    let config = evs_config::Config::from_env()?;

    let pool = evs_ledger::connect(&config.database_url).await?;
    evs_ledger::migrate(&pool).await?;

    let shared = Arc::new(state::AppState::new(
        pool,
        ReplayConfig {
            batch_size: config.replay_batch,
            max_events: config.replay_cap,
        },
        config.room_capacity,
    ));

    tail::spawn_ledger_tail(Arc::clone(&shared), Duration::from_millis(250));

    let app = routes::build_router(Arc::clone(&shared))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors_localhost_only());

    info!("evs-daemon listening on http://{}", config.bind_addr);

    axum::serve(
        tokio::net::TcpListener::bind(config.bind_addr).await?,
        app,
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("server crashed")?;

    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("shutdown signal received");
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}

/// CORS: allow only localhost origins.
fn cors_localhost_only() -> CorsLayer {
    let allowed_origins = [
        "http://localhost",
        "http://127.0.0.1",
        "http://localhost:3000",
        "http://127.0.0.1:3000",
        "http://localhost:5173",
        "http://127.0.0.1:5173",
    ];

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(tower_http::cors::Any)
}
