// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Itemwire Core - Item Synchronization Service
//!
//! Core is responsible for:
//! - Item storage (create/update/delete/read)
//! - Idempotent writes (keyed replay)
//! - Outbox delivery (push change events to connected clients)

use std::sync::Arc;

use anyhow::Result;
use sqlx::postgres::PgPoolOptions;
use tokio::sync::watch;
use tracing::{error, info};

use itemwire_core::config::Config;
use itemwire_core::handlers::HandlerState;
use itemwire_core::migrations;
use itemwire_core::outbox::{DispatcherConfig, OutboxDispatcher};
use itemwire_core::persistence::PostgresPersistence;
use itemwire_core::rate_limit::{RateLimiterRegistry, SlidingWindowConfig, TokenBucketConfig};
use itemwire_core::server::{self, ClientRegistry, ItemServerState};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive("itemwire_core=info".parse().unwrap());
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Starting Itemwire Core");

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Configuration error: {}", e);
            return Err(e.into());
        }
    };

    info!(
        quic_addr = %config.quic_addr,
        outbox_poll_ms = config.outbox_poll_ms,
        outbox_batch = config.outbox_batch_size,
        "Configuration loaded"
    );

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await?;

    let (one,): (i32,) = sqlx::query_as("SELECT 1").fetch_one(&pool).await?;
    info!(result = one, "Database reachable");

    migrations::run_postgres(&pool).await?;
    info!("Migrations applied");

    let persistence = Arc::new(PostgresPersistence::new(pool.clone()));
    let registry = Arc::new(ClientRegistry::new());
    let handlers = HandlerState::with_idempotency_ttl(
        persistence.clone(),
        chrono::Duration::hours(i64::from(config.idempotency_ttl_hours)),
    );
    let server_state = Arc::new(ItemServerState::new(
        handlers,
        RateLimiterRegistry::new(SlidingWindowConfig::default()),
        registry.clone(),
        TokenBucketConfig::default(),
    ));

    // The dispatcher pushes committed notifications to connected clients
    let dispatcher = OutboxDispatcher::with_config(
        persistence.clone(),
        registry.clone(),
        DispatcherConfig {
            poll_interval: std::time::Duration::from_millis(config.outbox_poll_ms),
            batch_size: config.outbox_batch_size,
            max_retries: config.outbox_max_retries,
            dead_letter_unrecognized: config.outbox_dead_letter_unrecognized,
        },
    );
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let dispatcher_handle = tokio::spawn(dispatcher.run(shutdown_rx));

    info!("Itemwire Core ready");

    // Clients connect to this QUIC endpoint
    let quic_addr = config.quic_addr;
    let item_server_state = server_state.clone();
    let item_server_handle = tokio::spawn(async move {
        if let Err(e) = server::run_item_server(quic_addr, item_server_state).await {
            error!("Item QUIC server error: {}", e);
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    // Stop taking requests first, then let the dispatcher drain the outbox
    item_server_handle.abort();
    shutdown_tx.send(true).ok();
    if let Err(e) = dispatcher_handle.await {
        error!("Outbox dispatcher task failed: {}", e);
    }

    pool.close().await;
    info!("Shutdown complete");

    Ok(())
}
