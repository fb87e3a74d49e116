// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Devolve Core - DE execution control plane
//!
//! Core is responsible for:
//! - Authentication (register/login/refresh/logout, JWT with scopes)
//! - Asynchronous DE runs (queueing, execution, cancellation)
//! - Status, live progress streaming, results and listings

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::{error, info};

use devolve_core::auth::revocation::RevocationList;
use devolve_core::auth::{LoginRateLimiter, TokenService};
use devolve_core::cache::{Cache, MemoryCache, RedisCache};
use devolve_core::config::{Config, StoreConfig};
use devolve_core::executor::Executor;
use devolve_core::handlers::HandlerState;
use devolve_core::server;
use devolve_core::store::{CompositeStore, DurableStore, PostgresStore, SqliteStore};
use devolve_kernel::{AlgorithmRegistry, ProblemRegistry, VariantRegistry};

/// How long running jobs get to wind down on shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file (from crate directory or parent directories)
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("devolve_core=info".parse()?),
        )
        .init();

    info!("Starting Devolve Core");

    let config = Config::from_env().map_err(|e| {
        error!("Configuration error: {}", e);
        e
    })?;

    info!(
        quic_addr = %config.quic_addr,
        workers = config.executor.max_workers,
        queue_size = config.executor.queue_size,
        "Configuration loaded"
    );

    let durable: Arc<dyn DurableStore> = match &config.store {
        StoreConfig::Memory => {
            info!("Using in-memory store (state is lost on restart)");
            Arc::new(SqliteStore::in_memory().await?)
        }
        StoreConfig::Sqlite { filepath } => {
            info!(path = %filepath, "Using SQLite store");
            Arc::new(SqliteStore::from_path(filepath).await?)
        }
        StoreConfig::Postgres { dsn } => {
            info!("Using PostgreSQL store");
            Arc::new(PostgresStore::connect(dsn).await?)
        }
    };

    let cache: Arc<dyn Cache> = match &config.redis {
        Some(redis) => {
            info!(host = %redis.host, port = redis.port, "Using Redis cache");
            Arc::new(RedisCache::connect(redis).await?)
        }
        None => {
            info!("Using in-process cache");
            Arc::new(MemoryCache::new())
        }
    };

    let store = Arc::new(CompositeStore::new(durable, cache, config.ttl.clone()));
    let tokens = TokenService::new(
        &config.auth.secret,
        config.auth.access_ttl,
        config.auth.refresh_ttl,
        RevocationList::new(store.cache()),
    );
    let executor = Executor::start(store.clone(), &config.executor);

    let state = Arc::new(HandlerState {
        store,
        executor: executor.clone(),
        tokens,
        rate_limiter: LoginRateLimiter::new(),
        algorithms: AlgorithmRegistry::with_defaults(),
        problems: ProblemRegistry::with_defaults(),
        variants: VariantRegistry::with_defaults(),
        bcrypt_cost: config.auth.bcrypt_cost,
    });

    info!("Devolve Core initialized");

    let quic_addr = config.quic_addr;
    let server_state = state.clone();
    let server_handle = tokio::spawn(async move {
        if let Err(e) = server::run(quic_addr, server_state).await {
            error!("QUIC server error: {}", e);
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");

    server_handle.abort();
    executor.shutdown(SHUTDOWN_GRACE).await;

    info!("Shutdown complete");
    Ok(())
}
