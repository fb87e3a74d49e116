// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Devolve Core - multi-tenant DE execution control plane
//!
//! Core accepts authenticated RPC calls over QUIC, queues differential
//! evolution jobs onto a bounded worker pool, and serves status, progress
//! and results from a cache-over-database composite store.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        devolve-core                           │
//! ├──────────────────────────────────────────────────────────────┤
//! │  server     QUIC streams → auth/scope checks → routing        │
//! │  handlers   auth service + DE service request handlers        │
//! │  executor   bounded queue, worker pool, cancellation           │
//! │  store      composite: durable (SQLite/Postgres) + cache      │
//! │  cache      Redis/Valkey or in-process, pub/sub, breaker      │
//! │  auth       JWT issuance/validation, bcrypt, rate limiting    │
//! └──────────────────────────────────────────────────────────────┘
//!          │                          │
//!          ▼                          ▼
//!   devolve-protocol            devolve-kernel
//!   (QUIC + protobuf)           (GDE3, problems, variants)
//! ```
//!
//! Kernel runs are synchronous and CPU-bound; the executor wraps them in
//! blocking tasks and feeds progress back through the cache's pub/sub.

#![deny(missing_docs)]

/// Token issuance, validation, revocation and login rate limiting.
pub mod auth;
/// Cache abstraction: Redis/Valkey backend, in-process backend, breaker.
pub mod cache;
/// Environment-variable configuration.
pub mod config;
/// Error types and wire error mapping.
pub mod error;
/// Job queue and worker pool.
pub mod executor;
/// RPC request handlers.
pub mod handlers;
/// QUIC RPC server.
pub mod server;
/// Durable stores and the composite cache-over-database store.
pub mod store;
/// Request validation.
pub mod validation;

pub use config::Config;
pub use error::{CoreError, Result};
