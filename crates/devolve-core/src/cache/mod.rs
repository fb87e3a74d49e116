// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Volatile cache and pub/sub abstraction.
//!
//! Two backends implement [`Cache`]: Redis (production) and an in-process
//! map (tests, single-node deployments). Cache reachability is advisory
//! for reads; durable writes never depend on it. All Redis calls go
//! through a circuit breaker so a dead cache degrades to fast failures
//! instead of piled-up timeouts.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;

pub mod breaker;
pub mod memory;
pub mod redis;

pub use breaker::CircuitBreaker;
pub use memory::MemoryCache;
pub use redis::RedisCache;

/// Per-subscriber pub/sub buffer. Slow consumers lose oldest messages.
/// Tokio's broadcast channel rounds the capacity up to the next power of
/// two, so the effective buffer is 128.
pub const SUBSCRIBER_BUFFER: usize = 100;

/// Errors from cache operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CacheError {
    /// The circuit breaker is open; the call was not attempted.
    #[error("cache unavailable (circuit open)")]
    Unavailable,

    /// The backend rejected or failed the operation.
    #[error("cache backend error: {0}")]
    Backend(String),

    /// The stored value could not be decoded.
    #[error("cache value corrupt: {0}")]
    Corrupt(String),
}

/// A pub/sub subscription handle.
///
/// Backed by a broadcast channel with a bounded per-subscriber buffer;
/// when the subscriber falls behind, the oldest messages are dropped and
/// delivery resumes from the newest available.
pub struct Subscription {
    rx: broadcast::Receiver<String>,
}

impl Subscription {
    /// Wrap a broadcast receiver.
    pub fn new(rx: broadcast::Receiver<String>) -> Self {
        Self { rx }
    }

    /// Next message, or `None` once the topic is closed.
    pub async fn recv(&mut self) -> Option<String> {
        loop {
            match self.rx.recv().await {
                Ok(message) => return Some(message),
                // Oldest messages dropped; continue from the newest.
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// Volatile key/value, hash and pub/sub operations.
#[async_trait]
pub trait Cache: Send + Sync {
    /// Read a string key.
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    /// Write a string key with an optional TTL.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), CacheError>;

    /// Write a string key only if it does not exist, atomically. Returns
    /// whether the key was newly created.
    async fn set_nx(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<bool, CacheError>;

    /// Delete a key (string or hash). Missing keys are not an error.
    async fn delete(&self, key: &str) -> Result<(), CacheError>;

    /// Set a hash field.
    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), CacheError>;

    /// Read a hash field.
    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, CacheError>;

    /// Read a whole hash.
    async fn hget_all(&self, key: &str) -> Result<HashMap<String, String>, CacheError>;

    /// Delete a hash field.
    async fn hdel(&self, key: &str, field: &str) -> Result<(), CacheError>;

    /// Number of fields in a hash. Missing keys count zero.
    async fn hlen(&self, key: &str) -> Result<u64, CacheError>;

    /// Iterate hash fields whose names match a glob pattern, resuming
    /// from `cursor`. Returns the next cursor (zero once exhausted) and a
    /// batch of field/value pairs; `count` is a batch size hint.
    async fn hscan(
        &self,
        key: &str,
        cursor: u64,
        pattern: &str,
        count: u32,
    ) -> Result<(u64, Vec<(String, String)>), CacheError>;

    /// Refresh a key's TTL.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), CacheError>;

    /// Publish a message on a topic. No-op when nobody listens.
    async fn publish(&self, topic: &str, payload: &str) -> Result<(), CacheError>;

    /// Subscribe to a topic.
    async fn subscribe(&self, topic: &str) -> Result<Subscription, CacheError>;
}
