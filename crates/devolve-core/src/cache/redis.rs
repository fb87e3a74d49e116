// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Redis cache backend.
//!
//! Commands run over a shared [`ConnectionManager`] which reconnects
//! transparently. Every call passes through the circuit breaker; an open
//! circuit returns [`CacheError::Unavailable`] without touching the
//! network. Each subscription holds its own pub/sub connection, pumped
//! into a bounded broadcast channel so slow consumers drop oldest
//! messages instead of back-pressuring the pump.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::config::RedisConfig;

use super::{Cache, CacheError, CircuitBreaker, SUBSCRIBER_BUFFER, Subscription};

/// Redis-backed cache with circuit-breaker protection.
pub struct RedisCache {
    client: redis::Client,
    conn: ConnectionManager,
    breaker: CircuitBreaker,
}

impl RedisCache {
    /// Connect to Redis and establish the managed connection.
    pub async fn connect(config: &RedisConfig) -> Result<Self, CacheError> {
        let client = redis::Client::open(config.url())
            .map_err(|e| CacheError::Backend(e.to_string()))?;
        let conn = ConnectionManager::new(client.clone())
            .await
            .map_err(|e| CacheError::Backend(e.to_string()))?;
        debug!(host = %config.host, port = config.port, "connected to redis");
        Ok(Self {
            client,
            conn,
            breaker: CircuitBreaker::default(),
        })
    }

    /// Run a command through the breaker, recording the outcome.
    async fn guard<T>(
        &self,
        fut: impl Future<Output = redis::RedisResult<T>>,
    ) -> Result<T, CacheError> {
        if !self.breaker.allow() {
            return Err(CacheError::Unavailable);
        }
        match fut.await {
            Ok(value) => {
                self.breaker.record_success();
                Ok(value)
            }
            Err(e) => {
                self.breaker.record_failure();
                warn!(error = %e, "redis command failed");
                Err(CacheError::Backend(e.to_string()))
            }
        }
    }
}

#[async_trait]
impl Cache for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.conn.clone();
        let key = key.to_string();
        self.guard(async move { conn.get::<_, Option<String>>(key).await })
            .await
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        let key = key.to_string();
        let value = value.to_string();
        self.guard(async move {
            match ttl {
                Some(ttl) => {
                    conn.set_ex::<_, _, ()>(key, value, ttl.as_secs().max(1))
                        .await
                }
                None => conn.set::<_, _, ()>(key, value).await,
            }
        })
        .await
    }

    async fn set_nx(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<bool, CacheError> {
        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value).arg("NX");
        if let Some(ttl) = ttl {
            cmd.arg("EX").arg(ttl.as_secs().max(1));
        }
        // SET ... NX replies OK on creation and nil when the key exists.
        self.guard(async move {
            cmd.query_async::<Option<String>>(&mut conn)
                .await
                .map(|reply| reply.is_some())
        })
        .await
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        let key = key.to_string();
        self.guard(async move { conn.del::<_, ()>(key).await }).await
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        let key = key.to_string();
        let field = field.to_string();
        let value = value.to_string();
        self.guard(async move { conn.hset::<_, _, _, ()>(key, field, value).await })
            .await
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.conn.clone();
        let key = key.to_string();
        let field = field.to_string();
        self.guard(async move { conn.hget::<_, _, Option<String>>(key, field).await })
            .await
    }

    async fn hget_all(&self, key: &str) -> Result<HashMap<String, String>, CacheError> {
        let mut conn = self.conn.clone();
        let key = key.to_string();
        self.guard(async move { conn.hgetall::<_, HashMap<String, String>>(key).await })
            .await
    }

    async fn hdel(&self, key: &str, field: &str) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        let key = key.to_string();
        let field = field.to_string();
        self.guard(async move { conn.hdel::<_, _, ()>(key, field).await })
            .await
    }

    async fn hlen(&self, key: &str) -> Result<u64, CacheError> {
        let mut conn = self.conn.clone();
        let key = key.to_string();
        self.guard(async move { conn.hlen::<_, u64>(key).await }).await
    }

    async fn hscan(
        &self,
        key: &str,
        cursor: u64,
        pattern: &str,
        count: u32,
    ) -> Result<(u64, Vec<(String, String)>), CacheError> {
        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("HSCAN");
        cmd.arg(key)
            .arg(cursor)
            .arg("MATCH")
            .arg(pattern)
            .arg("COUNT")
            .arg(count);
        self.guard(async move {
            cmd.query_async::<(u64, Vec<(String, String)>)>(&mut conn)
                .await
        })
        .await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        let key = key.to_string();
        let secs = ttl.as_secs().max(1) as i64;
        self.guard(async move { conn.expire::<_, ()>(key, secs).await })
            .await
    }

    async fn publish(&self, topic: &str, payload: &str) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        let topic = topic.to_string();
        let payload = payload.to_string();
        self.guard(async move { conn.publish::<_, _, ()>(topic, payload).await })
            .await
    }

    async fn subscribe(&self, topic: &str) -> Result<Subscription, CacheError> {
        if !self.breaker.allow() {
            return Err(CacheError::Unavailable);
        }
        let mut pubsub = match self.client.get_async_pubsub().await {
            Ok(pubsub) => pubsub,
            Err(e) => {
                self.breaker.record_failure();
                return Err(CacheError::Backend(e.to_string()));
            }
        };
        if let Err(e) = pubsub.subscribe(topic).await {
            self.breaker.record_failure();
            return Err(CacheError::Backend(e.to_string()));
        }
        self.breaker.record_success();

        let (tx, rx) = broadcast::channel(SUBSCRIBER_BUFFER);
        let topic = topic.to_string();
        tokio::spawn(async move {
            let mut stream = pubsub.on_message();
            while let Some(message) = stream.next().await {
                let payload: String = match message.get_payload() {
                    Ok(payload) => payload,
                    Err(e) => {
                        warn!(topic = %topic, error = %e, "dropping undecodable pub/sub message");
                        continue;
                    }
                };
                if tx.send(payload).is_err() {
                    // All subscribers dropped; tear the connection down.
                    break;
                }
            }
        });
        Ok(Subscription::new(rx))
    }
}
