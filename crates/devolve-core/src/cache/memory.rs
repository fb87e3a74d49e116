// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-process cache backend.
//!
//! Mirrors the Redis backend's semantics closely enough that the
//! composite store cannot tell them apart: string keys with lazy TTL
//! expiry, hashes, and broadcast-backed pub/sub with the same bounded
//! per-subscriber buffer.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::broadcast;

use super::{Cache, CacheError, SUBSCRIBER_BUFFER, Subscription};

#[derive(Debug, Clone)]
enum Value {
    Str(String),
    Hash(HashMap<String, String>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

/// Volatile in-process cache.
#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, Entry>>,
    topics: Mutex<HashMap<String, broadcast::Sender<String>>>,
}

impl MemoryCache {
    /// Empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_entries(&self) -> std::sync::MutexGuard<'_, HashMap<String, Entry>> {
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn lock_topics(&self) -> std::sync::MutexGuard<'_, HashMap<String, broadcast::Sender<String>>> {
        match self.topics.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn purge_if_expired(entries: &mut HashMap<String, Entry>, key: &str) {
        if entries.get(key).is_some_and(Entry::expired) {
            entries.remove(key);
        }
    }
}

/// Glob match with `*` and `?`, the subset hash scans use.
fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();

    fn matches(pattern: &[char], text: &[char]) -> bool {
        match (pattern.first(), text.first()) {
            (None, None) => true,
            (Some('*'), _) => {
                matches(&pattern[1..], text)
                    || (!text.is_empty() && matches(pattern, &text[1..]))
            }
            (Some('?'), Some(_)) => matches(&pattern[1..], &text[1..]),
            (Some(p), Some(t)) if p == t => matches(&pattern[1..], &text[1..]),
            _ => false,
        }
    }
    matches(&pattern, &text)
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut entries = self.lock_entries();
        Self::purge_if_expired(&mut entries, key);
        match entries.get(key) {
            Some(Entry {
                value: Value::Str(s),
                ..
            }) => Ok(Some(s.clone())),
            Some(_) => Err(CacheError::Backend(format!(
                "key '{}' holds a hash, not a string",
                key
            ))),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), CacheError> {
        let mut entries = self.lock_entries();
        entries.insert(
            key.to_string(),
            Entry {
                value: Value::Str(value.to_string()),
                expires_at: ttl.map(|t| Instant::now() + t),
            },
        );
        Ok(())
    }

    async fn set_nx(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<bool, CacheError> {
        let mut entries = self.lock_entries();
        Self::purge_if_expired(&mut entries, key);
        if entries.contains_key(key) {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            Entry {
                value: Value::Str(value.to_string()),
                expires_at: ttl.map(|t| Instant::now() + t),
            },
        );
        Ok(true)
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.lock_entries().remove(key);
        Ok(())
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), CacheError> {
        let mut entries = self.lock_entries();
        Self::purge_if_expired(&mut entries, key);
        let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
            value: Value::Hash(HashMap::new()),
            expires_at: None,
        });
        match &mut entry.value {
            Value::Hash(hash) => {
                hash.insert(field.to_string(), value.to_string());
                Ok(())
            }
            Value::Str(_) => Err(CacheError::Backend(format!(
                "key '{}' holds a string, not a hash",
                key
            ))),
        }
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, CacheError> {
        let mut entries = self.lock_entries();
        Self::purge_if_expired(&mut entries, key);
        match entries.get(key) {
            Some(Entry {
                value: Value::Hash(hash),
                ..
            }) => Ok(hash.get(field).cloned()),
            Some(_) => Err(CacheError::Backend(format!(
                "key '{}' holds a string, not a hash",
                key
            ))),
            None => Ok(None),
        }
    }

    async fn hget_all(&self, key: &str) -> Result<HashMap<String, String>, CacheError> {
        let mut entries = self.lock_entries();
        Self::purge_if_expired(&mut entries, key);
        match entries.get(key) {
            Some(Entry {
                value: Value::Hash(hash),
                ..
            }) => Ok(hash.clone()),
            Some(_) => Err(CacheError::Backend(format!(
                "key '{}' holds a string, not a hash",
                key
            ))),
            None => Ok(HashMap::new()),
        }
    }

    async fn hdel(&self, key: &str, field: &str) -> Result<(), CacheError> {
        let mut entries = self.lock_entries();
        if let Some(Entry {
            value: Value::Hash(hash),
            ..
        }) = entries.get_mut(key)
        {
            hash.remove(field);
            if hash.is_empty() {
                entries.remove(key);
            }
        }
        Ok(())
    }

    async fn hlen(&self, key: &str) -> Result<u64, CacheError> {
        let mut entries = self.lock_entries();
        Self::purge_if_expired(&mut entries, key);
        match entries.get(key) {
            Some(Entry {
                value: Value::Hash(hash),
                ..
            }) => Ok(hash.len() as u64),
            Some(_) => Err(CacheError::Backend(format!(
                "key '{}' holds a string, not a hash",
                key
            ))),
            None => Ok(0),
        }
    }

    async fn hscan(
        &self,
        key: &str,
        _cursor: u64,
        pattern: &str,
        _count: u32,
    ) -> Result<(u64, Vec<(String, String)>), CacheError> {
        // The whole hash fits in memory, so the scan completes in one
        // batch and the returned cursor is always exhausted.
        let all = self.hget_all(key).await?;
        let matched = all
            .into_iter()
            .filter(|(field, _)| glob_match(pattern, field))
            .collect();
        Ok((0, matched))
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), CacheError> {
        let mut entries = self.lock_entries();
        Self::purge_if_expired(&mut entries, key);
        if let Some(entry) = entries.get_mut(key) {
            entry.expires_at = Some(Instant::now() + ttl);
        }
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: &str) -> Result<(), CacheError> {
        let topics = self.lock_topics();
        if let Some(sender) = topics.get(topic) {
            // Err means no live subscribers, which is fine.
            let _ = sender.send(payload.to_string());
        }
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<Subscription, CacheError> {
        let mut topics = self.lock_topics();
        let sender = topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(SUBSCRIBER_BUFFER).0);
        Ok(Subscription::new(sender.subscribe()))
    }
}
