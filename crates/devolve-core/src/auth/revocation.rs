// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Token revocation backed by the cache.
//!
//! A revoked token's jti is stored under `revoked:token:<jti>` with a
//! TTL equal to the token's residual lifetime, so entries clean
//! themselves up the moment the token would have expired anyway.

use std::sync::Arc;
use std::time::Duration;

use crate::cache::{Cache, CacheError};

fn revocation_key(jti: &str) -> String {
    format!("revoked:token:{jti}")
}

/// Cache-backed revocation list.
#[derive(Clone)]
pub struct RevocationList {
    cache: Arc<dyn Cache>,
}

impl RevocationList {
    /// Revocation list over `cache`.
    pub fn new(cache: Arc<dyn Cache>) -> Self {
        Self { cache }
    }

    /// Revoke `jti` for `residual_ttl`. Returns whether this call created
    /// the entry, so single-use token exchanges can tell first from
    /// duplicate. The write is an atomic check-and-set: of any number of
    /// concurrent revocations of the same jti, exactly one sees `true`.
    /// A token with no jti or no remaining lifetime needs no entry and
    /// reads as newly revoked.
    pub async fn revoke(&self, jti: &str, residual_ttl: Duration) -> Result<bool, CacheError> {
        if jti.is_empty() || residual_ttl.is_zero() {
            return Ok(true);
        }
        self.cache
            .set_nx(&revocation_key(jti), "1", Some(residual_ttl))
            .await
    }

    /// Whether `jti` has been revoked. Errors propagate so callers can
    /// fail closed.
    pub async fn is_revoked(&self, jti: &str) -> Result<bool, CacheError> {
        if jti.is_empty() {
            return Ok(false);
        }
        Ok(self.cache.get(&revocation_key(jti)).await?.is_some())
    }
}
