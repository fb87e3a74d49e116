// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Per-username login rate limiting.
//!
//! Token bucket: 5 attempts per minute with a burst of 2. Buckets are
//! keyed by the attempted username, so a spray against one account
//! cannot exhaust another's budget.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

/// Refill rate in tokens per second (5 per minute).
const REFILL_PER_SEC: f64 = 5.0 / 60.0;
/// Bucket capacity (burst size).
const BURST: f64 = 2.0;
/// Bucket map size at which full buckets are pruned.
const PRUNE_THRESHOLD: usize = 10_000;

#[derive(Debug, Clone, Copy)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

impl Bucket {
    fn full(now: Instant) -> Self {
        Self {
            tokens: BURST,
            last_refill: now,
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * REFILL_PER_SEC).min(BURST);
        self.last_refill = now;
    }
}

/// Token-bucket login limiter.
#[derive(Default)]
pub struct LoginRateLimiter {
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl LoginRateLimiter {
    /// Empty limiter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Take one token for `username`. Returns false when the bucket is
    /// empty, in which case the attempt must be rejected.
    pub fn try_acquire(&self, username: &str) -> bool {
        let now = Instant::now();
        let mut buckets = match self.buckets.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if buckets.len() >= PRUNE_THRESHOLD {
            buckets.retain(|_, bucket| {
                let mut b = *bucket;
                b.refill(now);
                b.tokens < BURST
            });
        }

        let bucket = buckets
            .entry(username.to_string())
            .or_insert_with(|| Bucket::full(now));
        bucket.refill(now);
        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}
