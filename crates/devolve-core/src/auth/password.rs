// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Bcrypt password hashing.
//!
//! Verification cost is the observable part of a login attempt, so
//! lookups for unknown usernames still run a verification against a
//! fixed dummy hash. Without it, response timing would reveal which
//! usernames exist.

use std::sync::OnceLock;

use crate::error::CoreError;

/// Work factor used for the dummy hash; real hashing uses the
/// configured cost, which defaults to the same value.
pub const DEFAULT_COST: u32 = 12;

static DUMMY_HASH: OnceLock<String> = OnceLock::new();

fn dummy_hash() -> &'static str {
    DUMMY_HASH.get_or_init(|| {
        bcrypt::hash("devolve-timing-pad", DEFAULT_COST)
            .unwrap_or_else(|_| "$2b$12$invalidinvalidinvalidinvalidinvalidinvalidinvalid".into())
    })
}

/// Hash a password with the given cost.
pub fn hash_password(password: &str, cost: u32) -> Result<String, CoreError> {
    bcrypt::hash(password, cost).map_err(|e| CoreError::Internal {
        details: format!("password hashing failed: {e}"),
    })
}

/// Verify a password against a stored hash. A malformed hash verifies
/// as false rather than erroring.
pub fn verify_password(password: &str, hash: &str) -> bool {
    bcrypt::verify(password, hash).unwrap_or(false)
}

/// Burn the same time a real verification would, for unknown users.
pub fn equalize_timing(password: &str) {
    let _ = bcrypt::verify(password, dummy_hash());
}
