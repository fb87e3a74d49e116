// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Authentication and authorization.
//!
//! HS256 JWTs with paired access/refresh tokens, jti-based revocation
//! in the cache, bcrypt password storage with timing equalization, and
//! a per-username login rate limit.

pub mod password;
pub mod rate_limit;
pub mod revocation;
pub mod tokens;

pub use rate_limit::LoginRateLimiter;
pub use revocation::RevocationList;
pub use tokens::{Claims, TokenError, TokenPair, TokenService, TokenType};

/// Scope required by read operations.
pub const SCOPE_READ: &str = "de:read";
/// Scope required by mutating operations (run, cancel, delete).
pub const SCOPE_RUN: &str = "de:run";

/// The identity attached to an authenticated request.
#[derive(Debug, Clone)]
pub struct AuthContext {
    /// The authenticated username.
    pub subject: String,
    /// Granted scopes.
    pub scopes: Vec<String>,
    /// The jti of the presented access token (revoked on logout).
    pub token_id: String,
    /// Seconds until the presented token expires.
    pub remaining_secs: i64,
}

impl AuthContext {
    /// Whether the context carries `scope`.
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.iter().any(|s| s == scope)
    }
}
