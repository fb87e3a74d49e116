// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! JWT issuance and validation.
//!
//! Access and refresh tokens are HS256 JWTs sharing one claim shape and
//! distinguished by `token_type`. Every token carries a unique jti;
//! logout and refresh revoke the presented jti for its residual
//! lifetime, which makes refresh tokens single-use.

use std::time::Duration;

use chrono::Utc;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::revocation::RevocationList;
use crate::error::CoreError;

/// Token issuer claim value.
pub const ISSUER: &str = "devolve-server";
/// Token audience claim value.
pub const AUDIENCE: &str = "devolve-api";

/// What a token is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    /// Short-lived token presented on every request.
    Access,
    /// Longer-lived token exchanged for a fresh pair.
    Refresh,
}

/// JWT claims.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (username).
    pub sub: String,
    /// Unique token ID, the revocation key.
    pub jti: String,
    /// Issuer.
    pub iss: String,
    /// Audience.
    pub aud: String,
    /// Issued-at (unix seconds).
    pub iat: i64,
    /// Not-before (unix seconds).
    pub nbf: i64,
    /// Expiry (unix seconds).
    pub exp: i64,
    /// Access or refresh.
    pub token_type: TokenType,
    /// Granted scopes.
    pub scopes: Vec<String>,
}

impl Claims {
    /// Seconds until expiry, clamped at zero.
    pub fn remaining_secs(&self) -> i64 {
        (self.exp - Utc::now().timestamp()).max(0)
    }
}

/// A freshly issued access/refresh pair.
#[derive(Debug, Clone)]
pub struct TokenPair {
    /// The access token.
    pub access_token: String,
    /// The refresh token.
    pub refresh_token: String,
    /// Access token lifetime.
    pub expires_in: Duration,
}

/// Why a token was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    /// The token's exp is in the past.
    #[error("token expired")]
    Expired,

    /// Bad signature, malformed token, or wrong issuer/audience.
    #[error("token invalid: {0}")]
    Invalid(String),

    /// An access token where a refresh token was expected, or vice
    /// versa.
    #[error("wrong token type, expected {expected:?}")]
    WrongType {
        /// The type the operation required.
        expected: TokenType,
    },

    /// The token's jti is on the revocation list.
    #[error("token revoked")]
    Revoked,
}

impl TokenError {
    /// Map onto the transport error. Everything is UNAUTHENTICATED;
    /// presenting the wrong token type to Refresh is the caller's
    /// input error instead.
    pub fn into_core_error(self, refreshing: bool) -> CoreError {
        match (&self, refreshing) {
            (TokenError::WrongType { .. }, true) => {
                CoreError::invalid_field("refresh_token", "must be a refresh token")
            }
            _ => CoreError::Unauthenticated {
                reason: self.to_string(),
            },
        }
    }
}

/// Issues and validates token pairs.
pub struct TokenService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    access_ttl: Duration,
    refresh_ttl: Duration,
    revocations: RevocationList,
}

impl TokenService {
    /// Service signing with `secret`.
    pub fn new(
        secret: &str,
        access_ttl: Duration,
        refresh_ttl: Duration,
        revocations: RevocationList,
    ) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            access_ttl,
            refresh_ttl,
            revocations,
        }
    }

    /// Issue a fresh access/refresh pair for `subject`.
    pub fn issue(&self, subject: &str, scopes: &[String]) -> Result<TokenPair, CoreError> {
        let access = self.sign(subject, scopes, TokenType::Access, self.access_ttl)?;
        let refresh = self.sign(subject, scopes, TokenType::Refresh, self.refresh_ttl)?;
        Ok(TokenPair {
            access_token: access,
            refresh_token: refresh,
            expires_in: self.access_ttl,
        })
    }

    /// Validate a token of the expected type, including revocation.
    pub async fn validate(&self, token: &str, expected: TokenType) -> Result<Claims, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[ISSUER]);
        validation.set_audience(&[AUDIENCE]);
        validation.validate_nbf = true;
        validation.leeway = 0;

        let data = decode::<Claims>(token, &self.decoding, &validation).map_err(|e| {
            match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => TokenError::Expired,
                _ => TokenError::Invalid(e.to_string()),
            }
        })?;
        let claims = data.claims;

        if claims.token_type != expected {
            return Err(TokenError::WrongType { expected });
        }

        // Fail closed when the revocation list cannot be consulted.
        match self.revocations.is_revoked(&claims.jti).await {
            Ok(false) => Ok(claims),
            Ok(true) => Err(TokenError::Revoked),
            Err(e) => Err(TokenError::Invalid(format!(
                "revocation check unavailable: {e}"
            ))),
        }
    }

    /// Exchange a refresh token for a new pair, consuming it.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, TokenError> {
        let claims = self.validate(refresh_token, TokenType::Refresh).await?;

        // The revocation write is the single-use gate: of any number of
        // concurrent exchanges of one token, exactly one creates the
        // entry and wins; the rest see it already present.
        let residual = Duration::from_secs(claims.remaining_secs() as u64);
        let consumed = self
            .revocations
            .revoke(&claims.jti, residual)
            .await
            .map_err(|e| TokenError::Invalid(format!("revocation unavailable: {e}")))?;
        if !consumed {
            return Err(TokenError::Revoked);
        }

        self.issue(&claims.sub, &claims.scopes)
            .map_err(|e| TokenError::Invalid(e.to_string()))
    }

    /// Revoke a presented token for its residual lifetime (logout).
    /// Idempotent: revoking an already-revoked jti succeeds.
    pub async fn revoke(&self, jti: &str, remaining_secs: i64) -> Result<(), CoreError> {
        self.revocations
            .revoke(jti, Duration::from_secs(remaining_secs.max(0) as u64))
            .await
            .map(|_| ())
            .map_err(|e| CoreError::Internal {
                details: format!("revocation unavailable: {e}"),
            })
    }

    fn sign(
        &self,
        subject: &str,
        scopes: &[String],
        token_type: TokenType,
        ttl: Duration,
    ) -> Result<String, CoreError> {
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: subject.to_string(),
            jti: Uuid::new_v4().to_string(),
            iss: ISSUER.to_string(),
            aud: AUDIENCE.to_string(),
            iat: now,
            nbf: now,
            exp: now + ttl.as_secs() as i64,
            token_type,
            scopes: scopes.to_vec(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding).map_err(|e| {
            CoreError::Internal {
                details: format!("token signing failed: {e}"),
            }
        })
    }
}
