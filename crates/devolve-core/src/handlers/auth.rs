// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Authentication handlers: register, login, refresh, logout.
//!
//! Failed logins always report the same "invalid credentials" reason and
//! always burn a bcrypt verification, so neither the message nor the
//! response time tells an attacker whether the username exists.

use chrono::Utc;
use devolve_protocol::proto::{
    LoginRequest, LoginResponse, LogoutRequest, LogoutResponse, RefreshTokenRequest,
    RefreshTokenResponse, RegisterRequest, RegisterResponse,
};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::auth::{AuthContext, SCOPE_READ, SCOPE_RUN, password};
use crate::error::{CoreError, Result};
use crate::store::UserRecord;
use crate::validation;

use super::HandlerState;

fn default_scopes() -> Vec<String> {
    vec![SCOPE_READ.to_string(), SCOPE_RUN.to_string()]
}

/// Handle user registration.
#[instrument(skip(state, request), fields(username = %request.username))]
pub async fn handle_register(
    state: &HandlerState,
    request: RegisterRequest,
) -> Result<RegisterResponse> {
    validation::validate_register(&request)?;

    let cost = state.bcrypt_cost;
    let password_input = request.password.clone();
    let password_hash = tokio::task::spawn_blocking(move || {
        password::hash_password(&password_input, cost)
    })
    .await
    .map_err(|e| CoreError::Internal {
        details: format!("hashing task failed: {e}"),
    })??;

    let now = Utc::now();
    let user = UserRecord {
        id: Uuid::new_v4().to_string(),
        username: request.username.clone(),
        email: request.email,
        password_hash,
        created_at: now,
        updated_at: now,
    };
    state.store.create_user(&user).await?;
    info!("user registered");
    Ok(RegisterResponse {})
}

/// Handle login: rate limit, verify credentials, issue a token pair.
#[instrument(skip(state, request), fields(username = %request.username))]
pub async fn handle_login(state: &HandlerState, request: LoginRequest) -> Result<LoginResponse> {
    validation::validate_login(&request.username, &request.password)?;

    if !state.rate_limiter.try_acquire(&request.username) {
        warn!("login rate limit exceeded");
        return Err(CoreError::RateLimited {
            username: request.username,
        });
    }

    let user = state.store.get_user_by_username(&request.username).await?;
    let password_input = request.password;
    let verified = tokio::task::spawn_blocking(move || match user {
        Some(user) => password::verify_password(&password_input, &user.password_hash),
        None => {
            // Unknown user: burn the same time a real check would.
            password::equalize_timing(&password_input);
            false
        }
    })
    .await
    .map_err(|e| CoreError::Internal {
        details: format!("verification task failed: {e}"),
    })?;

    if !verified {
        return Err(CoreError::Unauthenticated {
            reason: "invalid credentials".to_string(),
        });
    }

    let pair = state.tokens.issue(&request.username, &default_scopes())?;
    info!("login succeeded");
    Ok(LoginResponse {
        access_token: pair.access_token,
        refresh_token: pair.refresh_token,
        expires_in_seconds: pair.expires_in.as_secs() as i64,
    })
}

/// Handle a refresh-token exchange. The presented token is consumed.
#[instrument(skip_all)]
pub async fn handle_refresh(
    state: &HandlerState,
    request: RefreshTokenRequest,
) -> Result<RefreshTokenResponse> {
    if request.refresh_token.is_empty() {
        return Err(CoreError::invalid_field("refresh_token", "is required"));
    }
    let pair = state
        .tokens
        .refresh(&request.refresh_token)
        .await
        .map_err(|e| e.into_core_error(true))?;
    Ok(RefreshTokenResponse {
        access_token: pair.access_token,
        refresh_token: pair.refresh_token,
        expires_in_seconds: pair.expires_in.as_secs() as i64,
    })
}

/// Handle logout: revoke the presented access token's jti.
#[instrument(skip_all, fields(username = %ctx.subject))]
pub async fn handle_logout(
    state: &HandlerState,
    ctx: &AuthContext,
    _request: LogoutRequest,
) -> Result<LogoutResponse> {
    state.tokens.revoke(&ctx.token_id, ctx.remaining_secs).await?;
    info!("logged out");
    Ok(LogoutResponse {})
}
