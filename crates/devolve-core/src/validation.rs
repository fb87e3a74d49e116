// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Request validation.
//!
//! Validation happens before any durable write: a request that fails here
//! never creates rows or queue entries. Each check appends to a violation
//! list so the caller learns about every bad field at once.

use devolve_protocol::proto::{DeConfig, RegisterRequest, RunAsyncRequest};

use crate::error::{CoreError, FieldError};

const USERNAME_MIN: usize = 3;
const USERNAME_MAX: usize = 64;
const PASSWORD_MIN: usize = 8;
// bcrypt truncates beyond 72 bytes
const PASSWORD_MAX: usize = 72;

const POPULATION_MAX: u32 = 10_000;
const DIMENSIONS_MAX: u32 = 1_000;
const GENERATIONS_MAX: u32 = 1_000_000;
const EXECUTIONS_MAX: u32 = 1_000;

fn check(violations: &mut Vec<FieldError>, ok: bool, field: &str, message: &str) {
    if !ok {
        violations.push(FieldError::new(field, message));
    }
}

fn valid_username(username: &str) -> bool {
    (USERNAME_MIN..=USERNAME_MAX).contains(&username.len())
        && username
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

fn valid_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.is_empty()
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !email.chars().any(char::is_whitespace)
}

/// Validate a registration request.
pub fn validate_register(request: &RegisterRequest) -> Result<(), CoreError> {
    let mut violations = Vec::new();
    check(
        &mut violations,
        valid_username(&request.username),
        "username",
        "must be 3-64 characters of letters, digits, '_' or '-'",
    );
    check(
        &mut violations,
        valid_email(&request.email),
        "email",
        "must be a valid email address",
    );
    check(
        &mut violations,
        (PASSWORD_MIN..=PASSWORD_MAX).contains(&request.password.len()),
        "password",
        "must be 8-72 bytes",
    );
    if violations.is_empty() {
        Ok(())
    } else {
        Err(CoreError::InvalidInput { violations })
    }
}

/// Validate a login request's shape (credential checks happen later).
pub fn validate_login(username: &str, password: &str) -> Result<(), CoreError> {
    let mut violations = Vec::new();
    check(
        &mut violations,
        !username.is_empty(),
        "username",
        "must not be empty",
    );
    check(
        &mut violations,
        !password.is_empty(),
        "password",
        "must not be empty",
    );
    if violations.is_empty() {
        Ok(())
    } else {
        Err(CoreError::InvalidInput { violations })
    }
}

/// Validate the DE configuration carried by a run request.
pub fn validate_de_config(config: &DeConfig) -> Vec<FieldError> {
    let mut violations = Vec::new();
    check(
        &mut violations,
        (1..=EXECUTIONS_MAX).contains(&config.executions),
        "config.executions",
        "must be between 1 and 1000",
    );
    check(
        &mut violations,
        (1..=GENERATIONS_MAX).contains(&config.generations),
        "config.generations",
        "must be between 1 and 1000000",
    );
    check(
        &mut violations,
        (4..=POPULATION_MAX).contains(&config.population_size),
        "config.population_size",
        "must be between 4 and 10000",
    );
    check(
        &mut violations,
        (2..=DIMENSIONS_MAX).contains(&config.dimensions_size),
        "config.dimensions_size",
        "must be between 2 and 1000",
    );
    check(
        &mut violations,
        config.objectives_size >= 2,
        "config.objectives_size",
        "must be at least 2",
    );
    check(
        &mut violations,
        config.floor.is_finite() && config.ceil.is_finite() && config.floor < config.ceil,
        "config.floor",
        "must be finite and strictly below ceil",
    );
    if let Some(gde3) = &config.gde3 {
        check(
            &mut violations,
            (0.0..=1.0).contains(&gde3.cr),
            "config.gde3.cr",
            "must be within [0, 1]",
        );
        check(
            &mut violations,
            gde3.f > 0.0 && gde3.f <= 2.0,
            "config.gde3.f",
            "must be within (0, 2]",
        );
        check(
            &mut violations,
            (0.0..=1.0).contains(&gde3.p),
            "config.gde3.p",
            "must be within [0, 1]",
        );
    }
    violations
}

/// Validate a run request: non-empty component names plus the DE config.
///
/// Name resolution against the registries happens in the handler; this
/// only checks shape.
pub fn validate_run_async(request: &RunAsyncRequest) -> Result<(), CoreError> {
    let mut violations = Vec::new();
    check(
        &mut violations,
        !request.algorithm.is_empty(),
        "algorithm",
        "must not be empty",
    );
    check(
        &mut violations,
        !request.problem.is_empty(),
        "problem",
        "must not be empty",
    );
    check(
        &mut violations,
        !request.variant.is_empty(),
        "variant",
        "must not be empty",
    );
    match &request.config {
        Some(config) => violations.extend(validate_de_config(config)),
        None => violations.push(FieldError::new("config", "is required")),
    }
    if violations.is_empty() {
        Ok(())
    } else {
        Err(CoreError::InvalidInput { violations })
    }
}
