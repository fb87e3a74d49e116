// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for devolve-core.
//!
//! Provides a unified error type that maps to RPC error responses.

use devolve_protocol::proto::{FieldViolation, RpcError};
use std::fmt;

/// Result type using CoreError
pub type Result<T> = std::result::Result<T, CoreError>;

/// A single field-level validation failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    /// The field that failed validation.
    pub field: String,
    /// The validation error message.
    pub message: String,
}

impl FieldError {
    /// Shorthand constructor.
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Core errors that can occur during request processing.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum CoreError {
    /// Input validation failed for one or more fields.
    InvalidInput {
        /// Per-field violations.
        violations: Vec<FieldError>,
    },

    /// Missing, malformed, expired or revoked credentials.
    Unauthenticated {
        /// Why authentication failed.
        reason: String,
    },

    /// Valid credentials without the scope the operation requires.
    Forbidden {
        /// The scope the operation requires.
        scope: String,
    },

    /// The requested resource does not exist for this caller.
    ///
    /// Also covers resources owned by another user, so existence is
    /// never leaked across tenants.
    NotFound {
        /// The resource kind (execution, user, pareto set).
        resource: &'static str,
        /// The identifier that was looked up.
        id: String,
    },

    /// The execution is not in a state that allows the operation.
    ConflictState {
        /// The execution ID.
        execution_id: String,
        /// The execution's current status.
        status: String,
    },

    /// The caller exceeded the login rate limit.
    RateLimited {
        /// The username whose bucket is exhausted.
        username: String,
    },

    /// The executor queue is at capacity.
    QueueFull,

    /// Database operation failed.
    DatabaseError {
        /// The operation that failed.
        operation: String,
        /// Error details.
        details: String,
    },

    /// Unexpected internal failure.
    Internal {
        /// Error details.
        details: String,
    },
}

impl CoreError {
    /// Convenience constructor for a single-field validation failure.
    pub fn invalid_field(field: impl Into<String>, message: impl Into<String>) -> Self {
        CoreError::InvalidInput {
            violations: vec![FieldError::new(field, message)],
        }
    }

    /// Convert this error to an RpcError for protocol responses.
    pub fn to_rpc_error(&self) -> RpcError {
        let violations = match self {
            Self::InvalidInput { violations } => violations
                .iter()
                .map(|v| FieldViolation {
                    field: v.field.clone(),
                    description: v.message.clone(),
                })
                .collect(),
            _ => Vec::new(),
        };
        RpcError {
            code: self.error_code().to_string(),
            message: self.to_string(),
            violations,
        }
    }

    /// Get the transport error code for this error type.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidInput { .. } => "INVALID_ARGUMENT",
            Self::Unauthenticated { .. } => "UNAUTHENTICATED",
            Self::Forbidden { .. } => "PERMISSION_DENIED",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::ConflictState { .. } => "FAILED_PRECONDITION",
            Self::RateLimited { .. } | Self::QueueFull => "RESOURCE_EXHAUSTED",
            Self::DatabaseError { .. } | Self::Internal { .. } => "INTERNAL",
        }
    }
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidInput { violations } => {
                let fields: Vec<&str> = violations.iter().map(|v| v.field.as_str()).collect();
                write!(f, "Invalid input for field(s): {}", fields.join(", "))
            }
            Self::Unauthenticated { reason } => {
                write!(f, "Authentication failed: {}", reason)
            }
            Self::Forbidden { scope } => {
                write!(f, "Operation requires scope '{}'", scope)
            }
            Self::NotFound { resource, id } => {
                write!(f, "{} '{}' not found", resource, id)
            }
            Self::ConflictState {
                execution_id,
                status,
            } => {
                write!(
                    f,
                    "Execution '{}' is in state '{}' which does not allow this operation",
                    execution_id, status
                )
            }
            Self::RateLimited { username } => {
                write!(f, "Too many login attempts for '{}'", username)
            }
            Self::QueueFull => {
                write!(f, "Execution queue is full")
            }
            Self::DatabaseError { operation, details } => {
                write!(f, "Database error during '{}': {}", operation, details)
            }
            Self::Internal { details } => {
                write!(f, "Internal error: {}", details)
            }
        }
    }
}

impl std::error::Error for CoreError {}

impl From<sqlx::Error> for CoreError {
    fn from(err: sqlx::Error) -> Self {
        CoreError::DatabaseError {
            operation: "query".to_string(),
            details: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::DatabaseError {
            operation: "json".to_string(),
            details: err.to_string(),
        }
    }
}
