// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Durable persistence layer.
//!
//! Users, executions and result sets live in SQL (SQLite or PostgreSQL)
//! behind the [`DurableStore`] trait. The [`composite`] module layers the
//! volatile cache on top. Statuses are stored lowercase; the API surface
//! uppercases them.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use devolve_kernel::Vector;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::error::{CoreError, Result};

pub mod composite;
pub mod postgres;
pub mod sqlite;

pub use composite::CompositeStore;
pub use postgres::PostgresStore;
pub use sqlite::SqliteStore;

/// Default page size for listings.
pub const DEFAULT_PAGE_SIZE: u32 = 50;
/// Maximum page size for listings.
pub const MAX_PAGE_SIZE: u32 = 100;

/// Execution lifecycle status.
///
/// Legal transitions: `Pending -> Running`, `Pending -> Cancelled`, and
/// `Running` to any terminal status. Terminal statuses never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    /// Accepted, waiting for a worker.
    Pending,
    /// A worker is evolving the population.
    Running,
    /// Finished with a stored result set.
    Completed,
    /// Finished with an error.
    Failed,
    /// Cancelled before completion.
    Cancelled,
}

impl ExecutionStatus {
    /// Lowercase storage form.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Uppercase API form.
    pub fn as_api_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
        }
    }

    /// Parse either the storage or the API form.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Whether this status never changes again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Whether `self -> to` is a legal transition.
    pub fn can_transition_to(&self, to: ExecutionStatus) -> bool {
        match self {
            Self::Pending => matches!(to, Self::Running | Self::Cancelled),
            Self::Running => to.is_terminal(),
            _ => false,
        }
    }
}

/// A registered user.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct UserRecord {
    /// Stable user ID.
    pub id: String,
    /// Unique username, the ownership key for executions.
    pub username: String,
    /// Contact email.
    pub email: String,
    /// Bcrypt password hash.
    pub password_hash: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last update time.
    pub updated_at: DateTime<Utc>,
}

/// A DE execution row.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ExecutionRecord {
    /// Execution ID.
    pub id: String,
    /// Owning username.
    pub owner: String,
    /// Lowercase status string.
    pub status: String,
    /// Algorithm registry name.
    pub algorithm: String,
    /// Problem registry name.
    pub problem: String,
    /// Variant registry name.
    pub variant: String,
    /// JSON-encoded run configuration.
    pub config: String,
    /// Failure message for FAILED executions.
    pub error_message: Option<String>,
    /// Result set ID once completed.
    pub pareto_id: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last mutation time. Drives cache staleness comparison.
    pub updated_at: DateTime<Utc>,
    /// Terminal time, set exactly once.
    pub completed_at: Option<DateTime<Utc>>,
}

impl ExecutionRecord {
    /// Typed status. Unknown strings read as Failed rather than panicking.
    pub fn status(&self) -> ExecutionStatus {
        ExecutionStatus::parse(&self.status).unwrap_or(ExecutionStatus::Failed)
    }
}

/// A stored non-dominated result set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParetoSet {
    /// Result set ID.
    pub id: String,
    /// Non-dominated vectors.
    pub vectors: Vec<Vector>,
    /// Per-objective maxima over the set.
    pub max_objectives: Vec<f64>,
}

impl ParetoSet {
    /// Build a result set from a front, computing per-objective maxima.
    pub fn from_front(id: String, vectors: Vec<Vector>) -> Self {
        let mut max_objectives: Vec<f64> = Vec::new();
        for vector in &vectors {
            for (i, value) in vector.objectives.iter().enumerate() {
                if i >= max_objectives.len() {
                    max_objectives.push(*value);
                } else if *value > max_objectives[i] {
                    max_objectives[i] = *value;
                }
            }
        }
        Self {
            id,
            vectors,
            max_objectives,
        }
    }
}

/// A progress snapshot held in the cache and published to subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressRecord {
    /// Execution ID.
    pub execution_id: String,
    /// Generation of the most recent snapshot.
    pub current_generation: u32,
    /// Total generations per execution.
    pub total_generations: u32,
    /// Finished executions within the run.
    pub completed_executions: u32,
    /// Requested executions within the run.
    pub total_executions: u32,
    /// Truncated current front.
    pub partial_pareto: Vec<Vector>,
    /// Snapshot time.
    pub updated_at: DateTime<Utc>,
}

/// Listing filter and page window.
#[derive(Debug, Clone, Default)]
pub struct ListQuery {
    /// Optional status filter.
    pub status: Option<ExecutionStatus>,
    /// Page size. Zero means the default; values above the cap are clamped.
    pub limit: u32,
    /// Page offset.
    pub offset: u32,
}

impl ListQuery {
    /// Effective page size after default/cap rules.
    pub fn effective_limit(&self) -> u32 {
        if self.limit == 0 {
            DEFAULT_PAGE_SIZE
        } else {
            self.limit.min(MAX_PAGE_SIZE)
        }
    }
}

/// SQL persistence operations.
#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Insert a new user. Duplicate usernames are an input error.
    async fn create_user(&self, user: &UserRecord) -> Result<()>;

    /// Look a user up by username.
    async fn get_user_by_username(&self, username: &str) -> Result<Option<UserRecord>>;

    /// Insert a new execution row.
    async fn create_execution(&self, execution: &ExecutionRecord) -> Result<()>;

    /// Read an execution by ID, regardless of owner.
    async fn get_execution(&self, id: &str) -> Result<Option<ExecutionRecord>>;

    /// Guarded status transition: applies only when the row is still in
    /// `from`. Returns whether a row changed. Sets `completed_at` when
    /// `to` is terminal and records `error_message` for failures.
    async fn update_execution_status(
        &self,
        id: &str,
        from: ExecutionStatus,
        to: ExecutionStatus,
        error_message: Option<&str>,
    ) -> Result<bool>;

    /// Persist a result set and complete the execution in one
    /// transaction, guarded on the row still being RUNNING.
    async fn set_execution_result(&self, id: &str, pareto: &ParetoSet) -> Result<bool>;

    /// Delete an execution and its result set. Returns whether a row
    /// was deleted.
    async fn delete_execution(&self, id: &str) -> Result<bool>;

    /// Page through one owner's executions, newest first, with the total
    /// matching count.
    async fn list_executions(
        &self,
        owner: &str,
        query: &ListQuery,
    ) -> Result<(Vec<ExecutionRecord>, i64)>;

    /// Load a stored result set by its ID.
    async fn get_pareto(&self, pareto_id: &str) -> Result<Option<ParetoSet>>;
}

/// Row shape shared by both SQL backends for stored vectors.
#[derive(Debug, FromRow)]
pub(crate) struct VectorRow {
    pub(crate) elements: String,
    pub(crate) objectives: String,
}

impl VectorRow {
    pub(crate) fn into_vector(self) -> Result<Vector> {
        let elements: Vec<f64> = serde_json::from_str(&self.elements)?;
        let objectives: Vec<f64> = serde_json::from_str(&self.objectives)?;
        let mut vector = Vector::new(elements);
        vector.objectives = objectives;
        Ok(vector)
    }
}

/// Map a duplicate-key database error onto a field violation, leaving
/// other errors as internal.
pub(crate) fn map_unique_violation(
    err: sqlx::Error,
    field: &'static str,
    message: &'static str,
) -> CoreError {
    if let sqlx::Error::Database(db_err) = &err
        && db_err.is_unique_violation()
    {
        return CoreError::invalid_field(field, message);
    }
    err.into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_roundtrip() {
        for status in [
            ExecutionStatus::Pending,
            ExecutionStatus::Running,
            ExecutionStatus::Completed,
            ExecutionStatus::Failed,
            ExecutionStatus::Cancelled,
        ] {
            assert_eq!(ExecutionStatus::parse(status.as_str()), Some(status));
            assert_eq!(ExecutionStatus::parse(status.as_api_str()), Some(status));
        }
        assert_eq!(ExecutionStatus::parse("paused"), None);
    }

    #[test]
    fn test_status_transitions() {
        use ExecutionStatus::*;
        assert!(Pending.can_transition_to(Running));
        assert!(Pending.can_transition_to(Cancelled));
        assert!(!Pending.can_transition_to(Completed));
        assert!(!Pending.can_transition_to(Failed));

        assert!(Running.can_transition_to(Completed));
        assert!(Running.can_transition_to(Failed));
        assert!(Running.can_transition_to(Cancelled));
        assert!(!Running.can_transition_to(Pending));

        for terminal in [Completed, Failed, Cancelled] {
            assert!(terminal.is_terminal());
            for to in [Pending, Running, Completed, Failed, Cancelled] {
                assert!(!terminal.can_transition_to(to));
            }
        }
    }

    #[test]
    fn test_list_query_limits() {
        assert_eq!(ListQuery::default().effective_limit(), 50);
        let query = ListQuery {
            limit: 100,
            ..Default::default()
        };
        assert_eq!(query.effective_limit(), 100);
        let query = ListQuery {
            limit: 5000,
            ..Default::default()
        };
        assert_eq!(query.effective_limit(), 100);
    }

    #[test]
    fn test_pareto_set_max_objectives() {
        let mut a = Vector::new(vec![0.0]);
        a.objectives = vec![0.1, 0.9];
        let mut b = Vector::new(vec![0.0]);
        b.objectives = vec![0.5, 0.3];
        let set = ParetoSet::from_front("p-1".to_string(), vec![a, b]);
        assert_eq!(set.max_objectives, vec![0.5, 0.9]);
    }

    #[test]
    fn test_unknown_status_reads_as_failed() {
        let record = ExecutionRecord {
            id: "e".to_string(),
            owner: "o".to_string(),
            status: "exploded".to_string(),
            algorithm: "gde3".to_string(),
            problem: "zdt1".to_string(),
            variant: "rand1".to_string(),
            config: "{}".to_string(),
            error_message: None,
            pareto_id: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            completed_at: None,
        };
        assert_eq!(record.status(), ExecutionStatus::Failed);
    }
}
