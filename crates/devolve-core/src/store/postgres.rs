// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! PostgreSQL durable store.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::{PgPool, PgPoolOptions};

use crate::error::Result;

use super::{
    DurableStore, ExecutionRecord, ExecutionStatus, ListQuery, ParetoSet, UserRecord, VectorRow,
    map_unique_violation,
};

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations/postgres");

/// PostgreSQL-backed durable store.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Connect, verify reachability and run migrations.
    pub async fn connect(dsn: &str) -> Result<Self> {
        let pool = PgPoolOptions::new().max_connections(10).connect(dsn).await?;
        MIGRATOR.run(&pool).await.map_err(sqlx::Error::from)?;
        Ok(Self { pool })
    }

    /// Wrap an existing pool (tests, shared pools). Runs migrations.
    pub async fn from_pool(pool: PgPool) -> Result<Self> {
        MIGRATOR.run(&pool).await.map_err(sqlx::Error::from)?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl DurableStore for PostgresStore {
    async fn create_user(&self, user: &UserRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO users (id, username, email, password_hash, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(&user.id)
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(user.created_at)
        .bind(user.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_unique_violation(e, "username", "already taken"))?;
        Ok(())
    }

    async fn get_user_by_username(&self, username: &str) -> Result<Option<UserRecord>> {
        let record = sqlx::query_as::<_, UserRecord>(
            r#"
            SELECT id, username, email, password_hash, created_at, updated_at
            FROM users
            WHERE username = $1
            "#,
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    async fn create_execution(&self, execution: &ExecutionRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO executions
                (id, owner, status, algorithm, problem, variant, config,
                 error_message, pareto_id, created_at, updated_at, completed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(&execution.id)
        .bind(&execution.owner)
        .bind(&execution.status)
        .bind(&execution.algorithm)
        .bind(&execution.problem)
        .bind(&execution.variant)
        .bind(&execution.config)
        .bind(&execution.error_message)
        .bind(&execution.pareto_id)
        .bind(execution.created_at)
        .bind(execution.updated_at)
        .bind(execution.completed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_execution(&self, id: &str) -> Result<Option<ExecutionRecord>> {
        let record = sqlx::query_as::<_, ExecutionRecord>(
            r#"
            SELECT id, owner, status, algorithm, problem, variant, config,
                   error_message, pareto_id, created_at, updated_at, completed_at
            FROM executions
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    async fn update_execution_status(
        &self,
        id: &str,
        from: ExecutionStatus,
        to: ExecutionStatus,
        error_message: Option<&str>,
    ) -> Result<bool> {
        if !from.can_transition_to(to) {
            return Ok(false);
        }
        let now = Utc::now();
        let result = if to.is_terminal() {
            sqlx::query(
                r#"
                UPDATE executions
                SET status = $1, error_message = $2, updated_at = $3, completed_at = $4
                WHERE id = $5 AND status = $6
                "#,
            )
            .bind(to.as_str())
            .bind(error_message)
            .bind(now)
            .bind(now)
            .bind(id)
            .bind(from.as_str())
            .execute(&self.pool)
            .await?
        } else {
            sqlx::query(
                r#"
                UPDATE executions
                SET status = $1, updated_at = $2
                WHERE id = $3 AND status = $4
                "#,
            )
            .bind(to.as_str())
            .bind(now)
            .bind(id)
            .bind(from.as_str())
            .execute(&self.pool)
            .await?
        };
        Ok(result.rows_affected() > 0)
    }

    async fn set_execution_result(&self, id: &str, pareto: &ParetoSet) -> Result<bool> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE executions
            SET status = 'completed', pareto_id = $1, updated_at = $2, completed_at = $3
            WHERE id = $4 AND status = 'running'
            "#,
        )
        .bind(&pareto.id)
        .bind(now)
        .bind(now)
        .bind(id)
        .execute(&mut *tx)
        .await?;
        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query(
            r#"
            INSERT INTO pareto_sets (id, execution_id, max_objectives, created_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(&pareto.id)
        .bind(id)
        .bind(serde_json::to_string(&pareto.max_objectives)?)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        for (position, vector) in pareto.vectors.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO pareto_vectors (pareto_set_id, position, elements, objectives)
                VALUES ($1, $2, $3, $4)
                "#,
            )
            .bind(&pareto.id)
            .bind(position as i32)
            .bind(serde_json::to_string(&vector.elements)?)
            .bind(serde_json::to_string(&vector.objectives)?)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(true)
    }

    async fn delete_execution(&self, id: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            DELETE FROM pareto_vectors
            WHERE pareto_set_id IN (SELECT id FROM pareto_sets WHERE execution_id = $1)
            "#,
        )
        .bind(id)
        .execute(&mut *tx)
        .await?;
        sqlx::query("DELETE FROM pareto_sets WHERE execution_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM executions WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_executions(
        &self,
        owner: &str,
        query: &ListQuery,
    ) -> Result<(Vec<ExecutionRecord>, i64)> {
        let limit = query.effective_limit();
        let (records, total) = match query.status {
            Some(status) => {
                let records = sqlx::query_as::<_, ExecutionRecord>(
                    r#"
                    SELECT id, owner, status, algorithm, problem, variant, config,
                           error_message, pareto_id, created_at, updated_at, completed_at
                    FROM executions
                    WHERE owner = $1 AND status = $2
                    ORDER BY created_at DESC, id DESC
                    LIMIT $3 OFFSET $4
                    "#,
                )
                .bind(owner)
                .bind(status.as_str())
                .bind(limit as i64)
                .bind(query.offset as i64)
                .fetch_all(&self.pool)
                .await?;
                let (total,): (i64,) = sqlx::query_as(
                    "SELECT COUNT(*) FROM executions WHERE owner = $1 AND status = $2",
                )
                .bind(owner)
                .bind(status.as_str())
                .fetch_one(&self.pool)
                .await?;
                (records, total)
            }
            None => {
                let records = sqlx::query_as::<_, ExecutionRecord>(
                    r#"
                    SELECT id, owner, status, algorithm, problem, variant, config,
                           error_message, pareto_id, created_at, updated_at, completed_at
                    FROM executions
                    WHERE owner = $1
                    ORDER BY created_at DESC, id DESC
                    LIMIT $2 OFFSET $3
                    "#,
                )
                .bind(owner)
                .bind(limit as i64)
                .bind(query.offset as i64)
                .fetch_all(&self.pool)
                .await?;
                let (total,): (i64,) =
                    sqlx::query_as("SELECT COUNT(*) FROM executions WHERE owner = $1")
                        .bind(owner)
                        .fetch_one(&self.pool)
                        .await?;
                (records, total)
            }
        };
        Ok((records, total))
    }

    async fn get_pareto(&self, pareto_id: &str) -> Result<Option<ParetoSet>> {
        let header: Option<(String,)> =
            sqlx::query_as("SELECT max_objectives FROM pareto_sets WHERE id = $1")
                .bind(pareto_id)
                .fetch_optional(&self.pool)
                .await?;
        let Some((max_objectives,)) = header else {
            return Ok(None);
        };

        let rows = sqlx::query_as::<_, VectorRow>(
            r#"
            SELECT elements, objectives
            FROM pareto_vectors
            WHERE pareto_set_id = $1
            ORDER BY position
            "#,
        )
        .bind(pareto_id)
        .fetch_all(&self.pool)
        .await?;

        let vectors = rows
            .into_iter()
            .map(VectorRow::into_vector)
            .collect::<Result<Vec<_>>>()?;
        Ok(Some(ParetoSet {
            id: pareto_id.to_string(),
            vectors,
            max_objectives: serde_json::from_str(&max_objectives)?,
        }))
    }
}
