// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Composite store: durable SQL plus volatile cache.
//!
//! Policy per operation:
//! - creates write durable first, then best-effort cache fill
//! - reads are cache-aside with an `updated_at` staleness check; a
//!   fresher durable copy wins and refills the cache
//! - mutations go durable-first, then invalidate cached copies
//! - progress and cancel flags are cache-only
//! - listings are durable-only
//!
//! Cache failures on any best-effort path are logged, never returned.
//! Owner mismatches surface as NotFound so execution IDs never leak
//! across users.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::cache::{Cache, Subscription};
use crate::config::TtlConfig;
use crate::error::{CoreError, Result};

use super::{
    DurableStore, ExecutionRecord, ExecutionStatus, ListQuery, ParetoSet, ProgressRecord,
    UserRecord,
};

/// Cache key for an execution snapshot.
pub fn execution_key(id: &str) -> String {
    format!("execution:{id}")
}

/// Cache key for an execution's progress snapshot.
pub fn progress_key(id: &str) -> String {
    format!("execution:{id}:progress")
}

/// Cache key for an execution's cancel flag.
pub fn cancel_key(id: &str) -> String {
    format!("execution:{id}:cancel")
}

/// Cache hash indexing one user's executions.
pub fn user_executions_key(username: &str) -> String {
    format!("user:{username}:executions")
}

/// Pub/sub topic for progress updates.
pub fn updates_topic(id: &str) -> String {
    format!("execution:{id}:updates")
}

/// Pub/sub topic for cancellation signals.
pub fn cancel_topic(id: &str) -> String {
    format!("execution:{id}:cancel")
}

/// Durable store layered with the volatile cache.
pub struct CompositeStore {
    durable: Arc<dyn DurableStore>,
    cache: Arc<dyn Cache>,
    ttl: TtlConfig,
}

impl CompositeStore {
    /// Layer `cache` over `durable`.
    pub fn new(durable: Arc<dyn DurableStore>, cache: Arc<dyn Cache>, ttl: TtlConfig) -> Self {
        Self {
            durable,
            cache,
            ttl,
        }
    }

    /// The underlying cache (for revocation storage).
    pub fn cache(&self) -> Arc<dyn Cache> {
        self.cache.clone()
    }

    // ------------------------------------------------------------------
    // Users (durable-only)
    // ------------------------------------------------------------------

    /// Insert a new user.
    pub async fn create_user(&self, user: &UserRecord) -> Result<()> {
        self.durable.create_user(user).await
    }

    /// Look a user up by username.
    pub async fn get_user_by_username(&self, username: &str) -> Result<Option<UserRecord>> {
        self.durable.get_user_by_username(username).await
    }

    // ------------------------------------------------------------------
    // Executions
    // ------------------------------------------------------------------

    /// Create an execution: durable write, then best-effort cache fill.
    pub async fn create_execution(&self, execution: &ExecutionRecord) -> Result<()> {
        self.durable.create_execution(execution).await?;
        self.fill_cache(execution).await;
        Ok(())
    }

    /// Read an execution for `caller`. Missing rows and rows owned by
    /// someone else are both NotFound.
    pub async fn get_execution(&self, id: &str, caller: &str) -> Result<ExecutionRecord> {
        let record = self.get_any_execution(id).await?;
        match record {
            Some(record) if record.owner == caller => Ok(record),
            _ => Err(CoreError::NotFound {
                resource: "execution",
                id: id.to_string(),
            }),
        }
    }

    /// Read an execution regardless of owner (worker paths).
    pub async fn get_any_execution(&self, id: &str) -> Result<Option<ExecutionRecord>> {
        let cached = self.read_cached_execution(id).await;

        match self.durable.get_execution(id).await {
            Ok(Some(durable)) => {
                match cached {
                    // Fresh cache copy wins; nothing to refill.
                    Some(cached) if cached.updated_at >= durable.updated_at => Ok(Some(cached)),
                    _ => {
                        self.fill_cache(&durable).await;
                        Ok(Some(durable))
                    }
                }
            }
            Ok(None) => {
                if cached.is_some() {
                    // Stale leftovers from a deleted row.
                    self.invalidate(id).await;
                }
                Ok(None)
            }
            Err(e) => match cached {
                Some(cached) => {
                    warn!(execution_id = %id, error = %e, "durable store unreachable, serving cached copy");
                    Ok(Some(cached))
                }
                None => Err(e),
            },
        }
    }

    /// Guarded status transition: durable-first, then cache invalidation.
    pub async fn transition(
        &self,
        id: &str,
        from: ExecutionStatus,
        to: ExecutionStatus,
        error_message: Option<&str>,
    ) -> Result<bool> {
        let applied = self
            .durable
            .update_execution_status(id, from, to, error_message)
            .await?;
        if applied {
            self.invalidate(id).await;
        }
        Ok(applied)
    }

    /// Persist a result set and complete the execution.
    pub async fn complete(&self, id: &str, pareto: &ParetoSet) -> Result<bool> {
        let applied = self.durable.set_execution_result(id, pareto).await?;
        if applied {
            self.invalidate(id).await;
        }
        Ok(applied)
    }

    /// Load a stored result set.
    pub async fn get_pareto(&self, pareto_id: &str) -> Result<Option<ParetoSet>> {
        self.durable.get_pareto(pareto_id).await
    }

    /// Page through `owner`'s executions. Durable-only: listings must
    /// reflect committed state, never cache leftovers.
    pub async fn list_executions(
        &self,
        owner: &str,
        query: &ListQuery,
    ) -> Result<(Vec<ExecutionRecord>, i64)> {
        self.durable.list_executions(owner, query).await
    }

    /// Delete `caller`'s execution along with all cached state.
    pub async fn delete_execution(&self, id: &str, caller: &str) -> Result<()> {
        // Re-verify ownership immediately before the destructive write.
        let record = self.get_execution(id, caller).await?;
        self.durable.delete_execution(id).await?;

        for key in [execution_key(id), progress_key(id), cancel_key(id)] {
            if let Err(e) = self.cache.delete(&key).await {
                warn!(key = %key, error = %e, "failed to drop cached key after delete");
            }
        }
        if let Err(e) = self
            .cache
            .hdel(&user_executions_key(&record.owner), id)
            .await
        {
            warn!(execution_id = %id, error = %e, "failed to drop user index entry after delete");
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Progress and cancellation (cache-only)
    // ------------------------------------------------------------------

    /// Store a progress snapshot and publish it to stream subscribers.
    /// Publish failures are logged, not returned: progress is advisory.
    pub async fn save_progress(&self, progress: &ProgressRecord) -> Result<()> {
        let payload = serde_json::to_string(progress)?;
        let key = progress_key(&progress.execution_id);
        if let Err(e) = self
            .cache
            .set(&key, &payload, Some(self.ttl.progress))
            .await
        {
            warn!(execution_id = %progress.execution_id, error = %e, "failed to cache progress snapshot");
        }
        if let Err(e) = self
            .cache
            .publish(&updates_topic(&progress.execution_id), &payload)
            .await
        {
            debug!(execution_id = %progress.execution_id, error = %e, "failed to publish progress update");
        }
        Ok(())
    }

    /// Latest progress snapshot, if one is cached.
    pub async fn get_progress(&self, id: &str) -> Result<Option<ProgressRecord>> {
        let Some(payload) = self.cache.get(&progress_key(id)).await.unwrap_or_else(|e| {
            warn!(execution_id = %id, error = %e, "failed to read progress snapshot");
            None
        }) else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_str(&payload)?))
    }

    /// Raise the cancel flag and signal any running worker.
    pub async fn mark_cancelled(&self, id: &str) -> Result<()> {
        self.cache
            .set(&cancel_key(id), "1", Some(self.ttl.execution))
            .await
            .map_err(|e| CoreError::Internal {
                details: format!("failed to set cancel flag: {e}"),
            })?;
        if let Err(e) = self.cache.publish(&cancel_topic(id), "cancel").await {
            warn!(execution_id = %id, error = %e, "failed to publish cancel signal");
        }
        Ok(())
    }

    /// Whether the cancel flag is raised. Cache errors read as false:
    /// a dead cache must not cancel work.
    pub async fn is_cancelled(&self, id: &str) -> bool {
        match self.cache.get(&cancel_key(id)).await {
            Ok(flag) => flag.is_some(),
            Err(e) => {
                warn!(execution_id = %id, error = %e, "failed to read cancel flag");
                false
            }
        }
    }

    /// Subscribe to an execution's progress updates.
    pub async fn subscribe_updates(&self, id: &str) -> Result<Subscription> {
        self.cache
            .subscribe(&updates_topic(id))
            .await
            .map_err(|e| CoreError::Internal {
                details: format!("failed to subscribe to updates: {e}"),
            })
    }

    /// Subscribe to an execution's cancel signal.
    pub async fn subscribe_cancel(&self, id: &str) -> Result<Subscription> {
        self.cache
            .subscribe(&cancel_topic(id))
            .await
            .map_err(|e| CoreError::Internal {
                details: format!("failed to subscribe to cancel signal: {e}"),
            })
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    async fn read_cached_execution(&self, id: &str) -> Option<ExecutionRecord> {
        match self.cache.get(&execution_key(id)).await {
            Ok(Some(payload)) => match serde_json::from_str(&payload) {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!(execution_id = %id, error = %e, "dropping corrupt cached execution");
                    let _ = self.cache.delete(&execution_key(id)).await;
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                debug!(execution_id = %id, error = %e, "cache read failed");
                None
            }
        }
    }

    async fn fill_cache(&self, execution: &ExecutionRecord) {
        let payload = match serde_json::to_string(execution) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(execution_id = %execution.id, error = %e, "failed to serialize execution for cache");
                return;
            }
        };
        if let Err(e) = self
            .cache
            .set(&execution_key(&execution.id), &payload, Some(self.ttl.execution))
            .await
        {
            debug!(execution_id = %execution.id, error = %e, "failed to cache execution");
        }
        let index_key = user_executions_key(&execution.owner);
        if let Err(e) = self.cache.hset(&index_key, &execution.id, &payload).await {
            debug!(execution_id = %execution.id, error = %e, "failed to index execution for user");
            return;
        }
        // Hashes carry no per-field TTL; refresh the whole index instead.
        if let Err(e) = self.cache.expire(&index_key, self.ttl.execution).await {
            debug!(execution_id = %execution.id, error = %e, "failed to bound user index lifetime");
        }
    }

    async fn invalidate(&self, id: &str) {
        if let Err(e) = self.cache.delete(&execution_key(id)).await {
            debug!(execution_id = %id, error = %e, "failed to invalidate cached execution");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::store::SqliteStore;
    use chrono::Utc;
    use std::time::Duration;
    use uuid::Uuid;

    fn ttl() -> TtlConfig {
        TtlConfig {
            execution: Duration::from_secs(60),
            result: Duration::from_secs(60),
            progress: Duration::from_secs(60),
        }
    }

    async fn composite() -> (CompositeStore, Arc<MemoryCache>) {
        let durable = Arc::new(SqliteStore::in_memory().await.unwrap());
        let cache = Arc::new(MemoryCache::new());
        (
            CompositeStore::new(durable, cache.clone(), ttl()),
            cache,
        )
    }

    fn execution(owner: &str) -> ExecutionRecord {
        let now = Utc::now();
        ExecutionRecord {
            id: Uuid::new_v4().to_string(),
            owner: owner.to_string(),
            status: "pending".to_string(),
            algorithm: "gde3".to_string(),
            problem: "zdt1".to_string(),
            variant: "rand1".to_string(),
            config: "{}".to_string(),
            error_message: None,
            pareto_id: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    #[tokio::test]
    async fn test_create_fills_cache_and_user_index() {
        let (store, cache) = composite().await;
        let exec = execution("alice");
        store.create_execution(&exec).await.unwrap();

        assert!(cache.get(&execution_key(&exec.id)).await.unwrap().is_some());
        assert!(
            cache
                .hget(&user_executions_key("alice"), &exec.id)
                .await
                .unwrap()
                .is_some()
        );
    }

    #[tokio::test]
    async fn test_get_falls_back_to_durable_and_refills() {
        let (store, cache) = composite().await;
        let exec = execution("alice");
        store.create_execution(&exec).await.unwrap();
        cache.delete(&execution_key(&exec.id)).await.unwrap();

        let found = store.get_execution(&exec.id, "alice").await.unwrap();
        assert_eq!(found.id, exec.id);
        // Refilled on the way out.
        assert!(cache.get(&execution_key(&exec.id)).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_owner_mismatch_is_not_found() {
        let (store, _cache) = composite().await;
        let exec = execution("alice");
        store.create_execution(&exec).await.unwrap();

        let err = store.get_execution(&exec.id, "mallory").await.unwrap_err();
        assert_eq!(err.error_code(), "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_transition_invalidates_cache() {
        let (store, cache) = composite().await;
        let exec = execution("alice");
        store.create_execution(&exec).await.unwrap();

        assert!(
            store
                .transition(
                    &exec.id,
                    ExecutionStatus::Pending,
                    ExecutionStatus::Running,
                    None
                )
                .await
                .unwrap()
        );
        assert!(cache.get(&execution_key(&exec.id)).await.unwrap().is_none());

        // Next read refills with the new status.
        let found = store.get_execution(&exec.id, "alice").await.unwrap();
        assert_eq!(found.status(), ExecutionStatus::Running);
    }

    #[tokio::test]
    async fn test_stale_cache_loses_to_durable() {
        let (store, cache) = composite().await;
        let exec = execution("alice");
        store.create_execution(&exec).await.unwrap();

        // Plant a doctored cache copy older than the durable row.
        let mut stale = exec.clone();
        stale.status = "running".to_string();
        stale.updated_at = exec.updated_at - chrono::Duration::seconds(60);
        cache
            .set(
                &execution_key(&exec.id),
                &serde_json::to_string(&stale).unwrap(),
                None,
            )
            .await
            .unwrap();

        let found = store.get_execution(&exec.id, "alice").await.unwrap();
        assert_eq!(found.status(), ExecutionStatus::Pending);
    }

    #[tokio::test]
    async fn test_progress_cache_only_roundtrip() {
        let (store, _cache) = composite().await;
        let progress = ProgressRecord {
            execution_id: "e-1".to_string(),
            current_generation: 5,
            total_generations: 10,
            completed_executions: 0,
            total_executions: 1,
            partial_pareto: vec![],
            updated_at: Utc::now(),
        };
        store.save_progress(&progress).await.unwrap();

        let found = store.get_progress("e-1").await.unwrap().unwrap();
        assert_eq!(found.current_generation, 5);
        assert!(store.get_progress("e-other").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_progress_publishes_to_subscribers() {
        let (store, _cache) = composite().await;
        let mut sub = store.subscribe_updates("e-1").await.unwrap();
        let progress = ProgressRecord {
            execution_id: "e-1".to_string(),
            current_generation: 1,
            total_generations: 10,
            completed_executions: 0,
            total_executions: 1,
            partial_pareto: vec![],
            updated_at: Utc::now(),
        };
        store.save_progress(&progress).await.unwrap();

        let payload = sub.recv().await.unwrap();
        let received: ProgressRecord = serde_json::from_str(&payload).unwrap();
        assert_eq!(received.current_generation, 1);
    }

    #[tokio::test]
    async fn test_cancel_flag_and_signal() {
        let (store, _cache) = composite().await;
        assert!(!store.is_cancelled("e-1").await);

        let mut sub = store.subscribe_cancel("e-1").await.unwrap();
        store.mark_cancelled("e-1").await.unwrap();

        assert!(store.is_cancelled("e-1").await);
        assert_eq!(sub.recv().await, Some("cancel".to_string()));
    }

    #[tokio::test]
    async fn test_delete_clears_all_cached_state() {
        let (store, cache) = composite().await;
        let exec = execution("alice");
        store.create_execution(&exec).await.unwrap();
        store.mark_cancelled(&exec.id).await.unwrap();

        store.delete_execution(&exec.id, "alice").await.unwrap();

        assert!(cache.get(&execution_key(&exec.id)).await.unwrap().is_none());
        assert!(cache.get(&cancel_key(&exec.id)).await.unwrap().is_none());
        assert!(
            cache
                .hget(&user_executions_key("alice"), &exec.id)
                .await
                .unwrap()
                .is_none()
        );
        let err = store.get_execution(&exec.id, "alice").await.unwrap_err();
        assert_eq!(err.error_code(), "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_delete_refuses_foreign_owner() {
        let (store, _cache) = composite().await;
        let exec = execution("alice");
        store.create_execution(&exec).await.unwrap();

        let err = store
            .delete_execution(&exec.id, "mallory")
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "NOT_FOUND");
        assert!(store.get_execution(&exec.id, "alice").await.is_ok());
    }
}
