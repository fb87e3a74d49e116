// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Bounded worker pool running DE jobs.
//!
//! Submission is fail-fast: a queue permit is reserved before the
//! durable row is created, so an accepted job always has both a row and
//! a queue slot, and a full queue rejects without writing anything.
//! Each running job holds a cancellation token; cancel signals arrive
//! through the cache pub/sub topic or directly from the handler. Kernel
//! runs happen on the blocking pool, publishing rate-limited progress
//! snapshots through the composite store.

use std::collections::HashMap;
use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use devolve_kernel::{
    Algorithm, DeConfig, KernelError, Problem, ProgressSink, ProgressSnapshot, Variant, Vector,
    rank_zero,
};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::ExecutorConfig;
use crate::error::{CoreError, Result};
use crate::store::{CompositeStore, ExecutionRecord, ExecutionStatus, ParetoSet, ProgressRecord};

/// Vectors per published progress snapshot.
pub const MAX_PROGRESS_VECTORS: usize = 100;

/// Resolved components and configuration for one run.
pub struct JobSpec {
    /// The algorithm to run.
    pub algorithm: Arc<dyn Algorithm>,
    /// The problem to optimize.
    pub problem: Arc<dyn Problem>,
    /// The mutation variant.
    pub variant: Arc<dyn Variant>,
    /// Kernel run configuration.
    pub config: DeConfig,
}

struct Job {
    execution_id: String,
    spec: JobSpec,
}

struct Inner {
    store: Arc<CompositeStore>,
    queue_tx: StdMutex<Option<mpsc::Sender<Job>>>,
    cancels: StdMutex<HashMap<String, CancellationToken>>,
    shutdown_tx: watch::Sender<bool>,
    accepting: AtomicBool,
    progress_interval: Duration,
    workers: StdMutex<Vec<JoinHandle<()>>>,
}

impl Inner {
    fn lock_cancels(&self) -> std::sync::MutexGuard<'_, HashMap<String, CancellationToken>> {
        match self.cancels.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// The worker pool. Clones share the same queue and workers.
#[derive(Clone)]
pub struct Executor {
    inner: Arc<Inner>,
}

impl Executor {
    /// Start `config.max_workers` workers over a bounded queue.
    pub fn start(store: Arc<CompositeStore>, config: &ExecutorConfig) -> Self {
        let (queue_tx, queue_rx) = mpsc::channel::<Job>(config.queue_size);
        let (shutdown_tx, _) = watch::channel(false);
        let inner = Arc::new(Inner {
            store,
            queue_tx: StdMutex::new(Some(queue_tx)),
            cancels: StdMutex::new(HashMap::new()),
            shutdown_tx,
            accepting: AtomicBool::new(true),
            progress_interval: config.progress_interval,
            workers: StdMutex::new(Vec::with_capacity(config.max_workers)),
        });

        let queue_rx = Arc::new(Mutex::new(queue_rx));
        let mut workers = Vec::with_capacity(config.max_workers);
        for worker_id in 0..config.max_workers {
            let inner = inner.clone();
            let queue_rx = queue_rx.clone();
            workers.push(tokio::spawn(worker_loop(worker_id, inner, queue_rx)));
        }
        if let Ok(mut guard) = inner.workers.lock() {
            *guard = workers;
        }
        info!(
            workers = config.max_workers,
            queue_size = config.queue_size,
            "executor started"
        );

        Self { inner }
    }

    /// Queue a job: reserve a slot, create the durable row, then hand
    /// the job to the workers. A full queue fails before any write.
    pub async fn submit(&self, record: ExecutionRecord, spec: JobSpec) -> Result<()> {
        if !self.inner.accepting.load(Ordering::SeqCst) {
            return Err(CoreError::QueueFull);
        }
        let tx = {
            let guard = match self.inner.queue_tx.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            guard.clone()
        };
        let Some(tx) = tx else {
            return Err(CoreError::QueueFull);
        };
        let permit = tx.try_reserve().map_err(|_| CoreError::QueueFull)?;

        let execution_id = record.id.clone();
        self.inner.store.create_execution(&record).await?;
        permit.send(Job { execution_id, spec });
        Ok(())
    }

    /// Cancel a job running on this node. Remote or queued jobs are
    /// reached through the cache flag and pub/sub signal instead.
    pub fn cancel_local(&self, execution_id: &str) {
        if let Some(token) = self.inner.lock_cancels().get(execution_id) {
            token.cancel();
        }
    }

    /// Graceful shutdown: refuse new submissions, cancel running jobs,
    /// wait up to `grace`, then force-fail stragglers.
    pub async fn shutdown(&self, grace: Duration) {
        info!("executor shutting down");
        self.inner.accepting.store(false, Ordering::SeqCst);
        let _ = self.inner.shutdown_tx.send(true);
        // Closing the queue lets idle workers exit.
        if let Ok(mut guard) = self.inner.queue_tx.lock() {
            guard.take();
        }
        for token in self.inner.lock_cancels().values() {
            token.cancel();
        }

        let workers: Vec<JoinHandle<()>> = {
            let mut guard = match self.inner.workers.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            guard.drain(..).collect()
        };
        let drain = async {
            for worker in workers {
                let _ = worker.await;
            }
        };
        if tokio::time::timeout(grace, drain).await.is_err() {
            warn!("grace period elapsed with jobs still running");
        }

        // Whatever is still registered did not reach a terminal status.
        let stragglers: Vec<String> = self.inner.lock_cancels().keys().cloned().collect();
        for id in stragglers {
            match self
                .inner
                .store
                .transition(
                    &id,
                    ExecutionStatus::Running,
                    ExecutionStatus::Failed,
                    Some("shutdown"),
                )
                .await
            {
                Ok(true) => warn!(execution_id = %id, "failed straggler on shutdown"),
                Ok(false) => {}
                Err(e) => error!(execution_id = %id, error = %e, "could not fail straggler"),
            }
        }
        info!("executor stopped");
    }
}

async fn worker_loop(worker_id: usize, inner: Arc<Inner>, queue_rx: Arc<Mutex<mpsc::Receiver<Job>>>) {
    loop {
        let job = {
            let mut rx = queue_rx.lock().await;
            rx.recv().await
        };
        let Some(job) = job else {
            debug!(worker_id, "queue closed, worker exiting");
            return;
        };

        if *inner.shutdown_tx.borrow() {
            // Queued but never started; fail it rather than running
            // work nobody will wait for.
            let _ = inner
                .store
                .transition(
                    &job.execution_id,
                    ExecutionStatus::Pending,
                    ExecutionStatus::Failed,
                    Some("shutdown"),
                )
                .await;
            continue;
        }

        run_job(&inner, job).await;
    }
}

async fn run_job(inner: &Arc<Inner>, job: Job) {
    let execution_id = job.execution_id.clone();
    let token = CancellationToken::new();
    inner
        .lock_cancels()
        .insert(execution_id.clone(), token.clone());

    execute(inner, job, token).await;

    inner.lock_cancels().remove(&execution_id);
}

async fn execute(inner: &Arc<Inner>, job: Job, token: CancellationToken) {
    let id = job.execution_id.clone();
    let store = inner.store.clone();

    // Cancelled while queued: go straight to the terminal status.
    if store.is_cancelled(&id).await {
        match store
            .transition(&id, ExecutionStatus::Pending, ExecutionStatus::Cancelled, None)
            .await
        {
            Ok(_) => info!(execution_id = %id, "cancelled before start"),
            Err(e) => error!(execution_id = %id, error = %e, "failed to cancel pending job"),
        }
        return;
    }

    match store
        .transition(&id, ExecutionStatus::Pending, ExecutionStatus::Running, None)
        .await
    {
        Ok(true) => {}
        Ok(false) => {
            // Someone else moved the row (cancel racing the dequeue).
            debug!(execution_id = %id, "job no longer pending, skipping");
            return;
        }
        Err(e) => {
            error!(execution_id = %id, error = %e, "failed to start job");
            return;
        }
    }
    info!(execution_id = %id, "job running");

    // Cancel signals: pub/sub topic and process shutdown both trip the
    // token the kernel sink watches.
    let watcher = {
        let token = token.clone();
        let store = store.clone();
        let id = id.clone();
        let mut shutdown_rx = inner.shutdown_tx.subscribe();
        tokio::spawn(async move {
            let subscription = store.subscribe_cancel(&id).await;
            match subscription {
                Ok(mut sub) => {
                    tokio::select! {
                        message = sub.recv() => {
                            if message.is_some() {
                                token.cancel();
                            }
                        }
                        _ = shutdown_rx.changed() => token.cancel(),
                    }
                }
                Err(e) => {
                    warn!(execution_id = %id, error = %e, "cancel subscription failed");
                    if shutdown_rx.changed().await.is_ok() {
                        token.cancel();
                    }
                }
            }
        })
    };

    // Progress snapshots cross from the blocking kernel thread through
    // an unbounded channel; this task persists and publishes them.
    let (progress_tx, mut progress_rx) = mpsc::unbounded_channel::<ProgressRecord>();
    let forwarder = {
        let store = store.clone();
        tokio::spawn(async move {
            while let Some(progress) = progress_rx.recv().await {
                if let Err(e) = store.save_progress(&progress).await {
                    warn!(execution_id = %progress.execution_id, error = %e, "failed to save progress");
                }
            }
        })
    };

    let kernel_token = token.clone();
    let kernel_id = id.clone();
    let interval = inner.progress_interval;
    let outcome = tokio::task::spawn_blocking(move || {
        run_kernel(&job.spec, kernel_id, kernel_token, progress_tx, interval)
    })
    .await;

    watcher.abort();
    let _ = forwarder.await;

    match outcome {
        Ok(Ok(front)) => {
            let pareto = ParetoSet::from_front(Uuid::new_v4().to_string(), front);
            match store.complete(&id, &pareto).await {
                Ok(true) => info!(execution_id = %id, vectors = pareto.vectors.len(), "job completed"),
                Ok(false) => debug!(execution_id = %id, "completion refused, job no longer running"),
                Err(e) => error!(execution_id = %id, error = %e, "failed to store result"),
            }
        }
        Ok(Err(KernelError::Cancelled)) => {
            match store
                .transition(&id, ExecutionStatus::Running, ExecutionStatus::Cancelled, None)
                .await
            {
                Ok(_) => info!(execution_id = %id, "job cancelled"),
                Err(e) => error!(execution_id = %id, error = %e, "failed to mark job cancelled"),
            }
        }
        Ok(Err(e)) => {
            let message = e.to_string();
            warn!(execution_id = %id, error = %message, "job failed");
            if let Err(e) = store
                .transition(
                    &id,
                    ExecutionStatus::Running,
                    ExecutionStatus::Failed,
                    Some(&message),
                )
                .await
            {
                error!(execution_id = %id, error = %e, "failed to mark job failed");
            }
        }
        Err(join_err) => {
            error!(execution_id = %id, error = %join_err, "kernel task panicked");
            let _ = store
                .transition(
                    &id,
                    ExecutionStatus::Running,
                    ExecutionStatus::Failed,
                    Some("internal error"),
                )
                .await;
        }
    }
}

/// Run `config.executions` independent evolutions and merge their
/// fronts into one non-dominated set. Runs on the blocking pool.
fn run_kernel(
    spec: &JobSpec,
    execution_id: String,
    token: CancellationToken,
    progress_tx: mpsc::UnboundedSender<ProgressRecord>,
    interval: Duration,
) -> std::result::Result<Vec<Vector>, KernelError> {
    let mut sink = WorkerSink {
        execution_id,
        token,
        tx: progress_tx,
        last_publish: None,
        interval,
        completed_executions: 0,
        total_executions: spec.config.executions,
    };

    let mut combined: Vec<Vector> = Vec::new();
    for _ in 0..spec.config.executions {
        let front = spec.algorithm.run(
            spec.problem.as_ref(),
            spec.variant.as_ref(),
            &spec.config,
            &mut sink,
        )?;
        combined.extend(front);
        sink.completed_executions += 1;
    }
    Ok(rank_zero(&combined))
}

struct WorkerSink {
    execution_id: String,
    token: CancellationToken,
    tx: mpsc::UnboundedSender<ProgressRecord>,
    last_publish: Option<Instant>,
    interval: Duration,
    completed_executions: u32,
    total_executions: u32,
}

impl ProgressSink for WorkerSink {
    fn on_generation(&mut self, snapshot: ProgressSnapshot) -> std::result::Result<(), KernelError> {
        if self.token.is_cancelled() {
            return Err(KernelError::Cancelled);
        }

        // Rate-limit publications; the final generation always goes out.
        let is_last = snapshot.current_generation == snapshot.total_generations;
        if !is_last
            && self
                .last_publish
                .is_some_and(|at| at.elapsed() < self.interval)
        {
            return Ok(());
        }
        self.last_publish = Some(Instant::now());

        let mut partial_pareto = snapshot.pareto;
        partial_pareto.truncate(MAX_PROGRESS_VECTORS);
        // Send failures mean the run is being torn down; the kernel
        // still observes cancellation through the token.
        let _ = self.tx.send(ProgressRecord {
            execution_id: self.execution_id.clone(),
            current_generation: snapshot.current_generation,
            total_generations: snapshot.total_generations,
            completed_executions: self.completed_executions,
            total_executions: self.total_executions,
            partial_pareto,
            updated_at: Utc::now(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::config::TtlConfig;
    use crate::store::SqliteStore;
    use devolve_kernel::{AlgorithmRegistry, ProblemRegistry, VariantRegistry};

    fn executor_config(workers: usize, queue: usize) -> ExecutorConfig {
        ExecutorConfig {
            max_workers: workers,
            queue_size: queue,
            progress_interval: Duration::from_millis(10),
        }
    }

    async fn store() -> Arc<CompositeStore> {
        let durable = Arc::new(SqliteStore::in_memory().await.unwrap());
        Arc::new(CompositeStore::new(
            durable,
            Arc::new(MemoryCache::new()),
            TtlConfig {
                execution: Duration::from_secs(60),
                result: Duration::from_secs(60),
                progress: Duration::from_secs(60),
            },
        ))
    }

    fn record(id: &str) -> ExecutionRecord {
        let now = Utc::now();
        ExecutionRecord {
            id: id.to_string(),
            owner: "alice".to_string(),
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

    fn spec(generations: u32) -> JobSpec {
        JobSpec {
            algorithm: AlgorithmRegistry::with_defaults().create("gde3").unwrap(),
            problem: ProblemRegistry::with_defaults().create("zdt1").unwrap(),
            variant: VariantRegistry::with_defaults().create("rand1").unwrap(),
            config: DeConfig {
                executions: 1,
                generations,
                population_size: 12,
                dimensions_size: 5,
                objectives_size: 2,
                floor: 0.0,
                ceil: 1.0,
                ..Default::default()
            },
        }
    }

    async fn wait_for_terminal(store: &CompositeStore, id: &str) -> ExecutionStatus {
        for _ in 0..200 {
            let record = store.get_any_execution(id).await.unwrap().unwrap();
            if record.status().is_terminal() {
                return record.status();
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        panic!("execution '{id}' never reached a terminal status");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_small_run_completes_with_results() {
        let store = store().await;
        let executor = Executor::start(store.clone(), &executor_config(2, 8));

        executor.submit(record("e-1"), spec(5)).await.unwrap();
        assert_eq!(
            wait_for_terminal(&store, "e-1").await,
            ExecutionStatus::Completed
        );

        let execution = store.get_any_execution("e-1").await.unwrap().unwrap();
        let pareto_id = execution.pareto_id.unwrap();
        let pareto = store.get_pareto(&pareto_id).await.unwrap().unwrap();
        assert!(!pareto.vectors.is_empty());
        for vector in &pareto.vectors {
            assert_eq!(vector.objectives.len(), 2);
        }

        executor.shutdown(Duration::from_secs(5)).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_cancel_running_job() {
        let store = store().await;
        let executor = Executor::start(store.clone(), &executor_config(1, 8));

        // Enough generations to still be running when cancel lands.
        executor.submit(record("e-1"), spec(200_000)).await.unwrap();

        // Wait for it to start, then raise the flag and signal.
        for _ in 0..200 {
            let record = store.get_any_execution("e-1").await.unwrap().unwrap();
            if record.status() == ExecutionStatus::Running {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        store.mark_cancelled("e-1").await.unwrap();
        executor.cancel_local("e-1");

        assert_eq!(
            wait_for_terminal(&store, "e-1").await,
            ExecutionStatus::Cancelled
        );
        executor.shutdown(Duration::from_secs(5)).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_full_queue_rejects_without_row() {
        let store = store().await;
        // One slow worker, queue of one.
        let executor = Executor::start(store.clone(), &executor_config(1, 1));

        executor.submit(record("e-1"), spec(200_000)).await.unwrap();
        // Wait for the worker to dequeue e-1 so the queue slot is free
        // for e-2; submitting earlier races the dequeue.
        for _ in 0..200 {
            let record = store.get_any_execution("e-1").await.unwrap().unwrap();
            if record.status() == ExecutionStatus::Running {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        executor.submit(record("e-2"), spec(200_000)).await.unwrap();

        // Worker busy with e-1, queue holds e-2; the third must bounce.
        let mut rejected = None;
        for i in 3..20 {
            let id = format!("e-{i}");
            match executor.submit(record(&id), spec(200_000)).await {
                Err(CoreError::QueueFull) => {
                    rejected = Some(id);
                    break;
                }
                Ok(()) => continue,
                Err(other) => panic!("unexpected error: {other:?}"),
            }
        }
        let rejected = rejected.expect("queue never filled");
        // Fail-fast: no durable row for the rejected submission.
        assert!(
            store
                .get_any_execution(&rejected)
                .await
                .unwrap()
                .is_none()
        );

        store.mark_cancelled("e-1").await.unwrap();
        store.mark_cancelled("e-2").await.unwrap();
        executor.cancel_local("e-1");
        executor.shutdown(Duration::from_secs(5)).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_cancel_while_pending() {
        let store = store().await;
        let executor = Executor::start(store.clone(), &executor_config(1, 4));

        // Occupy the single worker, then queue and cancel a second job.
        executor.submit(record("busy"), spec(200_000)).await.unwrap();
        executor.submit(record("queued"), spec(5)).await.unwrap();
        store.mark_cancelled("queued").await.unwrap();

        // Free the worker so it dequeues the cancelled job.
        store.mark_cancelled("busy").await.unwrap();
        executor.cancel_local("busy");

        assert_eq!(
            wait_for_terminal(&store, "queued").await,
            ExecutionStatus::Cancelled
        );
        executor.shutdown(Duration::from_secs(5)).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_progress_snapshots_published() {
        let store = store().await;
        let executor = Executor::start(store.clone(), &executor_config(1, 4));

        let mut sub = store.subscribe_updates("e-1").await.unwrap();
        executor.submit(record("e-1"), spec(50)).await.unwrap();

        let payload = tokio::time::timeout(Duration::from_secs(30), sub.recv())
            .await
            .expect("no progress within timeout")
            .expect("topic closed");
        let progress: ProgressRecord = serde_json::from_str(&payload).unwrap();
        assert_eq!(progress.execution_id, "e-1");
        assert!(progress.current_generation >= 1);
        assert_eq!(progress.total_generations, 50);
        assert!(progress.partial_pareto.len() <= MAX_PROGRESS_VECTORS);

        wait_for_terminal(&store, "e-1").await;
        executor.shutdown(Duration::from_secs(5)).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_shutdown_refuses_new_submissions() {
        let store = store().await;
        let executor = Executor::start(store.clone(), &executor_config(1, 4));
        executor.shutdown(Duration::from_secs(1)).await;

        let err = executor.submit(record("late"), spec(5)).await.unwrap_err();
        assert!(matches!(err, CoreError::QueueFull));
    }
}
