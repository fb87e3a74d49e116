// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! DE service handlers: catalog listings, run submission, status,
//! results, cancellation, deletion and listing.
//!
//! Ownership is enforced on every per-execution operation; a mismatch is
//! indistinguishable from a missing execution.

use chrono::Utc;
use devolve_protocol::proto;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::auth::AuthContext;
use crate::error::{CoreError, FieldError, Result};
use crate::executor::JobSpec;
use crate::store::{ExecutionRecord, ExecutionStatus, ListQuery};
use crate::validation;

use super::{HandlerState, execution_to_proto, pareto_to_proto, progress_to_proto};

fn to_kernel_config(config: &proto::DeConfig) -> devolve_kernel::DeConfig {
    devolve_kernel::DeConfig {
        executions: config.executions,
        generations: config.generations,
        population_size: config.population_size,
        dimensions_size: config.dimensions_size,
        objectives_size: config.objectives_size,
        floor: config.floor,
        ceil: config.ceil,
        gde3: config
            .gde3
            .map(|p| devolve_kernel::Gde3Params {
                cr: p.cr,
                f: p.f,
                p: p.p,
            })
            .unwrap_or_default(),
    }
}

/// List supported algorithm names.
pub async fn handle_list_algorithms(
    state: &HandlerState,
    _request: proto::ListSupportedAlgorithmsRequest,
) -> Result<proto::ListSupportedAlgorithmsResponse> {
    Ok(proto::ListSupportedAlgorithmsResponse {
        algorithms: state.algorithms.list(),
    })
}

/// List supported mutation variants with descriptions.
pub async fn handle_list_variants(
    state: &HandlerState,
    _request: proto::ListSupportedVariantsRequest,
) -> Result<proto::ListSupportedVariantsResponse> {
    Ok(proto::ListSupportedVariantsResponse {
        variants: state
            .variants
            .list_metadata()
            .into_iter()
            .map(|e| proto::EntryMetadata {
                name: e.name,
                description: e.description,
            })
            .collect(),
    })
}

/// List supported problems with descriptions.
pub async fn handle_list_problems(
    state: &HandlerState,
    _request: proto::ListSupportedProblemsRequest,
) -> Result<proto::ListSupportedProblemsResponse> {
    Ok(proto::ListSupportedProblemsResponse {
        problems: state
            .problems
            .list_metadata()
            .into_iter()
            .map(|e| proto::EntryMetadata {
                name: e.name,
                description: e.description,
            })
            .collect(),
    })
}

/// Validate, resolve and queue a run. Nothing is persisted when any
/// part of the request is invalid or the queue is full.
#[instrument(skip(state, request), fields(username = %ctx.subject))]
pub async fn handle_run_async(
    state: &HandlerState,
    ctx: &AuthContext,
    request: proto::RunAsyncRequest,
) -> Result<proto::RunAsyncResponse> {
    validation::validate_run_async(&request)?;

    let mut violations = Vec::new();
    let algorithm = state.algorithms.create(&request.algorithm);
    if algorithm.is_none() {
        violations.push(FieldError::new("algorithm", "is not supported"));
    }
    let problem = state.problems.create(&request.problem);
    if problem.is_none() {
        violations.push(FieldError::new("problem", "is not supported"));
    }
    let variant = state.variants.create(&request.variant);
    if variant.is_none() {
        violations.push(FieldError::new("variant", "is not supported"));
    }
    if !violations.is_empty() {
        return Err(CoreError::InvalidInput { violations });
    }

    // Presence checked above and by validate_run_async.
    let (Some(algorithm), Some(problem), Some(variant), Some(config)) =
        (algorithm, problem, variant, request.config.as_ref())
    else {
        return Err(CoreError::Internal {
            details: "run components vanished after validation".to_string(),
        });
    };
    let kernel_config = to_kernel_config(config);

    let now = Utc::now();
    let record = ExecutionRecord {
        id: Uuid::new_v4().to_string(),
        owner: ctx.subject.clone(),
        status: ExecutionStatus::Pending.as_str().to_string(),
        algorithm: request.algorithm,
        problem: request.problem,
        variant: request.variant,
        config: serde_json::to_string(&kernel_config)?,
        error_message: None,
        pareto_id: None,
        created_at: now,
        updated_at: now,
        completed_at: None,
    };
    let execution_id = record.id.clone();

    state
        .executor
        .submit(
            record,
            JobSpec {
                algorithm,
                problem,
                variant,
                config: kernel_config,
            },
        )
        .await?;

    info!(execution_id = %execution_id, "run queued");
    Ok(proto::RunAsyncResponse { execution_id })
}

/// Current execution snapshot, with the latest progress when cached.
pub async fn handle_get_status(
    state: &HandlerState,
    ctx: &AuthContext,
    request: proto::GetExecutionStatusRequest,
) -> Result<proto::GetExecutionStatusResponse> {
    let record = state
        .store
        .get_execution(&request.execution_id, &ctx.subject)
        .await?;
    let progress = state.store.get_progress(&record.id).await?;
    Ok(proto::GetExecutionStatusResponse {
        execution: Some(execution_to_proto(&record)),
        progress: progress.as_ref().map(progress_to_proto),
    })
}

/// Stored result set of a COMPLETED execution.
pub async fn handle_get_results(
    state: &HandlerState,
    ctx: &AuthContext,
    request: proto::GetExecutionResultsRequest,
) -> Result<proto::GetExecutionResultsResponse> {
    let record = state
        .store
        .get_execution(&request.execution_id, &ctx.subject)
        .await?;
    let status = record.status();
    if status != ExecutionStatus::Completed {
        return Err(CoreError::ConflictState {
            execution_id: record.id,
            status: status.as_api_str().to_string(),
        });
    }
    let Some(pareto_id) = record.pareto_id.as_deref() else {
        return Err(CoreError::Internal {
            details: format!("completed execution '{}' has no result set", record.id),
        });
    };
    let pareto = state
        .store
        .get_pareto(pareto_id)
        .await?
        .ok_or_else(|| CoreError::Internal {
            details: format!("result set '{pareto_id}' is missing"),
        })?;
    Ok(proto::GetExecutionResultsResponse {
        pareto: Some(pareto_to_proto(&pareto)),
    })
}

/// Request cancellation. Idempotent: a terminal execution is already
/// as cancelled as it will ever be.
#[instrument(skip(state, request), fields(username = %ctx.subject, execution_id = %request.execution_id))]
pub async fn handle_cancel(
    state: &HandlerState,
    ctx: &AuthContext,
    request: proto::CancelExecutionRequest,
) -> Result<proto::CancelExecutionResponse> {
    let record = state
        .store
        .get_execution(&request.execution_id, &ctx.subject)
        .await?;
    if record.status().is_terminal() {
        return Ok(proto::CancelExecutionResponse {});
    }

    state.store.mark_cancelled(&record.id).await?;
    // A queued job can finish cancelling right here; a running one is
    // reached through the token and the pub/sub signal.
    let _ = state
        .store
        .transition(
            &record.id,
            ExecutionStatus::Pending,
            ExecutionStatus::Cancelled,
            None,
        )
        .await?;
    state.executor.cancel_local(&record.id);
    info!("cancellation requested");
    Ok(proto::CancelExecutionResponse {})
}

/// Delete an execution and everything stored for it.
#[instrument(skip(state, request), fields(username = %ctx.subject, execution_id = %request.execution_id))]
pub async fn handle_delete(
    state: &HandlerState,
    ctx: &AuthContext,
    request: proto::DeleteExecutionRequest,
) -> Result<proto::DeleteExecutionResponse> {
    let record = state
        .store
        .get_execution(&request.execution_id, &ctx.subject)
        .await?;
    if !record.status().is_terminal() {
        // Stop the work before removing the row it reports into.
        state.store.mark_cancelled(&record.id).await?;
        state.executor.cancel_local(&record.id);
    }
    state
        .store
        .delete_execution(&record.id, &ctx.subject)
        .await?;
    info!("execution deleted");
    Ok(proto::DeleteExecutionResponse {})
}

/// Page through the caller's executions, newest first.
pub async fn handle_list_executions(
    state: &HandlerState,
    ctx: &AuthContext,
    request: proto::ListExecutionsRequest,
) -> Result<proto::ListExecutionsResponse> {
    let status = if request.status.is_empty() {
        None
    } else {
        Some(
            ExecutionStatus::parse(&request.status).ok_or_else(|| {
                CoreError::invalid_field(
                    "status",
                    "must be one of PENDING, RUNNING, COMPLETED, FAILED, CANCELLED",
                )
            })?,
        )
    };
    let query = ListQuery {
        status,
        limit: request.limit,
        offset: request.offset,
    };
    let limit = query.effective_limit();
    let (records, total) = state.store.list_executions(&ctx.subject, &query).await?;

    let has_more = (query.offset as i64 + records.len() as i64) < total;
    Ok(proto::ListExecutionsResponse {
        executions: records.iter().map(execution_to_proto).collect(),
        total,
        limit,
        offset: query.offset,
        has_more,
    })
}
