// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! RPC request handlers.
//!
//! Handlers are plain async functions over [`HandlerState`]; the server
//! module authenticates, routes and maps errors to wire responses.

use std::sync::Arc;

use devolve_kernel::{AlgorithmRegistry, ProblemRegistry, VariantRegistry};
use devolve_protocol::proto;

use crate::auth::{LoginRateLimiter, TokenService};
use crate::executor::Executor;
use crate::store::{CompositeStore, ExecutionRecord, ParetoSet, ProgressRecord};

pub mod auth;
pub mod de;

/// Shared state for all handlers.
pub struct HandlerState {
    /// Composite execution store.
    pub store: Arc<CompositeStore>,
    /// Worker pool.
    pub executor: Executor,
    /// Token issuance and validation.
    pub tokens: TokenService,
    /// Login rate limiter.
    pub rate_limiter: LoginRateLimiter,
    /// Supported algorithms.
    pub algorithms: AlgorithmRegistry,
    /// Supported problems.
    pub problems: ProblemRegistry,
    /// Supported variants.
    pub variants: VariantRegistry,
    /// Bcrypt work factor.
    pub bcrypt_cost: u32,
}

/// Convert a stored execution to its wire shape.
///
/// Statuses go out uppercase; absent timestamps become 0 and absent
/// strings become empty, per the wire contract.
pub fn execution_to_proto(record: &ExecutionRecord) -> proto::Execution {
    proto::Execution {
        id: record.id.clone(),
        owner: record.owner.clone(),
        status: record.status().as_api_str().to_string(),
        algorithm: record.algorithm.clone(),
        problem: record.problem.clone(),
        variant: record.variant.clone(),
        error_message: record.error_message.clone().unwrap_or_default(),
        pareto_id: record.pareto_id.clone().unwrap_or_default(),
        created_at: record.created_at.timestamp_millis(),
        updated_at: record.updated_at.timestamp_millis(),
        completed_at: record
            .completed_at
            .map(|at| at.timestamp_millis())
            .unwrap_or(0),
    }
}

/// Convert a cached progress snapshot to its wire shape.
pub fn progress_to_proto(progress: &ProgressRecord) -> proto::ExecutionProgress {
    proto::ExecutionProgress {
        execution_id: progress.execution_id.clone(),
        current_generation: progress.current_generation,
        total_generations: progress.total_generations,
        completed_executions: progress.completed_executions,
        total_executions: progress.total_executions,
        partial_pareto: progress.partial_pareto.iter().map(vector_to_proto).collect(),
        updated_at: progress.updated_at.timestamp_millis(),
    }
}

/// Convert a stored result set to its wire shape.
pub fn pareto_to_proto(pareto: &ParetoSet) -> proto::ParetoSet {
    proto::ParetoSet {
        id: pareto.id.clone(),
        vectors: pareto.vectors.iter().map(vector_to_proto).collect(),
        max_objectives: pareto.max_objectives.clone(),
    }
}

fn vector_to_proto(vector: &devolve_kernel::Vector) -> proto::Vector {
    proto::Vector {
        elements: vector.elements.clone(),
        objectives: vector.objectives.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_execution_to_proto_uppercases_status() {
        let now = Utc::now();
        let record = ExecutionRecord {
            id: "e-1".to_string(),
            owner: "alice".to_string(),
            status: "running".to_string(),
            algorithm: "gde3".to_string(),
            problem: "zdt1".to_string(),
            variant: "rand1".to_string(),
            config: "{}".to_string(),
            error_message: None,
            pareto_id: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        };
        let wire = execution_to_proto(&record);
        assert_eq!(wire.status, "RUNNING");
        assert_eq!(wire.completed_at, 0);
        assert_eq!(wire.pareto_id, "");
        assert_eq!(wire.created_at, now.timestamp_millis());
    }
}
