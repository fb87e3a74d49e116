// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! End-to-end handler flows over an in-memory store and cache.

use std::sync::Arc;
use std::time::Duration;

use devolve_core::auth::revocation::RevocationList;
use devolve_core::auth::{AuthContext, LoginRateLimiter, SCOPE_READ, SCOPE_RUN, TokenService};
use devolve_core::cache::MemoryCache;
use devolve_core::config::{ExecutorConfig, TtlConfig};
use devolve_core::executor::Executor;
use devolve_core::handlers::{self, HandlerState};
use devolve_core::store::{CompositeStore, SqliteStore};
use devolve_kernel::{AlgorithmRegistry, ProblemRegistry, VariantRegistry};
use devolve_protocol::proto;

const TEST_SECRET: &str = "a-test-signing-secret-of-32-bytes!!";
const TEST_BCRYPT_COST: u32 = 4;

async fn test_state() -> Arc<HandlerState> {
    let cache = Arc::new(MemoryCache::new());
    let durable = Arc::new(SqliteStore::in_memory().await.unwrap());
    let ttl = TtlConfig {
        execution: Duration::from_secs(3600),
        result: Duration::from_secs(3600),
        progress: Duration::from_secs(600),
    };
    let store = Arc::new(CompositeStore::new(durable, cache.clone(), ttl));
    let tokens = TokenService::new(
        TEST_SECRET,
        Duration::from_secs(900),
        Duration::from_secs(86_400),
        RevocationList::new(cache),
    );
    let executor = Executor::start(
        store.clone(),
        &ExecutorConfig {
            max_workers: 2,
            queue_size: 8,
            progress_interval: Duration::from_millis(10),
        },
    );
    Arc::new(HandlerState {
        store,
        executor,
        tokens,
        rate_limiter: LoginRateLimiter::new(),
        algorithms: AlgorithmRegistry::with_defaults(),
        problems: ProblemRegistry::with_defaults(),
        variants: VariantRegistry::with_defaults(),
        bcrypt_cost: TEST_BCRYPT_COST,
    })
}

fn ctx_for(username: &str) -> AuthContext {
    AuthContext {
        subject: username.to_string(),
        scopes: vec![SCOPE_READ.to_string(), SCOPE_RUN.to_string()],
        token_id: format!("jti-{username}"),
        remaining_secs: 900,
    }
}

fn small_config() -> proto::DeConfig {
    proto::DeConfig {
        executions: 1,
        generations: 5,
        population_size: 10,
        dimensions_size: 5,
        objectives_size: 2,
        floor: 0.0,
        ceil: 1.0,
        gde3: None,
    }
}

fn run_request(config: proto::DeConfig) -> proto::RunAsyncRequest {
    proto::RunAsyncRequest {
        algorithm: "gde3".to_string(),
        problem: "zdt1".to_string(),
        variant: "rand1".to_string(),
        config: Some(config),
    }
}

async fn register_and_login(state: &HandlerState, username: &str) -> proto::LoginResponse {
    handlers::auth::handle_register(
        state,
        proto::RegisterRequest {
            username: username.to_string(),
            email: format!("{username}@example.com"),
            password: "correct-horse-battery".to_string(),
        },
    )
    .await
    .unwrap();

    handlers::auth::handle_login(
        state,
        proto::LoginRequest {
            username: username.to_string(),
            password: "correct-horse-battery".to_string(),
        },
    )
    .await
    .unwrap()
}

async fn wait_for_status(
    state: &HandlerState,
    ctx: &AuthContext,
    execution_id: &str,
    expected: &str,
) -> proto::Execution {
    for _ in 0..300 {
        let response = handlers::de::handle_get_status(
            state,
            ctx,
            proto::GetExecutionStatusRequest {
                execution_id: execution_id.to_string(),
            },
        )
        .await
        .unwrap();
        let execution = response.execution.unwrap();
        if execution.status == expected {
            return execution;
        }
        assert!(
            !(execution.status == "FAILED" && expected != "FAILED"),
            "execution failed: {}",
            execution.error_message
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("execution {execution_id} never reached {expected}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_register_login_run_and_fetch_results() {
    let state = test_state().await;
    let login = register_and_login(&state, "alice").await;
    assert!(!login.access_token.is_empty());
    assert!(!login.refresh_token.is_empty());
    assert_eq!(login.expires_in_seconds, 900);

    let ctx = ctx_for("alice");
    let run = handlers::de::handle_run_async(&state, &ctx, run_request(small_config()))
        .await
        .unwrap();
    assert!(!run.execution_id.is_empty());

    let execution = wait_for_status(&state, &ctx, &run.execution_id, "COMPLETED").await;
    assert!(!execution.pareto_id.is_empty());
    assert!(execution.completed_at > 0);

    let results = handlers::de::handle_get_results(
        &state,
        &ctx,
        proto::GetExecutionResultsRequest {
            execution_id: run.execution_id.clone(),
        },
    )
    .await
    .unwrap();
    let pareto = results.pareto.unwrap();
    assert_eq!(pareto.id, execution.pareto_id);
    assert!(!pareto.vectors.is_empty());
    assert_eq!(pareto.max_objectives.len(), 2);
    for vector in &pareto.vectors {
        assert_eq!(vector.elements.len(), 5);
        assert_eq!(vector.objectives.len(), 2);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cancel_running_execution() {
    let state = test_state().await;
    let ctx = ctx_for("alice");

    let mut config = small_config();
    config.generations = 200_000;
    let run = handlers::de::handle_run_async(&state, &ctx, run_request(config))
        .await
        .unwrap();

    wait_for_status(&state, &ctx, &run.execution_id, "RUNNING").await;

    handlers::de::handle_cancel(
        &state,
        &ctx,
        proto::CancelExecutionRequest {
            execution_id: run.execution_id.clone(),
        },
    )
    .await
    .unwrap();

    let execution = wait_for_status(&state, &ctx, &run.execution_id, "CANCELLED").await;
    assert!(execution.pareto_id.is_empty());

    // Cancelling again is a no-op, not an error.
    handlers::de::handle_cancel(
        &state,
        &ctx,
        proto::CancelExecutionRequest {
            execution_id: run.execution_id.clone(),
        },
    )
    .await
    .unwrap();

    // A cancelled execution has no results to fetch.
    let err = handlers::de::handle_get_results(
        &state,
        &ctx,
        proto::GetExecutionResultsRequest {
            execution_id: run.execution_id,
        },
    )
    .await
    .unwrap_err();
    assert_eq!(err.error_code(), "FAILED_PRECONDITION");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_executions_are_isolated_per_user() {
    let state = test_state().await;
    let alice = ctx_for("alice");
    let bob = ctx_for("bob");

    let run = handlers::de::handle_run_async(&state, &alice, run_request(small_config()))
        .await
        .unwrap();
    wait_for_status(&state, &alice, &run.execution_id, "COMPLETED").await;

    let status_err = handlers::de::handle_get_status(
        &state,
        &bob,
        proto::GetExecutionStatusRequest {
            execution_id: run.execution_id.clone(),
        },
    )
    .await
    .unwrap_err();
    assert_eq!(status_err.error_code(), "NOT_FOUND");

    let delete_err = handlers::de::handle_delete(
        &state,
        &bob,
        proto::DeleteExecutionRequest {
            execution_id: run.execution_id.clone(),
        },
    )
    .await
    .unwrap_err();
    assert_eq!(delete_err.error_code(), "NOT_FOUND");

    let listing = handlers::de::handle_list_executions(
        &state,
        &bob,
        proto::ListExecutionsRequest {
            status: String::new(),
            limit: 0,
            offset: 0,
        },
    )
    .await
    .unwrap();
    assert_eq!(listing.total, 0);
    assert!(listing.executions.is_empty());

    // The owner still sees and can delete it.
    handlers::de::handle_delete(
        &state,
        &alice,
        proto::DeleteExecutionRequest {
            execution_id: run.execution_id.clone(),
        },
    )
    .await
    .unwrap();
    let gone = handlers::de::handle_get_status(
        &state,
        &alice,
        proto::GetExecutionStatusRequest {
            execution_id: run.execution_id,
        },
    )
    .await
    .unwrap_err();
    assert_eq!(gone.error_code(), "NOT_FOUND");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_refresh_token_is_single_use() {
    let state = test_state().await;
    let login = register_and_login(&state, "alice").await;

    let refreshed = handlers::auth::handle_refresh(
        &state,
        proto::RefreshTokenRequest {
            refresh_token: login.refresh_token.clone(),
        },
    )
    .await
    .unwrap();
    assert!(!refreshed.access_token.is_empty());
    assert_ne!(refreshed.refresh_token, login.refresh_token);

    // The consumed token is revoked; replaying it fails.
    let err = handlers::auth::handle_refresh(
        &state,
        proto::RefreshTokenRequest {
            refresh_token: login.refresh_token,
        },
    )
    .await
    .unwrap_err();
    assert_eq!(err.error_code(), "UNAUTHENTICATED");

    // The replacement token still works.
    handlers::auth::handle_refresh(
        &state,
        proto::RefreshTokenRequest {
            refresh_token: refreshed.refresh_token,
        },
    )
    .await
    .unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_invalid_config_rejected_without_a_row() {
    let state = test_state().await;
    let ctx = ctx_for("alice");

    let mut config = small_config();
    config.generations = 0;
    config.ceil = -1.0;
    let err = handlers::de::handle_run_async(&state, &ctx, run_request(config))
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "INVALID_ARGUMENT");
    let rpc = err.to_rpc_error();
    assert!(rpc.violations.iter().any(|v| v.field == "config.generations"));

    let unknown = handlers::de::handle_run_async(
        &state,
        &ctx,
        proto::RunAsyncRequest {
            algorithm: "nsga2".to_string(),
            problem: "zdt1".to_string(),
            variant: "rand1".to_string(),
            config: Some(small_config()),
        },
    )
    .await
    .unwrap_err();
    assert_eq!(unknown.error_code(), "INVALID_ARGUMENT");
    assert!(
        unknown
            .to_rpc_error()
            .violations
            .iter()
            .any(|v| v.field == "algorithm")
    );

    // Nothing was queued or persisted.
    let listing = handlers::de::handle_list_executions(
        &state,
        &ctx,
        proto::ListExecutionsRequest {
            status: String::new(),
            limit: 0,
            offset: 0,
        },
    )
    .await
    .unwrap();
    assert_eq!(listing.total, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_listing_pagination_and_status_filter() {
    let state = test_state().await;
    let ctx = ctx_for("alice");

    let mut ids = Vec::new();
    for _ in 0..3 {
        let run = handlers::de::handle_run_async(&state, &ctx, run_request(small_config()))
            .await
            .unwrap();
        ids.push(run.execution_id);
    }
    for id in &ids {
        wait_for_status(&state, &ctx, id, "COMPLETED").await;
    }

    let first_page = handlers::de::handle_list_executions(
        &state,
        &ctx,
        proto::ListExecutionsRequest {
            status: String::new(),
            limit: 2,
            offset: 0,
        },
    )
    .await
    .unwrap();
    assert_eq!(first_page.total, 3);
    assert_eq!(first_page.executions.len(), 2);
    assert_eq!(first_page.limit, 2);
    assert!(first_page.has_more);

    let second_page = handlers::de::handle_list_executions(
        &state,
        &ctx,
        proto::ListExecutionsRequest {
            status: String::new(),
            limit: 2,
            offset: 2,
        },
    )
    .await
    .unwrap();
    assert_eq!(second_page.executions.len(), 1);
    assert!(!second_page.has_more);

    let completed = handlers::de::handle_list_executions(
        &state,
        &ctx,
        proto::ListExecutionsRequest {
            status: "COMPLETED".to_string(),
            limit: 0,
            offset: 0,
        },
    )
    .await
    .unwrap();
    assert_eq!(completed.total, 3);

    let pending = handlers::de::handle_list_executions(
        &state,
        &ctx,
        proto::ListExecutionsRequest {
            status: "PENDING".to_string(),
            limit: 0,
            offset: 0,
        },
    )
    .await
    .unwrap();
    assert_eq!(pending.total, 0);

    let bad_filter = handlers::de::handle_list_executions(
        &state,
        &ctx,
        proto::ListExecutionsRequest {
            status: "SLEEPING".to_string(),
            limit: 0,
            offset: 0,
        },
    )
    .await
    .unwrap_err();
    assert_eq!(bad_filter.error_code(), "INVALID_ARGUMENT");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_logout_revokes_access_token() {
    let state = test_state().await;
    let login = register_and_login(&state, "alice").await;

    let claims = state
        .tokens
        .validate(
            &login.access_token,
            devolve_core::auth::tokens::TokenType::Access,
        )
        .await
        .unwrap();
    let remaining_secs = claims.remaining_secs();
    let ctx = AuthContext {
        subject: claims.sub,
        scopes: claims.scopes,
        token_id: claims.jti,
        remaining_secs,
    };

    handlers::auth::handle_logout(&state, &ctx, proto::LogoutRequest {})
        .await
        .unwrap();

    let err = state
        .tokens
        .validate(
            &login.access_token,
            devolve_core::auth::tokens::TokenType::Access,
        )
        .await
        .unwrap_err();
    assert_eq!(err.into_core_error(false).error_code(), "UNAUTHENTICATED");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_duplicate_username_rejected() {
    let state = test_state().await;
    register_and_login(&state, "alice").await;

    let err = handlers::auth::handle_register(
        &state,
        proto::RegisterRequest {
            username: "alice".to_string(),
            email: "other@example.com".to_string(),
            password: "another-password".to_string(),
        },
    )
    .await
    .unwrap_err();
    assert_eq!(err.error_code(), "INVALID_ARGUMENT");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_wrong_password_and_rate_limit() {
    let state = test_state().await;
    register_and_login(&state, "alice").await;

    let err = handlers::auth::handle_login(
        &state,
        proto::LoginRequest {
            username: "alice".to_string(),
            password: "not-her-password".to_string(),
        },
    )
    .await
    .unwrap_err();
    assert_eq!(err.error_code(), "UNAUTHENTICATED");

    // Burn the remaining bucket; the limiter kicks in regardless of
    // whether the password is right.
    let mut rate_limited = false;
    for _ in 0..5 {
        let result = handlers::auth::handle_login(
            &state,
            proto::LoginRequest {
                username: "alice".to_string(),
                password: "not-her-password".to_string(),
            },
        )
        .await;
        if let Err(e) = result
            && e.error_code() == "RESOURCE_EXHAUSTED"
        {
            rate_limited = true;
            break;
        }
    }
    assert!(rate_limited);

    // Other usernames are unaffected.
    register_and_login(&state, "bob").await;
}
