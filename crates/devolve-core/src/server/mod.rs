// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! QUIC RPC server: per-stream request handling, authentication and
//! scope checks, routing to handlers, and progress streaming.
//!
//! One bidirectional stream carries one call. Unary calls answer with a
//! single `Response` frame whose envelope holds either the payload or an
//! error. `StreamProgress` answers with `StreamStart`, zero or more
//! `StreamData` frames and a final `StreamEnd`.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use devolve_protocol::proto::rpc_request::Request;
use devolve_protocol::proto::rpc_response::Response;
use devolve_protocol::proto::{RpcRequest, RpcResponse, StreamProgressRequest};
use devolve_protocol::{DevolveServer, Frame, StreamHandler};
use tracing::{debug, info, warn};

use crate::auth::tokens::TokenType;
use crate::auth::{AuthContext, SCOPE_READ, SCOPE_RUN};
use crate::error::{CoreError, Result};
use crate::handlers::{self, HandlerState, progress_to_proto};
use crate::store::ProgressRecord;

/// How often a live progress stream re-checks the execution status, so
/// streams end even when no snapshot is ever published.
const STREAM_POLL_INTERVAL: Duration = Duration::from_secs(3);

/// Bind a self-signed QUIC endpoint and serve connections until the
/// endpoint closes.
pub async fn run(bind_addr: SocketAddr, state: Arc<HandlerState>) -> anyhow::Result<()> {
    let server = DevolveServer::localhost(bind_addr)?;
    info!(addr = %server.local_addr()?, "RPC server listening");

    server
        .run(move |connection| {
            let state = state.clone();
            async move {
                connection
                    .run(move |stream| {
                        let state = state.clone();
                        async move { handle_stream(stream, state).await }
                    })
                    .await;
            }
        })
        .await?;

    Ok(())
}

/// Serve one RPC call on its own bidirectional stream.
pub async fn handle_stream(mut stream: StreamHandler, state: Arc<HandlerState>) {
    let (authorization, request) = match read_request(&mut stream).await {
        Ok(envelope) => envelope,
        Err(e) => {
            write_error(&mut stream, &e).await;
            return;
        }
    };

    // Streaming calls manage their own frame sequence.
    if let Request::StreamProgress(request) = request {
        match authorize(&state, &authorization, Some(SCOPE_READ)).await {
            Ok(ctx) => stream_progress(&state, &mut stream, &ctx, &request).await,
            Err(e) => write_error(&mut stream, &e).await,
        }
        return;
    }

    match dispatch(&state, &authorization, request).await {
        Ok(response) => {
            let envelope = RpcResponse {
                response: Some(response),
            };
            match Frame::response(&envelope) {
                Ok(frame) => {
                    if let Err(e) = stream.write_frame(&frame).await {
                        debug!(error = %e, "client gone before response was written");
                        return;
                    }
                }
                Err(e) => {
                    warn!(error = %e, "failed to encode response");
                    write_error(
                        &mut stream,
                        &CoreError::Internal {
                            details: "response encoding failed".to_string(),
                        },
                    )
                    .await;
                    return;
                }
            }
            let _ = stream.finish();
        }
        Err(e) => write_error(&mut stream, &e).await,
    }
}

async fn read_request(stream: &mut StreamHandler) -> Result<(String, Request)> {
    let frame = stream.read_frame().await.map_err(|e| CoreError::Internal {
        details: format!("failed to read request frame: {e}"),
    })?;
    if frame.message_type != devolve_protocol::MessageType::Request {
        return Err(CoreError::invalid_field(
            "frame",
            "expected a request frame",
        ));
    }
    let envelope: RpcRequest = frame.decode().map_err(|e| {
        CoreError::invalid_field("request", format!("malformed request: {e}"))
    })?;
    let Some(request) = envelope.request else {
        return Err(CoreError::invalid_field("request", "is required"));
    };
    Ok((envelope.authorization, request))
}

/// Validate the bearer token and, when `scope` is given, require it.
async fn authorize(
    state: &HandlerState,
    authorization: &str,
    scope: Option<&'static str>,
) -> Result<AuthContext> {
    let token = authorization
        .strip_prefix("Bearer ")
        .unwrap_or(authorization)
        .trim();
    if token.is_empty() {
        return Err(CoreError::Unauthenticated {
            reason: "missing bearer token".to_string(),
        });
    }

    let claims = state
        .tokens
        .validate(token, TokenType::Access)
        .await
        .map_err(|e| e.into_core_error(false))?;
    let remaining_secs = claims.remaining_secs();
    let ctx = AuthContext {
        subject: claims.sub,
        scopes: claims.scopes,
        token_id: claims.jti,
        remaining_secs,
    };

    if let Some(scope) = scope
        && !ctx.has_scope(scope)
    {
        return Err(CoreError::Forbidden {
            scope: scope.to_string(),
        });
    }
    Ok(ctx)
}

/// Route a unary call to its handler.
async fn dispatch(state: &HandlerState, auth: &str, request: Request) -> Result<Response> {
    match request {
        // Public operations.
        Request::Register(req) => handlers::auth::handle_register(state, req)
            .await
            .map(Response::Register),
        Request::Login(req) => handlers::auth::handle_login(state, req)
            .await
            .map(Response::Login),
        Request::RefreshToken(req) => handlers::auth::handle_refresh(state, req)
            .await
            .map(Response::RefreshToken),

        // Any valid access token.
        Request::Logout(req) => {
            let ctx = authorize(state, auth, None).await?;
            handlers::auth::handle_logout(state, &ctx, req)
                .await
                .map(Response::Logout)
        }

        // Read scope.
        Request::ListSupportedAlgorithms(req) => {
            authorize(state, auth, Some(SCOPE_READ)).await?;
            handlers::de::handle_list_algorithms(state, req)
                .await
                .map(Response::ListSupportedAlgorithms)
        }
        Request::ListSupportedVariants(req) => {
            authorize(state, auth, Some(SCOPE_READ)).await?;
            handlers::de::handle_list_variants(state, req)
                .await
                .map(Response::ListSupportedVariants)
        }
        Request::ListSupportedProblems(req) => {
            authorize(state, auth, Some(SCOPE_READ)).await?;
            handlers::de::handle_list_problems(state, req)
                .await
                .map(Response::ListSupportedProblems)
        }
        Request::GetExecutionStatus(req) => {
            let ctx = authorize(state, auth, Some(SCOPE_READ)).await?;
            handlers::de::handle_get_status(state, &ctx, req)
                .await
                .map(Response::GetExecutionStatus)
        }
        Request::GetExecutionResults(req) => {
            let ctx = authorize(state, auth, Some(SCOPE_READ)).await?;
            handlers::de::handle_get_results(state, &ctx, req)
                .await
                .map(Response::GetExecutionResults)
        }
        Request::ListExecutions(req) => {
            let ctx = authorize(state, auth, Some(SCOPE_READ)).await?;
            handlers::de::handle_list_executions(state, &ctx, req)
                .await
                .map(Response::ListExecutions)
        }

        // Run scope.
        Request::RunAsync(req) => {
            let ctx = authorize(state, auth, Some(SCOPE_RUN)).await?;
            handlers::de::handle_run_async(state, &ctx, req)
                .await
                .map(Response::RunAsync)
        }
        Request::CancelExecution(req) => {
            let ctx = authorize(state, auth, Some(SCOPE_RUN)).await?;
            handlers::de::handle_cancel(state, &ctx, req)
                .await
                .map(Response::CancelExecution)
        }
        Request::DeleteExecution(req) => {
            let ctx = authorize(state, auth, Some(SCOPE_RUN)).await?;
            handlers::de::handle_delete(state, &ctx, req)
                .await
                .map(Response::DeleteExecution)
        }

        // Handled before dispatch; reaching here means a framing bug.
        Request::StreamProgress(_) => Err(CoreError::Internal {
            details: "streaming call routed through unary dispatch".to_string(),
        }),
    }
}

/// Stream live progress for an owned execution until it reaches a
/// terminal status or the client goes away.
async fn stream_progress(
    state: &HandlerState,
    stream: &mut StreamHandler,
    ctx: &AuthContext,
    request: &StreamProgressRequest,
) {
    let record = match state
        .store
        .get_execution(&request.execution_id, &ctx.subject)
        .await
    {
        Ok(record) => record,
        Err(e) => {
            write_error(stream, &e).await;
            return;
        }
    };
    // Subscribe before the terminal check so no snapshot slips between.
    let mut updates = match state.store.subscribe_updates(&record.id).await {
        Ok(subscription) => subscription,
        Err(e) => {
            write_error(stream, &e).await;
            return;
        }
    };

    if stream.write_frame(&Frame::stream_start()).await.is_err() {
        debug!(execution_id = %record.id, "client gone before stream start");
        return;
    }

    if !record.status().is_terminal() {
        let mut poll = tokio::time::interval(STREAM_POLL_INTERVAL);
        poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                message = updates.recv() => {
                    let Some(payload) = message else {
                        break;
                    };
                    let progress: ProgressRecord = match serde_json::from_str(&payload) {
                        Ok(progress) => progress,
                        Err(e) => {
                            warn!(execution_id = %record.id, error = %e, "dropping unreadable progress snapshot");
                            continue;
                        }
                    };
                    let frame = match Frame::stream_data(&progress_to_proto(&progress)) {
                        Ok(frame) => frame,
                        Err(e) => {
                            warn!(execution_id = %record.id, error = %e, "failed to encode progress frame");
                            continue;
                        }
                    };
                    if stream.write_frame(&frame).await.is_err() {
                        debug!(execution_id = %record.id, "client gone, ending progress stream");
                        return;
                    }
                }
                _ = poll.tick() => {
                    match state.store.get_execution(&record.id, &ctx.subject).await {
                        Ok(current) if current.status().is_terminal() => break,
                        Ok(_) => {}
                        // Deleted mid-stream; nothing left to report.
                        Err(CoreError::NotFound { .. }) => break,
                        Err(e) => {
                            warn!(execution_id = %record.id, error = %e, "status poll failed, ending stream");
                            break;
                        }
                    }
                }
            }
        }
    }

    if stream.write_frame(&Frame::stream_end()).await.is_ok() {
        let _ = stream.finish();
    }
}

/// Best effort: an unreachable client cannot receive its error either.
async fn write_error(stream: &mut StreamHandler, error: &CoreError) {
    debug!(code = error.error_code(), error = %error, "request failed");
    let envelope = RpcResponse {
        response: Some(Response::Error(error.to_rpc_error())),
    };
    match Frame::response(&envelope) {
        Ok(frame) => {
            if stream.write_frame(&frame).await.is_ok() {
                let _ = stream.finish();
            }
        }
        Err(e) => warn!(error = %e, "failed to encode error response"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use devolve_kernel::{AlgorithmRegistry, ProblemRegistry, VariantRegistry};
    use devolve_protocol::proto;

    use crate::auth::revocation::RevocationList;
    use crate::auth::{LoginRateLimiter, TokenService};
    use crate::cache::MemoryCache;
    use crate::config::{ExecutorConfig, TtlConfig};
    use crate::executor::Executor;
    use crate::store::{CompositeStore, SqliteStore};

    const TEST_SECRET: &str = "a-test-signing-secret-of-32-bytes!!";

    async fn test_state() -> Arc<HandlerState> {
        let cache = Arc::new(MemoryCache::new());
        let durable = Arc::new(SqliteStore::in_memory().await.unwrap());
        let ttl = TtlConfig {
            execution: Duration::from_secs(3600),
            result: Duration::from_secs(3600),
            progress: Duration::from_secs(600),
        };
        let store = Arc::new(CompositeStore::new(durable, cache.clone(), ttl));
        let revocations = RevocationList::new(cache);
        let tokens = TokenService::new(
            TEST_SECRET,
            Duration::from_secs(900),
            Duration::from_secs(86_400),
            revocations,
        );
        let executor = Executor::start(
            store.clone(),
            &ExecutorConfig {
                max_workers: 1,
                queue_size: 4,
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
            bcrypt_cost: 4,
        })
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_authorize_rejects_missing_token() {
        let state = test_state().await;
        let err = authorize(&state, "", Some(SCOPE_READ)).await.unwrap_err();
        assert_eq!(err.error_code(), "UNAUTHENTICATED");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_authorize_rejects_garbage_token() {
        let state = test_state().await;
        let err = authorize(&state, "Bearer not-a-jwt", Some(SCOPE_READ))
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "UNAUTHENTICATED");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_authorize_accepts_issued_token_with_scope() {
        let state = test_state().await;
        let pair = state
            .tokens
            .issue("alice", &[SCOPE_READ.to_string()])
            .unwrap();

        let ctx = authorize(&state, &format!("Bearer {}", pair.access_token), Some(SCOPE_READ))
            .await
            .unwrap();
        assert_eq!(ctx.subject, "alice");

        let err = authorize(&state, &pair.access_token, Some(SCOPE_RUN))
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "PERMISSION_DENIED");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_authorize_rejects_refresh_token_as_access() {
        let state = test_state().await;
        let pair = state
            .tokens
            .issue("alice", &[SCOPE_READ.to_string()])
            .unwrap();
        let err = authorize(&state, &pair.refresh_token, Some(SCOPE_READ))
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "UNAUTHENTICATED");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_dispatch_public_register_then_login() {
        let state = test_state().await;
        let register = Request::Register(proto::RegisterRequest {
            username: "alice".to_string(),
            email: "alice@example.com".to_string(),
            password: "hunter2hunter2".to_string(),
        });
        let response = dispatch(&state, "", register).await.unwrap();
        assert!(matches!(response, Response::Register(_)));

        let login = Request::Login(proto::LoginRequest {
            username: "alice".to_string(),
            password: "hunter2hunter2".to_string(),
        });
        let Response::Login(login) = dispatch(&state, "", login).await.unwrap() else {
            panic!("expected a login response");
        };
        assert!(!login.access_token.is_empty());

        // The fresh access token authorizes a read.
        let bearer = format!("Bearer {}", login.access_token);
        let list = Request::ListSupportedAlgorithms(proto::ListSupportedAlgorithmsRequest {});
        let Response::ListSupportedAlgorithms(algorithms) = dispatch(&state, &bearer, list).await.unwrap()
        else {
            panic!("expected an algorithm listing");
        };
        assert_eq!(algorithms.algorithms, vec!["gde3".to_string()]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_dispatch_protected_call_without_token() {
        let state = test_state().await;
        let request = Request::ListSupportedProblems(proto::ListSupportedProblemsRequest {});
        let err = dispatch(&state, "", request).await.unwrap_err();
        assert_eq!(err.error_code(), "UNAUTHENTICATED");
    }
}
