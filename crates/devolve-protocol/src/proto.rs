// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Protobuf message definitions for the devolve RPC surface.
//!
//! The message types are written out with explicit `prost` attributes so the
//! crate builds without a protoc toolchain. Tag numbers are part of the wire
//! contract; never reuse a tag for a different field.

/// Structured detail attached to validation failures.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FieldViolation {
    #[prost(string, tag = "1")]
    pub field: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub description: ::prost::alloc::string::String,
}

/// Error payload carried in error responses.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RpcError {
    /// Transport status code (e.g. `UNAUTHENTICATED`, `NOT_FOUND`).
    #[prost(string, tag = "1")]
    pub code: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub message: ::prost::alloc::string::String,
    #[prost(message, repeated, tag = "3")]
    pub violations: ::prost::alloc::vec::Vec<FieldViolation>,
}

// ===== Auth service =====

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RegisterRequest {
    #[prost(string, tag = "1")]
    pub username: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub email: ::prost::alloc::string::String,
    #[prost(string, tag = "3")]
    pub password: ::prost::alloc::string::String,
}

#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct RegisterResponse {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct LoginRequest {
    #[prost(string, tag = "1")]
    pub username: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub password: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct LoginResponse {
    #[prost(string, tag = "1")]
    pub access_token: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub refresh_token: ::prost::alloc::string::String,
    /// Access token lifetime in seconds.
    #[prost(int64, tag = "3")]
    pub expires_in_seconds: i64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RefreshTokenRequest {
    #[prost(string, tag = "1")]
    pub refresh_token: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RefreshTokenResponse {
    #[prost(string, tag = "1")]
    pub access_token: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub refresh_token: ::prost::alloc::string::String,
    #[prost(int64, tag = "3")]
    pub expires_in_seconds: i64,
}

#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct LogoutRequest {}

#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct LogoutResponse {}

// ===== DE service =====

/// Name and human-readable description of a registry entry.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct EntryMetadata {
    #[prost(string, tag = "1")]
    pub name: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub description: ::prost::alloc::string::String,
}

#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct ListSupportedAlgorithmsRequest {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ListSupportedAlgorithmsResponse {
    #[prost(string, repeated, tag = "1")]
    pub algorithms: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
}

#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct ListSupportedVariantsRequest {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ListSupportedVariantsResponse {
    #[prost(message, repeated, tag = "1")]
    pub variants: ::prost::alloc::vec::Vec<EntryMetadata>,
}

#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct ListSupportedProblemsRequest {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ListSupportedProblemsResponse {
    #[prost(message, repeated, tag = "1")]
    pub problems: ::prost::alloc::vec::Vec<EntryMetadata>,
}

/// GDE3-specific control parameters.
#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct Gde3Params {
    #[prost(double, tag = "1")]
    pub cr: f64,
    #[prost(double, tag = "2")]
    pub f: f64,
    #[prost(double, tag = "3")]
    pub p: f64,
}

/// Run configuration for a DE job.
#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct DeConfig {
    #[prost(uint32, tag = "1")]
    pub executions: u32,
    #[prost(uint32, tag = "2")]
    pub generations: u32,
    #[prost(uint32, tag = "3")]
    pub population_size: u32,
    #[prost(uint32, tag = "4")]
    pub dimensions_size: u32,
    #[prost(uint32, tag = "5")]
    pub objectives_size: u32,
    #[prost(double, tag = "6")]
    pub floor: f64,
    #[prost(double, tag = "7")]
    pub ceil: f64,
    #[prost(message, optional, tag = "8")]
    pub gde3: ::core::option::Option<Gde3Params>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RunAsyncRequest {
    #[prost(string, tag = "1")]
    pub algorithm: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub problem: ::prost::alloc::string::String,
    #[prost(string, tag = "3")]
    pub variant: ::prost::alloc::string::String,
    #[prost(message, optional, tag = "4")]
    pub config: ::core::option::Option<DeConfig>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RunAsyncResponse {
    #[prost(string, tag = "1")]
    pub execution_id: ::prost::alloc::string::String,
}

/// One candidate solution: decision-space elements plus objective values.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Vector {
    #[prost(double, repeated, tag = "1")]
    pub elements: ::prost::alloc::vec::Vec<f64>,
    #[prost(double, repeated, tag = "2")]
    pub objectives: ::prost::alloc::vec::Vec<f64>,
}

/// Non-dominated solution set of a completed run.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ParetoSet {
    #[prost(string, tag = "1")]
    pub id: ::prost::alloc::string::String,
    #[prost(message, repeated, tag = "2")]
    pub vectors: ::prost::alloc::vec::Vec<Vector>,
    #[prost(double, repeated, tag = "3")]
    pub max_objectives: ::prost::alloc::vec::Vec<f64>,
}

/// Execution lifecycle record as seen by clients.
///
/// Timestamps are unix epoch milliseconds; `completed_at` is 0 while the
/// execution is non-terminal and `pareto_id` is empty unless `COMPLETED`.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Execution {
    #[prost(string, tag = "1")]
    pub id: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub owner: ::prost::alloc::string::String,
    #[prost(string, tag = "3")]
    pub status: ::prost::alloc::string::String,
    #[prost(string, tag = "4")]
    pub algorithm: ::prost::alloc::string::String,
    #[prost(string, tag = "5")]
    pub problem: ::prost::alloc::string::String,
    #[prost(string, tag = "6")]
    pub variant: ::prost::alloc::string::String,
    #[prost(string, tag = "7")]
    pub error_message: ::prost::alloc::string::String,
    #[prost(string, tag = "8")]
    pub pareto_id: ::prost::alloc::string::String,
    #[prost(int64, tag = "9")]
    pub created_at: i64,
    #[prost(int64, tag = "10")]
    pub updated_at: i64,
    #[prost(int64, tag = "11")]
    pub completed_at: i64,
}

/// Ephemeral progress snapshot for a running execution.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ExecutionProgress {
    #[prost(string, tag = "1")]
    pub execution_id: ::prost::alloc::string::String,
    #[prost(uint32, tag = "2")]
    pub current_generation: u32,
    #[prost(uint32, tag = "3")]
    pub total_generations: u32,
    #[prost(uint32, tag = "4")]
    pub completed_executions: u32,
    #[prost(uint32, tag = "5")]
    pub total_executions: u32,
    #[prost(message, repeated, tag = "6")]
    pub partial_pareto: ::prost::alloc::vec::Vec<Vector>,
    #[prost(int64, tag = "7")]
    pub updated_at: i64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetExecutionStatusRequest {
    #[prost(string, tag = "1")]
    pub execution_id: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetExecutionStatusResponse {
    #[prost(message, optional, tag = "1")]
    pub execution: ::core::option::Option<Execution>,
    #[prost(message, optional, tag = "2")]
    pub progress: ::core::option::Option<ExecutionProgress>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct StreamProgressRequest {
    #[prost(string, tag = "1")]
    pub execution_id: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetExecutionResultsRequest {
    #[prost(string, tag = "1")]
    pub execution_id: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetExecutionResultsResponse {
    #[prost(message, optional, tag = "1")]
    pub pareto: ::core::option::Option<ParetoSet>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CancelExecutionRequest {
    #[prost(string, tag = "1")]
    pub execution_id: ::prost::alloc::string::String,
}

#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct CancelExecutionResponse {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DeleteExecutionRequest {
    #[prost(string, tag = "1")]
    pub execution_id: ::prost::alloc::string::String,
}

#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct DeleteExecutionResponse {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ListExecutionsRequest {
    /// Optional status filter (empty string matches all statuses).
    #[prost(string, tag = "1")]
    pub status: ::prost::alloc::string::String,
    /// Page size; 0 means the server default.
    #[prost(uint32, tag = "2")]
    pub limit: u32,
    #[prost(uint32, tag = "3")]
    pub offset: u32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ListExecutionsResponse {
    #[prost(message, repeated, tag = "1")]
    pub executions: ::prost::alloc::vec::Vec<Execution>,
    #[prost(int64, tag = "2")]
    pub total: i64,
    #[prost(uint32, tag = "3")]
    pub limit: u32,
    #[prost(uint32, tag = "4")]
    pub offset: u32,
    #[prost(bool, tag = "5")]
    pub has_more: bool,
}

// ===== RPC envelope =====

/// Request envelope: bearer credential plus exactly one operation.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RpcRequest {
    /// Bearer token; empty for Register, Login and RefreshToken.
    #[prost(string, tag = "1")]
    pub authorization: ::prost::alloc::string::String,
    #[prost(
        oneof = "rpc_request::Request",
        tags = "10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20, 21, 22, 23"
    )]
    pub request: ::core::option::Option<rpc_request::Request>,
}

/// Nested types for [`RpcRequest`].
pub mod rpc_request {
    /// The operation carried by a request envelope.
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Request {
        #[prost(message, tag = "10")]
        Register(super::RegisterRequest),
        #[prost(message, tag = "11")]
        Login(super::LoginRequest),
        #[prost(message, tag = "12")]
        RefreshToken(super::RefreshTokenRequest),
        #[prost(message, tag = "13")]
        Logout(super::LogoutRequest),
        #[prost(message, tag = "14")]
        ListSupportedAlgorithms(super::ListSupportedAlgorithmsRequest),
        #[prost(message, tag = "15")]
        ListSupportedVariants(super::ListSupportedVariantsRequest),
        #[prost(message, tag = "16")]
        ListSupportedProblems(super::ListSupportedProblemsRequest),
        #[prost(message, tag = "17")]
        RunAsync(super::RunAsyncRequest),
        #[prost(message, tag = "18")]
        GetExecutionStatus(super::GetExecutionStatusRequest),
        #[prost(message, tag = "19")]
        StreamProgress(super::StreamProgressRequest),
        #[prost(message, tag = "20")]
        GetExecutionResults(super::GetExecutionResultsRequest),
        #[prost(message, tag = "21")]
        CancelExecution(super::CancelExecutionRequest),
        #[prost(message, tag = "22")]
        DeleteExecution(super::DeleteExecutionRequest),
        #[prost(message, tag = "23")]
        ListExecutions(super::ListExecutionsRequest),
    }
}

/// Response envelope: exactly one response payload or an error.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RpcResponse {
    #[prost(
        oneof = "rpc_response::Response",
        tags = "1, 10, 11, 12, 13, 14, 15, 16, 17, 18, 20, 21, 22, 23"
    )]
    pub response: ::core::option::Option<rpc_response::Response>,
}

/// Nested types for [`RpcResponse`].
pub mod rpc_response {
    /// The payload carried by a response envelope.
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Response {
        #[prost(message, tag = "1")]
        Error(super::RpcError),
        #[prost(message, tag = "10")]
        Register(super::RegisterResponse),
        #[prost(message, tag = "11")]
        Login(super::LoginResponse),
        #[prost(message, tag = "12")]
        RefreshToken(super::RefreshTokenResponse),
        #[prost(message, tag = "13")]
        Logout(super::LogoutResponse),
        #[prost(message, tag = "14")]
        ListSupportedAlgorithms(super::ListSupportedAlgorithmsResponse),
        #[prost(message, tag = "15")]
        ListSupportedVariants(super::ListSupportedVariantsResponse),
        #[prost(message, tag = "16")]
        ListSupportedProblems(super::ListSupportedProblemsResponse),
        #[prost(message, tag = "17")]
        RunAsync(super::RunAsyncResponse),
        #[prost(message, tag = "18")]
        GetExecutionStatus(super::GetExecutionStatusResponse),
        #[prost(message, tag = "20")]
        GetExecutionResults(super::GetExecutionResultsResponse),
        #[prost(message, tag = "21")]
        CancelExecution(super::CancelExecutionResponse),
        #[prost(message, tag = "22")]
        DeleteExecution(super::DeleteExecutionResponse),
        #[prost(message, tag = "23")]
        ListExecutions(super::ListExecutionsResponse),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message;

    #[test]
    fn test_rpc_request_round_trip() {
        let request = RpcRequest {
            authorization: "Bearer abc".to_string(),
            request: Some(rpc_request::Request::RunAsync(RunAsyncRequest {
                algorithm: "gde3".to_string(),
                problem: "zdt1".to_string(),
                variant: "rand1".to_string(),
                config: Some(DeConfig {
                    executions: 1,
                    generations: 10,
                    population_size: 20,
                    dimensions_size: 10,
                    objectives_size: 2,
                    floor: 0.0,
                    ceil: 1.0,
                    gde3: Some(Gde3Params {
                        cr: 0.9,
                        f: 0.5,
                        p: 0.1,
                    }),
                }),
            })),
        };

        let bytes = request.encode_to_vec();
        let decoded = RpcRequest::decode(bytes.as_slice()).unwrap();
        assert_eq!(request, decoded);
    }

    #[test]
    fn test_rpc_response_error_round_trip() {
        let response = RpcResponse {
            response: Some(rpc_response::Response::Error(RpcError {
                code: "NOT_FOUND".to_string(),
                message: "execution 'x' not found".to_string(),
                violations: vec![],
            })),
        };

        let bytes = response.encode_to_vec();
        let decoded = RpcResponse::decode(bytes.as_slice()).unwrap();
        assert_eq!(response, decoded);
    }

    #[test]
    fn test_empty_request_decodes_as_none() {
        let decoded = RpcRequest::decode(&[][..]).unwrap();
        assert!(decoded.request.is_none());
        assert!(decoded.authorization.is_empty());
    }

    #[test]
    fn test_field_violations_survive_round_trip() {
        let err = RpcError {
            code: "INVALID_ARGUMENT".to_string(),
            message: "validation failed".to_string(),
            violations: vec![FieldViolation {
                field: "config.generations".to_string(),
                description: "must be positive".to_string(),
            }],
        };
        let decoded = RpcError::decode(err.encode_to_vec().as_slice()).unwrap();
        assert_eq!(decoded.violations.len(), 1);
        assert_eq!(decoded.violations[0].field, "config.generations");
    }

    #[test]
    fn test_progress_snapshot_round_trip() {
        let progress = ExecutionProgress {
            execution_id: "e-1".to_string(),
            current_generation: 7,
            total_generations: 100,
            completed_executions: 0,
            total_executions: 1,
            partial_pareto: vec![Vector {
                elements: vec![0.25, 0.5],
                objectives: vec![0.25, 1.1],
            }],
            updated_at: 1_700_000_000_000,
        };
        let decoded = ExecutionProgress::decode(progress.encode_to_vec().as_slice()).unwrap();
        assert_eq!(progress, decoded);
    }
}
