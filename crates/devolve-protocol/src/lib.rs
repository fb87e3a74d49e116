// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Devolve Protocol - QUIC + Protobuf communication layer
//!
//! This crate provides the wire protocol between clients and devolve-core:
//! unary RPC calls for the auth and DE services, plus one server-streaming
//! method for live execution progress.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    devolve-protocol                          │
//! ├─────────────────────────────────────────────────────────────┤
//! │  RPC Layer: Request/Response + Server Streaming              │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Serialization: Protobuf (prost)                             │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Transport: QUIC (quinn)                                     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use devolve_protocol::{DevolveClient, proto};
//!
//! let client = DevolveClient::localhost("127.0.0.1:7909".parse()?)?;
//! client.connect().await?;
//!
//! let request = proto::RpcRequest {
//!     authorization: String::new(),
//!     request: Some(proto::rpc_request::Request::Login(proto::LoginRequest {
//!         username: "alice".to_string(),
//!         password: "Password123".to_string(),
//!     })),
//! };
//!
//! let response: proto::RpcResponse = client.call(&request).await?;
//! ```

pub mod client;
pub mod frame;
pub mod proto;
pub mod server;

// Re-export main types
pub use client::{ClientError, DevolveClient, DevolveClientConfig, ProgressStream};
pub use frame::{Frame, FrameError, FramedStream, MessageType};
pub use server::{
    ConnectionHandler, DevolveServer, DevolveServerConfig, ServerError, StreamHandler,
};
