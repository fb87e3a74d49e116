// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! QUIC client helpers for connecting to devolve-core.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use quinn::{ClientConfig, Connection, Endpoint, TransportConfig};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

use crate::frame::{Frame, FrameError, MessageType};
use crate::proto::{ExecutionProgress, RpcRequest, RpcResponse};

/// Errors that can occur in the QUIC client
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("connection error: {0}")]
    Connection(#[from] quinn::ConnectionError),

    #[error("connect error: {0}")]
    Connect(#[from] quinn::ConnectError),

    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("stream closed: {0}")]
    ClosedStream(#[from] quinn::ClosedStream),

    #[error("no connection established")]
    NotConnected,

    #[error("unexpected frame type: {0:?}")]
    UnexpectedFrame(MessageType),

    #[error("connection timed out after {0}ms")]
    Timeout(u64),
}

/// Configuration for the QUIC client
#[derive(Debug, Clone)]
pub struct DevolveClientConfig {
    /// Server address to connect to
    pub server_addr: SocketAddr,
    /// Server name for TLS verification (use "localhost" for local dev)
    pub server_name: String,
    /// Skip certificate verification (for development only!)
    pub dangerous_skip_cert_verification: bool,
    /// Keep-alive interval in milliseconds (0 to disable)
    pub keep_alive_interval_ms: u64,
    /// Idle timeout in milliseconds
    pub idle_timeout_ms: u64,
    /// Connection timeout in milliseconds
    pub connect_timeout_ms: u64,
}

impl Default for DevolveClientConfig {
    fn default() -> Self {
        Self {
            server_addr: "127.0.0.1:7909".parse().unwrap(),
            server_name: "localhost".to_string(),
            dangerous_skip_cert_verification: false,
            keep_alive_interval_ms: 10_000,
            // Long enough to follow a full DE run over one connection
            idle_timeout_ms: 600_000,
            connect_timeout_ms: 10_000,
        }
    }
}

/// QUIC client for communicating with devolve-core
pub struct DevolveClient {
    endpoint: Endpoint,
    connection: Mutex<Option<Connection>>,
    config: DevolveClientConfig,
}

impl DevolveClient {
    /// Create a new client with the given configuration
    pub fn new(config: DevolveClientConfig) -> Result<Self, ClientError> {
        let mut endpoint = Endpoint::client(
            "0.0.0.0:0"
                .parse()
                .map_err(|_| ClientError::NotConnected)?,
        )?;

        let client_config = Self::build_client_config(&config)?;
        endpoint.set_default_client_config(client_config);

        Ok(Self {
            endpoint,
            connection: Mutex::new(None),
            config,
        })
    }

    /// Create a client with default configuration for local development
    pub fn localhost(server_addr: SocketAddr) -> Result<Self, ClientError> {
        Self::new(DevolveClientConfig {
            server_addr,
            dangerous_skip_cert_verification: true,
            ..Default::default()
        })
    }

    fn build_client_config(config: &DevolveClientConfig) -> Result<ClientConfig, ClientError> {
        let crypto = if config.dangerous_skip_cert_verification {
            rustls::ClientConfig::builder()
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(SkipServerVerification))
                .with_no_client_auth()
        } else {
            let mut roots = rustls::RootCertStore::empty();
            roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
            rustls::ClientConfig::builder()
                .with_root_certificates(roots)
                .with_no_client_auth()
        };

        let mut transport = TransportConfig::default();
        if config.keep_alive_interval_ms > 0 {
            transport.keep_alive_interval(Some(std::time::Duration::from_millis(
                config.keep_alive_interval_ms,
            )));
        }
        transport.max_idle_timeout(Some(
            std::time::Duration::from_millis(config.idle_timeout_ms)
                .try_into()
                .map_err(|_| ClientError::NotConnected)?,
        ));

        let mut client_config = ClientConfig::new(Arc::new(
            quinn::crypto::rustls::QuicClientConfig::try_from(crypto)
                .map_err(|e| ClientError::Io(std::io::Error::other(e.to_string())))?,
        ));
        client_config.transport_config(Arc::new(transport));

        Ok(client_config)
    }

    /// Connect to the server
    #[instrument(skip(self))]
    pub async fn connect(&self) -> Result<(), ClientError> {
        let mut conn_guard = self.connection.lock().await;

        // Check if we already have a valid connection
        if let Some(ref conn) = *conn_guard
            && conn.close_reason().is_none()
        {
            debug!("reusing existing connection");
            return Ok(());
        }

        info!(addr = %self.config.server_addr, "connecting to devolve-core");

        let timeout = Duration::from_millis(self.config.connect_timeout_ms);
        let connecting = self
            .endpoint
            .connect(self.config.server_addr, &self.config.server_name)?;

        let connection = tokio::time::timeout(timeout, connecting)
            .await
            .map_err(|_| ClientError::Timeout(self.config.connect_timeout_ms))??;

        info!("connected to devolve-core");
        *conn_guard = Some(connection);
        Ok(())
    }

    /// Get the current connection, connecting if necessary
    async fn get_connection(&self) -> Result<Connection, ClientError> {
        self.connect().await?;
        let conn_guard = self.connection.lock().await;
        conn_guard.clone().ok_or(ClientError::NotConnected)
    }

    /// Send a unary RPC request and wait for the response envelope
    #[instrument(skip(self, request))]
    pub async fn call(&self, request: &RpcRequest) -> Result<RpcResponse, ClientError> {
        let conn = self.get_connection().await?;
        let (mut send, mut recv) = conn.open_bi().await?;

        let frame = Frame::request(request)?;
        crate::frame::write_frame(&mut send, &frame).await?;
        send.finish()?;

        let response_frame = crate::frame::read_frame(&mut recv).await?;
        match response_frame.message_type {
            MessageType::Response | MessageType::Error => Ok(response_frame.decode()?),
            other => Err(ClientError::UnexpectedFrame(other)),
        }
    }

    /// Send a streaming RPC request and return the progress stream.
    ///
    /// The first frame from the server is either StreamStart (followed by
    /// zero or more StreamData frames and a final StreamEnd) or an Error
    /// frame carrying the failure response.
    #[instrument(skip(self, request))]
    pub async fn call_streaming(
        &self,
        request: &RpcRequest,
    ) -> Result<ProgressStream, ClientError> {
        let conn = self.get_connection().await?;
        let (mut send, mut recv) = conn.open_bi().await?;

        let frame = Frame::request(request)?;
        crate::frame::write_frame(&mut send, &frame).await?;
        send.finish()?;

        let first = crate::frame::read_frame(&mut recv).await?;
        match first.message_type {
            MessageType::StreamStart => Ok(ProgressStream {
                recv,
                finished: false,
            }),
            MessageType::Error => {
                let response: RpcResponse = first.decode()?;
                Err(ClientError::Io(std::io::Error::other(format!(
                    "stream rejected: {:?}",
                    response.response
                ))))
            }
            other => Err(ClientError::UnexpectedFrame(other)),
        }
    }

    /// Close the connection gracefully
    pub async fn close(&self) {
        let mut conn_guard = self.connection.lock().await;
        if let Some(conn) = conn_guard.take() {
            conn.close(0u32.into(), b"client closing");
        }
    }

    /// Check if the client is currently connected
    pub async fn is_connected(&self) -> bool {
        let conn_guard = self.connection.lock().await;
        if let Some(ref conn) = *conn_guard {
            conn.close_reason().is_none()
        } else {
            false
        }
    }
}

impl Drop for DevolveClient {
    fn drop(&mut self) {
        // Close connection on drop (non-async, best effort)
        if let Ok(mut guard) = self.connection.try_lock()
            && let Some(conn) = guard.take()
        {
            conn.close(0u32.into(), b"client dropped");
        }
    }
}

/// Server-streaming progress sequence. Ends at the StreamEnd frame.
pub struct ProgressStream {
    recv: quinn::RecvStream,
    finished: bool,
}

impl ProgressStream {
    /// Read the next progress snapshot, or `None` when the stream ends.
    pub async fn next(&mut self) -> Result<Option<ExecutionProgress>, ClientError> {
        if self.finished {
            return Ok(None);
        }

        let frame = crate::frame::read_frame(&mut self.recv).await?;
        match frame.message_type {
            MessageType::StreamData => Ok(Some(frame.decode()?)),
            MessageType::StreamEnd => {
                self.finished = true;
                Ok(None)
            }
            other => Err(ClientError::UnexpectedFrame(other)),
        }
    }
}

/// Certificate verifier that skips all verification (for development only!)
#[derive(Debug)]
struct SkipServerVerification;

impl rustls::client::danger::ServerCertVerifier for SkipServerVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        vec![
            rustls::SignatureScheme::RSA_PKCS1_SHA256,
            rustls::SignatureScheme::RSA_PKCS1_SHA384,
            rustls::SignatureScheme::RSA_PKCS1_SHA512,
            rustls::SignatureScheme::ECDSA_NISTP256_SHA256,
            rustls::SignatureScheme::ECDSA_NISTP384_SHA384,
            rustls::SignatureScheme::ECDSA_NISTP521_SHA512,
            rustls::SignatureScheme::RSA_PSS_SHA256,
            rustls::SignatureScheme::RSA_PSS_SHA384,
            rustls::SignatureScheme::RSA_PSS_SHA512,
            rustls::SignatureScheme::ED25519,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = DevolveClientConfig::default();
        assert_eq!(config.server_addr, "127.0.0.1:7909".parse().unwrap());
        assert_eq!(config.server_name, "localhost");
        assert!(!config.dangerous_skip_cert_verification);
        assert_eq!(config.keep_alive_interval_ms, 10_000);
        assert_eq!(config.idle_timeout_ms, 600_000);
        assert_eq!(config.connect_timeout_ms, 10_000);
    }

    #[tokio::test]
    async fn test_client_creation() {
        let config = DevolveClientConfig {
            dangerous_skip_cert_verification: true,
            ..Default::default()
        };
        let client = DevolveClient::new(config);
        assert!(
            client.is_ok(),
            "Failed to create client: {:?}",
            client.err()
        );
    }

    #[tokio::test]
    async fn test_client_initial_not_connected() {
        let client = DevolveClient::localhost("127.0.0.1:7909".parse().unwrap()).unwrap();
        assert!(!client.is_connected().await);
    }

    #[tokio::test]
    async fn test_client_connect_timeout() {
        let config = DevolveClientConfig {
            server_addr: "127.0.0.1:59998".parse().unwrap(), // Unlikely to have a server
            dangerous_skip_cert_verification: true,
            connect_timeout_ms: 100,
            ..Default::default()
        };
        let client = DevolveClient::new(config).unwrap();
        let result = client.connect().await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_client_close_without_connection() {
        let client = DevolveClient::localhost("127.0.0.1:7909".parse().unwrap()).unwrap();
        client.close().await;
        assert!(!client.is_connected().await);
    }

    #[test]
    fn test_client_error_display() {
        let err = ClientError::NotConnected;
        assert_eq!(format!("{}", err), "no connection established");

        let err = ClientError::Timeout(5000);
        assert_eq!(format!("{}", err), "connection timed out after 5000ms");

        let err = ClientError::UnexpectedFrame(MessageType::Request);
        assert!(format!("{}", err).contains("unexpected frame type"));
    }

    #[test]
    fn test_build_client_config_with_verification() {
        let config = DevolveClientConfig::default();
        let result = DevolveClient::build_client_config(&config);
        assert!(result.is_ok());
    }

    #[test]
    fn test_build_client_config_skip_verification() {
        let config = DevolveClientConfig {
            dangerous_skip_cert_verification: true,
            ..Default::default()
        };
        let result = DevolveClient::build_client_config(&config);
        assert!(result.is_ok());
    }
}
