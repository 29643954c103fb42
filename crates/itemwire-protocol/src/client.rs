// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Client side of the QUIC transport: connecting, request/response streams,
//! and the server-push event channel.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use quinn::{ClientConfig, Connection, Endpoint, TransportConfig};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

use crate::frame::{Frame, FrameError, MessageType};
use crate::wire::{Event, RpcError};

/// Failures raised while connecting to or talking with the server.
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

    #[error("connection timed out after {0}ms")]
    Timeout(u64),

    #[error("server error [{code}]: {message}")]
    Rpc { code: String, message: String },

    #[error("unexpected frame type: {0}")]
    UnexpectedFrame(u16),
}

impl ClientError {
    fn from_rpc_error(error: RpcError) -> Self {
        ClientError::Rpc {
            code: error.code,
            message: error.message,
        }
    }
}

/// Tunables for the client endpoint.
#[derive(Debug, Clone)]
pub struct ItemwireClientConfig {
    /// Address of the server
    pub server_addr: SocketAddr,
    /// Name the server certificate must match ("localhost" for local dev)
    pub server_name: String,
    /// Accept any certificate. Development only, never in production.
    pub dangerous_skip_cert_verification: bool,
    /// Keep-alive ping interval in milliseconds, 0 disables
    pub keep_alive_interval_ms: u64,
    /// Connection idle timeout in milliseconds
    pub idle_timeout_ms: u64,
    /// Handshake timeout in milliseconds
    pub connect_timeout_ms: u64,
}

impl Default for ItemwireClientConfig {
    fn default() -> Self {
        Self {
            server_addr: "127.0.0.1:8001".parse().unwrap(),
            server_name: "localhost".to_string(),
            dangerous_skip_cert_verification: false,
            keep_alive_interval_ms: 10_000,
            idle_timeout_ms: 600_000, // event subscribers sit idle between pushes
            connect_timeout_ms: 10_000,
        }
    }
}

/// QUIC client used by the SDK to reach itemwire-core.
///
/// Holds at most one connection and re-dials lazily when the current one has
/// gone away.
pub struct ItemwireClient {
    endpoint: Endpoint,
    connection: Mutex<Option<Connection>>,
    config: ItemwireClientConfig,
}

impl ItemwireClient {
    /// Build a client endpoint from `config`. Does not dial yet.
    pub fn new(config: ItemwireClientConfig) -> Result<Self, ClientError> {
        let mut endpoint = Endpoint::client("0.0.0.0:0".parse().unwrap())?;
        endpoint.set_default_client_config(Self::build_client_config(&config)?);

        Ok(Self {
            endpoint,
            connection: Mutex::new(None),
            config,
        })
    }

    /// Client preconfigured for a server on localhost with a self-signed
    /// certificate.
    pub fn localhost() -> Result<Self, ClientError> {
        Self::new(ItemwireClientConfig {
            dangerous_skip_cert_verification: true,
            ..Default::default()
        })
    }

    fn build_client_config(config: &ItemwireClientConfig) -> Result<ClientConfig, ClientError> {
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
                .unwrap(),
        ));

        let mut client_config = ClientConfig::new(Arc::new(
            quinn::crypto::rustls::QuicClientConfig::try_from(crypto).unwrap(),
        ));
        client_config.transport_config(Arc::new(transport));

        Ok(client_config)
    }

    /// Dial the server unless a live connection is already held.
    #[instrument(skip(self))]
    pub async fn connect(&self) -> Result<(), ClientError> {
        let mut guard = self.connection.lock().await;

        if let Some(ref conn) = *guard
            && conn.close_reason().is_none()
        {
            debug!("connection already live, not redialing");
            return Ok(());
        }

        info!(addr = %self.config.server_addr, "dialing itemwire-core");

        let dial = self
            .endpoint
            .connect(self.config.server_addr, &self.config.server_name)?;
        let connection = tokio::time::timeout(
            Duration::from_millis(self.config.connect_timeout_ms),
            dial,
        )
        .await
        .map_err(|_| ClientError::Timeout(self.config.connect_timeout_ms))??;

        info!("itemwire-core connection established");
        *guard = Some(connection);
        Ok(())
    }

    /// Live connection handle, dialing first if needed.
    async fn active_connection(&self) -> Result<Connection, ClientError> {
        self.connect().await?;
        let guard = self.connection.lock().await;
        guard.clone().ok_or(ClientError::NotConnected)
    }

    /// Run one request/response exchange on a fresh bidirectional stream.
    ///
    /// An `Error` frame from the server surfaces as [`ClientError::Rpc`].
    #[instrument(skip(self, request))]
    pub async fn request<Req: prost::Message, Resp: prost::Message + Default>(
        &self,
        request: &Req,
    ) -> Result<Resp, ClientError> {
        let conn = self.active_connection().await?;
        let (mut send, mut recv) = conn.open_bi().await?;

        let frame = Frame::request(request)?;
        crate::frame::write_frame(&mut send, &frame).await?;
        send.finish()?;

        let reply = crate::frame::read_frame(&mut recv).await?;
        match reply.message_type {
            MessageType::Response => Ok(reply.decode()?),
            MessageType::Error => {
                let error: RpcError = reply.decode()?;
                Err(ClientError::from_rpc_error(error))
            }
            other => Err(ClientError::UnexpectedFrame(other as u16)),
        }
    }

    /// Block until the server pushes the next event.
    ///
    /// Each event arrives on its own unidirectional stream carrying a single
    /// `Event` frame.
    pub async fn next_event(&self) -> Result<Event, ClientError> {
        let conn = self.active_connection().await?;
        let mut recv = conn.accept_uni().await?;

        let frame = crate::frame::read_frame(&mut recv).await?;
        match frame.message_type {
            MessageType::Event => Ok(frame.decode()?),
            other => Err(ClientError::UnexpectedFrame(other as u16)),
        }
    }

    /// Close the held connection, if any.
    pub async fn close(&self) {
        if let Some(conn) = self.connection.lock().await.take() {
            conn.close(0u32.into(), b"client going away");
        }
    }

    /// Whether a connection is held and neither side has closed it.
    pub async fn is_connected(&self) -> bool {
        self.connection
            .lock()
            .await
            .as_ref()
            .is_some_and(|conn| conn.close_reason().is_none())
    }
}

impl Drop for ItemwireClient {
    fn drop(&mut self) {
        // Drop is synchronous, so only a try_lock is possible here.
        if let Ok(mut guard) = self.connection.try_lock()
            && let Some(conn) = guard.take()
        {
            conn.close(0u32.into(), b"dropped");
        }
    }
}

/// Verifier that accepts every server certificate. Development only.
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
