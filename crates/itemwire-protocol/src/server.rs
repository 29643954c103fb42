// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Server side of the QUIC transport: endpoint setup, TLS material, and the
//! accept loops that hand connections and streams to itemwire-core.

use std::net::SocketAddr;
use std::sync::Arc;

use quinn::{Endpoint, Incoming, RecvStream, SendStream, ServerConfig, TransportConfig};
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

use crate::frame::{Frame, FrameError, read_frame, write_frame};
use crate::wire::RpcError;

/// Failures raised while binding or serving the QUIC endpoint.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("bind error: {0}")]
    Bind(#[from] std::io::Error),

    #[error("connection error: {0}")]
    Connection(#[from] quinn::ConnectionError),

    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("server closed")]
    Closed,
}

/// Tunables for the server endpoint.
#[derive(Debug, Clone)]
pub struct ItemwireServerConfig {
    /// Listen address
    pub bind_addr: SocketAddr,
    /// Certificate chain, PEM-encoded
    pub cert_pem: Vec<u8>,
    /// Private key, PEM-encoded
    pub key_pem: Vec<u8>,
    /// Cap on handshakes in progress
    pub max_incoming: u32,
    /// Bidirectional streams a single connection may hold open
    pub max_bi_streams: u32,
    /// Unidirectional streams a single connection may hold open
    pub max_uni_streams: u32,
    /// Connection idle timeout in milliseconds
    pub idle_timeout_ms: u64,
    /// Keep-alive ping interval in milliseconds, 0 disables
    pub keep_alive_interval_ms: u64,
    /// UDP receive buffer in bytes, 0 keeps the OS default
    pub udp_receive_buffer_size: usize,
    /// UDP send buffer in bytes, 0 keeps the OS default
    pub udp_send_buffer_size: usize,
    /// Connection handlers allowed to run at once, 0 means unlimited
    pub max_concurrent_handlers: u32,
}

impl Default for ItemwireServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8001".parse().unwrap(),
            cert_pem: Vec::new(),
            key_pem: Vec::new(),
            max_incoming: 4_096,
            max_bi_streams: 512,
            max_uni_streams: 64,
            idle_timeout_ms: 90_000,
            keep_alive_interval_ms: 20_000,
            udp_receive_buffer_size: 4 * 1024 * 1024,
            udp_send_buffer_size: 4 * 1024 * 1024,
            max_concurrent_handlers: 0, // 0 = no cap
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, fallback: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(fallback)
}

impl ItemwireServerConfig {
    /// Read the tunables from the environment, falling back to the defaults.
    ///
    /// Recognized variables:
    /// - `ITEMWIRE_QUIC_MAX_INCOMING`: pending handshake cap (default: 4096)
    /// - `ITEMWIRE_QUIC_MAX_BI_STREAMS`: bidirectional streams per connection (default: 512)
    /// - `ITEMWIRE_QUIC_MAX_UNI_STREAMS`: unidirectional streams per connection (default: 64)
    /// - `ITEMWIRE_QUIC_IDLE_TIMEOUT_MS`: idle timeout in ms (default: 90000)
    /// - `ITEMWIRE_QUIC_KEEP_ALIVE_MS`: keep-alive interval in ms, 0 disables (default: 20000)
    /// - `ITEMWIRE_QUIC_UDP_RECV_BUFFER`: UDP receive buffer in bytes (default: 4194304)
    /// - `ITEMWIRE_QUIC_UDP_SEND_BUFFER`: UDP send buffer in bytes (default: 4194304)
    /// - `ITEMWIRE_QUIC_MAX_HANDLERS`: concurrent handler cap, 0 for unlimited (default: 0)
    ///
    /// The bind address and TLS material are not environment-driven; the
    /// caller supplies those.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            bind_addr: defaults.bind_addr,
            cert_pem: defaults.cert_pem,
            key_pem: defaults.key_pem,
            max_incoming: env_parse("ITEMWIRE_QUIC_MAX_INCOMING", defaults.max_incoming),
            max_bi_streams: env_parse("ITEMWIRE_QUIC_MAX_BI_STREAMS", defaults.max_bi_streams),
            max_uni_streams: env_parse("ITEMWIRE_QUIC_MAX_UNI_STREAMS", defaults.max_uni_streams),
            idle_timeout_ms: env_parse("ITEMWIRE_QUIC_IDLE_TIMEOUT_MS", defaults.idle_timeout_ms),
            keep_alive_interval_ms: env_parse(
                "ITEMWIRE_QUIC_KEEP_ALIVE_MS",
                defaults.keep_alive_interval_ms,
            ),
            udp_receive_buffer_size: env_parse(
                "ITEMWIRE_QUIC_UDP_RECV_BUFFER",
                defaults.udp_receive_buffer_size,
            ),
            udp_send_buffer_size: env_parse(
                "ITEMWIRE_QUIC_UDP_SEND_BUFFER",
                defaults.udp_send_buffer_size,
            ),
            max_concurrent_handlers: env_parse(
                "ITEMWIRE_QUIC_MAX_HANDLERS",
                defaults.max_concurrent_handlers,
            ),
        }
    }
}

/// Listening QUIC endpoint that hands accepted connections to a caller-supplied
/// handler.
pub struct ItemwireServer {
    endpoint: Endpoint,
    config: ItemwireServerConfig,
}

impl ItemwireServer {
    /// Bind the endpoint described by `config`.
    pub fn new(config: ItemwireServerConfig) -> Result<Self, ServerError> {
        use socket2::{Domain, Protocol, Socket, Type};

        let server_config = Self::build_server_config(&config)?;

        // Buffer sizes must be applied before quinn takes the socket over.
        let domain = if config.bind_addr.is_ipv6() {
            Domain::IPV6
        } else {
            Domain::IPV4
        };
        let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;

        if config.udp_receive_buffer_size > 0
            && let Err(e) = socket.set_recv_buffer_size(config.udp_receive_buffer_size)
        {
            warn!(
                requested = config.udp_receive_buffer_size,
                error = %e,
                "Could not size UDP receive buffer"
            );
        }
        if config.udp_send_buffer_size > 0
            && let Err(e) = socket.set_send_buffer_size(config.udp_send_buffer_size)
        {
            warn!(
                requested = config.udp_send_buffer_size,
                error = %e,
                "Could not size UDP send buffer"
            );
        }

        socket.bind(&config.bind_addr.into())?;
        let udp: std::net::UdpSocket = socket.into();

        let runtime = quinn::default_runtime().ok_or_else(|| {
            ServerError::Bind(std::io::Error::other("no tokio runtime to drive the endpoint"))
        })?;
        let endpoint = Endpoint::new_with_abstract_socket(
            quinn::EndpointConfig::default(),
            Some(server_config),
            runtime.wrap_udp_socket(udp)?,
            runtime,
        )?;

        info!(
            bind = %config.bind_addr,
            incoming_limit = config.max_incoming,
            bi_streams = config.max_bi_streams,
            idle_ms = config.idle_timeout_ms,
            keep_alive = config.keep_alive_interval_ms,
            recv_buf = config.udp_receive_buffer_size,
            send_buf = config.udp_send_buffer_size,
            handler_cap = config.max_concurrent_handlers,
            "QUIC endpoint listening"
        );

        Ok(Self { endpoint, config })
    }

    /// Bind on `bind_addr` with a freshly generated self-signed certificate.
    /// For local development and tests.
    pub fn localhost(bind_addr: SocketAddr) -> Result<Self, ServerError> {
        Self::localhost_with_config(bind_addr, ItemwireServerConfig::from_env())
    }

    /// Like [`Self::localhost`] but layered over caller-provided tunables.
    pub fn localhost_with_config(
        bind_addr: SocketAddr,
        mut config: ItemwireServerConfig,
    ) -> Result<Self, ServerError> {
        let cert = rcgen::generate_simple_self_signed(vec!["localhost".to_string()])
            .map_err(|e| ServerError::Tls(e.to_string()))?;

        config.bind_addr = bind_addr;
        config.cert_pem = cert.cert.pem().into_bytes();
        config.key_pem = cert.key_pair.serialize_pem().into_bytes();

        Self::new(config)
    }

    /// The configuration this endpoint was built from.
    pub fn config(&self) -> &ItemwireServerConfig {
        &self.config
    }

    fn build_server_config(config: &ItemwireServerConfig) -> Result<ServerConfig, ServerError> {
        let cert_chain = rustls_pemfile::certs(&mut config.cert_pem.as_slice())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| ServerError::Tls(format!("certificate chain did not parse: {}", e)))?;

        let key = rustls_pemfile::private_key(&mut config.key_pem.as_slice())
            .map_err(|e| ServerError::Tls(format!("private key did not parse: {}", e)))?
            .ok_or_else(|| ServerError::Tls("key PEM holds no private key".to_string()))?;

        let crypto = rustls::ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(cert_chain, key)
            .map_err(|e| ServerError::Tls(e.to_string()))?;

        let mut transport = TransportConfig::default();
        transport.max_idle_timeout(Some(
            std::time::Duration::from_millis(config.idle_timeout_ms)
                .try_into()
                .unwrap(),
        ));
        transport.max_concurrent_bidi_streams(config.max_bi_streams.into());
        transport.max_concurrent_uni_streams(config.max_uni_streams.into());
        if config.keep_alive_interval_ms > 0 {
            transport.keep_alive_interval(Some(std::time::Duration::from_millis(
                config.keep_alive_interval_ms,
            )));
        }

        let mut server_config = ServerConfig::with_crypto(Arc::new(
            quinn::crypto::rustls::QuicServerConfig::try_from(crypto)
                .map_err(|e| ServerError::Tls(e.to_string()))?,
        ));
        server_config.transport_config(Arc::new(transport));
        server_config.max_incoming(config.max_incoming as usize);

        Ok(server_config)
    }

    /// Wait for the next incoming connection attempt. `None` once the
    /// endpoint is closed.
    pub async fn accept(&self) -> Option<Incoming> {
        self.endpoint.accept().await
    }

    /// The address the endpoint actually bound (relevant with port 0).
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.endpoint.local_addr()?)
    }

    /// Close the endpoint and every connection on it.
    pub fn close(&self) {
        self.endpoint.close(0u32.into(), b"shutting down");
    }

    /// Accept connections forever, spawning `handler` for each one.
    ///
    /// When `max_concurrent_handlers` is set, connections past the cap wait
    /// for a permit inside their task instead of being refused.
    #[instrument(skip(self, handler))]
    pub async fn run<H, Fut>(&self, handler: H) -> Result<(), ServerError>
    where
        H: Fn(ConnectionHandler) -> Fut + Send + Sync + Clone + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        use tokio::sync::Semaphore;

        info!("Accepting connections");

        let handler_permits = if self.config.max_concurrent_handlers > 0 {
            Some(Arc::new(Semaphore::new(
                self.config.max_concurrent_handlers as usize,
            )))
        } else {
            None
        };

        while let Some(incoming) = self.accept().await {
            let handler = handler.clone();
            let handler_permits = handler_permits.clone();

            tokio::spawn(async move {
                let _permit = match handler_permits {
                    Some(permits) => match permits.acquire_owned().await {
                        Ok(permit) => Some(permit),
                        Err(_) => {
                            warn!("Handler semaphore closed, dropping connection");
                            return;
                        }
                    },
                    None => None,
                };

                match incoming.await {
                    Ok(connection) => {
                        debug!(remote = %connection.remote_address(), "Connection established");
                        handler(ConnectionHandler::new(connection)).await;
                    }
                    Err(e) => {
                        warn!("Handshake failed: {}", e);
                    }
                }
            });
        }

        Ok(())
    }
}

/// One accepted QUIC connection.
pub struct ConnectionHandler {
    connection: quinn::Connection,
}

impl ConnectionHandler {
    pub fn new(connection: quinn::Connection) -> Self {
        Self { connection }
    }

    /// Peer address.
    pub fn remote_address(&self) -> SocketAddr {
        self.connection.remote_address()
    }

    /// Stable identifier for this connection, unique while it is open.
    pub fn stable_id(&self) -> usize {
        self.connection.stable_id()
    }

    /// Clone of the underlying connection handle (reference-counted).
    pub fn connection(&self) -> quinn::Connection {
        self.connection.clone()
    }

    /// Wait for the peer to open a bidirectional stream.
    pub async fn accept_bi(&self) -> Result<(SendStream, RecvStream), ServerError> {
        Ok(self.connection.accept_bi().await?)
    }

    /// Wait for the peer to open a unidirectional stream.
    pub async fn accept_uni(&self) -> Result<RecvStream, ServerError> {
        Ok(self.connection.accept_uni().await?)
    }

    /// Open a bidirectional stream toward the peer.
    pub async fn open_bi(&self) -> Result<(SendStream, RecvStream), ServerError> {
        Ok(self.connection.open_bi().await?)
    }

    /// Open a unidirectional stream toward the peer.
    pub async fn open_uni(&self) -> Result<SendStream, ServerError> {
        Ok(self.connection.open_uni().await?)
    }

    /// Accept request streams until the connection goes away, spawning
    /// `handler` for each.
    #[instrument(skip(self, handler), fields(remote = %self.remote_address()))]
    pub async fn run<H, Fut>(&self, handler: H)
    where
        H: Fn(StreamHandler) -> Fut + Send + Sync + Clone + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        loop {
            match self.accept_bi().await {
                Ok((send, recv)) => {
                    let handler = handler.clone();
                    tokio::spawn(async move {
                        handler(StreamHandler::new(send, recv)).await;
                    });
                }
                Err(ServerError::Connection(quinn::ConnectionError::ApplicationClosed(_)))
                | Err(ServerError::Connection(quinn::ConnectionError::LocallyClosed)) => {
                    debug!("Connection closed");
                    break;
                }
                Err(e) => {
                    error!("Stream accept failed: {}", e);
                    break;
                }
            }
        }
    }

    /// Whether the connection has not been closed by either side.
    pub fn is_open(&self) -> bool {
        self.connection.close_reason().is_none()
    }

    /// Close the connection with an application error code.
    pub fn close(&self, code: u32, reason: &[u8]) {
        self.connection.close(code.into(), reason);
    }
}

/// One bidirectional request stream.
pub struct StreamHandler {
    send: SendStream,
    recv: RecvStream,
}

impl StreamHandler {
    pub fn new(send: SendStream, recv: RecvStream) -> Self {
        Self { send, recv }
    }

    /// Read the next frame off the receive half.
    pub async fn read_frame(&mut self) -> Result<Frame, ServerError> {
        Ok(read_frame(&mut self.recv).await?)
    }

    /// Write a frame to the send half.
    pub async fn write_frame(&mut self, frame: &Frame) -> Result<(), ServerError> {
        Ok(write_frame(&mut self.send, frame).await?)
    }

    /// Encode `response` into a response frame and write it.
    pub async fn respond<Resp: prost::Message>(
        &mut self,
        response: &Resp,
    ) -> Result<(), ServerError> {
        let frame = Frame::response(response)?;
        self.write_frame(&frame).await
    }

    /// Encode a structured error into an error frame and write it.
    pub async fn respond_error(&mut self, error: &RpcError) -> Result<(), ServerError> {
        let frame = Frame::error(error)?;
        self.write_frame(&frame).await
    }

    /// Signal the peer that no more frames follow.
    pub fn finish(&mut self) -> Result<(), ServerError> {
        self.send
            .finish()
            .map_err(|e| ServerError::Frame(FrameError::Io(std::io::Error::other(e))))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_tunables() {
        let config = ItemwireServerConfig::default();
        assert_eq!(config.bind_addr, "0.0.0.0:8001".parse().unwrap());
        assert!(config.cert_pem.is_empty());
        assert!(config.key_pem.is_empty());
        assert_eq!(config.max_incoming, 4_096);
        assert_eq!(config.max_bi_streams, 512);
        assert_eq!(config.max_uni_streams, 64);
        assert_eq!(config.idle_timeout_ms, 90_000);
        assert_eq!(config.keep_alive_interval_ms, 20_000);
        assert_eq!(config.udp_receive_buffer_size, 4 * 1024 * 1024);
        assert_eq!(config.udp_send_buffer_size, 4 * 1024 * 1024);
        assert_eq!(config.max_concurrent_handlers, 0);
    }

    #[test]
    fn test_clone_copies_every_field() {
        let config = ItemwireServerConfig {
            bind_addr: "127.0.0.1:4710".parse().unwrap(),
            cert_pem: b"pem cert bytes".to_vec(),
            key_pem: b"pem key bytes".to_vec(),
            max_incoming: 2_048,
            max_bi_streams: 48,
            max_uni_streams: 12,
            idle_timeout_ms: 45_000,
            keep_alive_interval_ms: 9_000,
            udp_receive_buffer_size: 512 * 1024,
            udp_send_buffer_size: 512 * 1024,
            max_concurrent_handlers: 64,
        };
        let cloned = config.clone();
        assert_eq!(cloned.bind_addr, config.bind_addr);
        assert_eq!(cloned.max_incoming, config.max_incoming);
        assert_eq!(cloned.max_bi_streams, config.max_bi_streams);
        assert_eq!(cloned.max_uni_streams, config.max_uni_streams);
        assert_eq!(cloned.idle_timeout_ms, config.idle_timeout_ms);
        assert_eq!(cloned.keep_alive_interval_ms, config.keep_alive_interval_ms);
        assert_eq!(
            cloned.max_concurrent_handlers,
            config.max_concurrent_handlers
        );
    }

    #[test]
    fn test_debug_render_names_fields() {
        let rendered = format!("{:?}", ItemwireServerConfig::default());
        assert!(rendered.contains("ItemwireServerConfig"));
        assert!(rendered.contains("bind_addr"));
        assert!(rendered.contains("max_incoming"));
    }

    #[tokio::test]
    async fn test_localhost_server_comes_up() {
        let server = ItemwireServer::localhost("127.0.0.1:0".parse().unwrap());
        assert!(
            server.is_ok(),
            "localhost server did not come up: {:?}",
            server.err()
        );
    }

    #[tokio::test]
    async fn test_bound_port_is_real() {
        let server = ItemwireServer::localhost("127.0.0.1:0".parse().unwrap()).unwrap();
        // Port 0 must have been replaced with a real port
        assert!(server.local_addr().unwrap().port() > 0);
    }

    #[tokio::test]
    async fn test_close_after_bind() {
        let server = ItemwireServer::localhost("127.0.0.1:0".parse().unwrap()).unwrap();
        server.close();
    }

    #[test]
    fn test_garbage_tls_material_rejected() {
        let config = ItemwireServerConfig {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            cert_pem: b"not a pem".to_vec(),
            key_pem: b"not a pem either".to_vec(),
            ..Default::default()
        };
        assert!(ItemwireServer::new(config).is_err());
    }

    #[test]
    fn test_error_display() {
        let tls = ServerError::Tls("handshake rejected".to_string());
        assert_eq!(tls.to_string(), "TLS error: handshake rejected");
        assert_eq!(ServerError::Closed.to_string(), "server closed");
    }

    #[tokio::test]
    async fn test_accept_returns_none_after_close() {
        let server = ItemwireServer::localhost("127.0.0.1:0".parse().unwrap()).unwrap();
        server.close();
        assert!(server.accept().await.is_none());
    }

    #[test]
    fn test_tls_config_requires_cert() {
        let config = ItemwireServerConfig {
            cert_pem: Vec::new(),
            key_pem: Vec::new(),
            ..Default::default()
        };
        assert!(ItemwireServer::build_server_config(&config).is_err());
    }

    #[test]
    fn test_tls_config_requires_key() {
        // Valid certificate, no key
        let cert = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        let config = ItemwireServerConfig {
            cert_pem: cert.cert.pem().into_bytes(),
            key_pem: Vec::new(),
            ..Default::default()
        };
        assert!(ItemwireServer::build_server_config(&config).is_err());
    }

    #[test]
    fn test_tls_config_with_generated_cert() {
        let cert = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        let config = ItemwireServerConfig {
            cert_pem: cert.cert.pem().into_bytes(),
            key_pem: cert.key_pair.serialize_pem().into_bytes(),
            ..Default::default()
        };
        assert!(ItemwireServer::build_server_config(&config).is_ok());
    }

    #[tokio::test]
    async fn test_bind_with_generated_cert() {
        let cert = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        let config = ItemwireServerConfig {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            cert_pem: cert.cert.pem().into_bytes(),
            key_pem: cert.key_pair.serialize_pem().into_bytes(),
            ..Default::default()
        };
        assert!(ItemwireServer::new(config).is_ok());
    }

    #[test]
    fn test_env_parse_ignores_garbage() {
        // Unset and non-numeric both fall back
        assert_eq!(env_parse("ITEMWIRE_TEST_UNSET_VAR", 42u32), 42);
        unsafe {
            std::env::set_var("ITEMWIRE_TEST_GARBAGE_VAR", "not-a-number");
        }
        assert_eq!(env_parse("ITEMWIRE_TEST_GARBAGE_VAR", 7u64), 7);
        unsafe {
            std::env::remove_var("ITEMWIRE_TEST_GARBAGE_VAR");
        }
    }
}
