// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! How an SDK instance is told where (and how carefully) to connect.

use std::env;
use std::net::SocketAddr;

use itemwire_protocol::ItemwireClientConfig;

use crate::error::{Result, SdkError};
use crate::resilience::ResilienceConfig;

/// SDK configuration for connecting to itemwire-core.
#[derive(Debug, Clone)]
pub struct SdkConfig {
    /// Identity this client acts as (required)
    pub principal_id: String,
    /// Display name shown in presence events (required)
    pub username: String,
    /// Where itemwire-core listens (default: "127.0.0.1:8001")
    pub server_addr: SocketAddr,
    /// Name the server certificate must match (default: "localhost")
    pub server_name: String,
    /// Accept any server certificate, for development (default: false)
    pub skip_cert_verification: bool,
    /// Dial timeout in milliseconds (default: 10_000)
    pub connect_timeout_ms: u64,
    /// Per-attempt request timeout in milliseconds (default: 30_000).
    /// Each retry gets its own timeout budget.
    pub request_timeout_ms: u64,
    /// Retry and circuit breaker tuning
    pub resilience: ResilienceConfig,
}

fn env_ms(key: &str, fallback: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(fallback)
}

impl SdkConfig {
    /// Configuration with defaults for everything except the identity.
    pub fn new(principal_id: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            principal_id: principal_id.into(),
            username: username.into(),
            server_addr: "127.0.0.1:8001".parse().unwrap(),
            server_name: "localhost".to_string(),
            skip_cert_verification: false,
            connect_timeout_ms: 10_000,
            request_timeout_ms: 30_000,
            resilience: ResilienceConfig::default(),
        }
    }

    /// Configuration for talking to a locally running itemwire-core with its
    /// self-signed certificate.
    pub fn localhost(principal_id: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            skip_cert_verification: true,
            ..Self::new(principal_id, username)
        }
    }

    /// Read the configuration from environment variables.
    ///
    /// `ITEMWIRE_PRINCIPAL_ID` and `ITEMWIRE_USERNAME` are required, the rest
    /// are optional:
    /// - `ITEMWIRE_SERVER_ADDR` - server address (default: "127.0.0.1:8001")
    /// - `ITEMWIRE_SERVER_NAME` - server name for TLS (default: "localhost")
    /// - `ITEMWIRE_SKIP_CERT_VERIFICATION` - "true" or "1" to skip TLS
    ///   verification (default: false)
    /// - `ITEMWIRE_CONNECT_TIMEOUT_MS` - connection timeout (default: 10000)
    /// - `ITEMWIRE_REQUEST_TIMEOUT_MS` - per-attempt request timeout
    ///   (default: 30000)
    pub fn from_env() -> Result<Self> {
        let principal_id = env::var("ITEMWIRE_PRINCIPAL_ID")
            .map_err(|_| SdkError::Config("ITEMWIRE_PRINCIPAL_ID is required".to_string()))?;

        let username = env::var("ITEMWIRE_USERNAME")
            .map_err(|_| SdkError::Config("ITEMWIRE_USERNAME is required".to_string()))?;

        let server_addr = env::var("ITEMWIRE_SERVER_ADDR")
            .unwrap_or_else(|_| "127.0.0.1:8001".to_string())
            .parse()
            .map_err(|e| SdkError::Config(format!("invalid ITEMWIRE_SERVER_ADDR: {}", e)))?;

        let server_name =
            env::var("ITEMWIRE_SERVER_NAME").unwrap_or_else(|_| "localhost".to_string());

        let skip_cert_verification = matches!(
            env::var("ITEMWIRE_SKIP_CERT_VERIFICATION").as_deref(),
            Ok("true") | Ok("1")
        );

        Ok(Self {
            principal_id,
            username,
            server_addr,
            server_name,
            skip_cert_verification,
            connect_timeout_ms: env_ms("ITEMWIRE_CONNECT_TIMEOUT_MS", 10_000),
            request_timeout_ms: env_ms("ITEMWIRE_REQUEST_TIMEOUT_MS", 30_000),
            resilience: ResilienceConfig::default(),
        })
    }

    /// Point the SDK at a different server address.
    pub fn with_server_addr(mut self, addr: SocketAddr) -> Self {
        self.server_addr = addr;
        self
    }

    /// Override the TLS server name.
    pub fn with_server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = name.into();
        self
    }

    /// Skip TLS certificate verification. Development only.
    pub fn with_skip_cert_verification(mut self, skip: bool) -> Self {
        self.skip_cert_verification = skip;
        self
    }

    /// Set the connection timeout.
    pub fn with_connect_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.connect_timeout_ms = timeout_ms;
        self
    }

    /// Set the per-attempt request timeout.
    pub fn with_request_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.request_timeout_ms = timeout_ms;
        self
    }

    /// Replace the retry and circuit breaker tuning.
    pub fn with_resilience(mut self, resilience: ResilienceConfig) -> Self {
        self.resilience = resilience;
        self
    }

    /// Derive the transport configuration for the underlying QUIC client.
    pub(crate) fn client_config(&self) -> ItemwireClientConfig {
        ItemwireClientConfig {
            server_addr: self.server_addr,
            server_name: self.server_name.clone(),
            dangerous_skip_cert_verification: self.skip_cert_verification,
            connect_timeout_ms: self.connect_timeout_ms,
            ..Default::default()
        }
    }
}
