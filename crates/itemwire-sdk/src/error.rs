// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The SDK error type and the retry classification the pipeline relies on.

use itemwire_protocol::ClientError;
use thiserror::Error;

use crate::types::RateLimit;

/// Everything a call through the SDK can fail with.
#[derive(Debug, Error)]
pub enum SdkError {
    /// A required setting is missing or unparseable
    #[error("configuration error: {0}")]
    Config(String),

    /// The transport layer failed before a response arrived
    #[error("connection error: {0}")]
    Connection(#[from] ClientError),

    /// An individual attempt exceeded the per-attempt timeout
    #[error("request timed out after {0} ms")]
    Timeout(u64),

    /// The circuit breaker is open and the call was not attempted
    #[error("circuit breaker is open")]
    CircuitOpen,

    /// The server rejected the request at admission
    #[error("rate limited (limit {}, {} remaining, resets at {} ms)", .0.limit, .0.remaining, .0.reset_at_ms)]
    RateLimited(RateLimit),

    /// The server answered with a structured error
    #[error("server error: {code} - {message}")]
    Server {
        /// Machine-readable code, e.g. `ITEM_NOT_FOUND`
        code: String,
        /// Human-readable description
        message: String,
    },

    /// Encoding or decoding a payload failed
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The server answered with a response variant the call did not expect
    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),
}

impl SdkError {
    /// Whether the call pipeline may retry after this error.
    ///
    /// Only transport trouble and attempt timeouts qualify. Rate-limit
    /// rejections and server-reported errors are final for the call.
    pub fn is_retriable(&self) -> bool {
        match self {
            // An error frame is the server answering, not the network failing.
            SdkError::Connection(ClientError::Rpc { .. }) => false,
            SdkError::Connection(_) | SdkError::Timeout(_) => true,
            _ => false,
        }
    }

    /// Whether this error is an admission rejection from the server.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, SdkError::RateLimited(_))
    }
}

impl From<prost::DecodeError> for SdkError {
    fn from(err: prost::DecodeError) -> Self {
        SdkError::Serialization(err.to_string())
    }
}

/// Result alias used across the SDK.
pub type Result<T> = std::result::Result<T, SdkError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_is_retriable() {
        assert!(SdkError::Timeout(30_000).is_retriable());
    }

    #[test]
    fn test_transport_error_is_retriable() {
        let err = SdkError::Connection(ClientError::NotConnected);
        assert!(err.is_retriable());
    }

    #[test]
    fn test_rpc_error_frame_is_not_retriable() {
        let err = SdkError::Connection(ClientError::Rpc {
            code: "VALIDATION_ERROR".to_string(),
            message: "bad request".to_string(),
        });
        assert!(!err.is_retriable());
    }

    #[test]
    fn test_server_error_is_not_retriable() {
        let err = SdkError::Server {
            code: "ITEM_NOT_FOUND".to_string(),
            message: "no such item".to_string(),
        };
        assert!(!err.is_retriable());
    }

    #[test]
    fn test_rate_limited_is_not_retriable() {
        let err = SdkError::RateLimited(RateLimit {
            limit: 100,
            remaining: 0,
            reset_at_ms: 1_000,
        });
        assert!(!err.is_retriable());
        assert!(err.is_rate_limited());
    }
}
