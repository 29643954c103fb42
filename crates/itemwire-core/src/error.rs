// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The core error type and its mapping onto wire-level RPC errors.

#![allow(dead_code)] // Some variants only occur in tests today

use itemwire_protocol::wire::RpcError;
use thiserror::Error;

/// Shorthand result with [`CoreError`] as the failure type.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Everything that can go wrong while serving a request.
///
/// Each variant carries a stable machine-readable code, see
/// [`CoreError::error_code`].
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum CoreError {
    /// No item exists with the requested id.
    #[error("Item '{item_id}' not found")]
    ItemNotFound {
        /// Identifier of the item that was looked up.
        item_id: String,
    },

    /// A request field failed validation.
    #[error("Validation error for '{field}': {message}")]
    ValidationError {
        /// Name of the offending field.
        field: String,
        /// Human-readable explanation of the violation.
        message: String,
    },

    /// Request arrived on a connection that has not identified itself.
    #[error("Authentication required: send Hello before other requests")]
    AuthRequired,

    /// The database rejected or failed an operation.
    #[error("Database error during '{operation}': {details}")]
    DatabaseError {
        /// Which database operation was being performed.
        operation: String,
        /// Underlying driver error text.
        details: String,
    },

    /// Encoding or decoding a payload failed.
    #[error("Serialization error in '{context}': {details}")]
    SerializationError {
        /// What was being (de)serialized.
        context: String,
        /// Underlying serializer error text.
        details: String,
    },

    /// A cached idempotency result could not be used.
    #[error("Idempotency failure for key '{key}': {details}")]
    IdempotencyError {
        /// The idempotency key involved.
        key: String,
        /// Why the cached result was unusable.
        details: String,
    },
}

impl CoreError {
    /// Render this error as the wire-level RPC error envelope.
    pub fn to_rpc_error(&self) -> RpcError {
        RpcError {
            code: self.error_code().to_string(),
            message: self.to_string(),
        }
    }

    /// Stable machine-readable code for this error.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::ItemNotFound { .. } => "ITEM_NOT_FOUND",
            Self::ValidationError { .. } => "VALIDATION_ERROR",
            Self::AuthRequired => "AUTH_REQUIRED",
            Self::DatabaseError { .. } => "DATABASE_ERROR",
            Self::SerializationError { .. } => "SERIALIZATION_ERROR",
            Self::IdempotencyError { .. } => "IDEMPOTENCY_ERROR",
        }
    }
}

impl From<sqlx::Error> for CoreError {
    fn from(err: sqlx::Error) -> Self {
        CoreError::DatabaseError {
            operation: "query".to_string(),
            details: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::SerializationError {
            context: "json".to_string(),
            details: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rpc_error_codes() {
        let cases = vec![
            (
                CoreError::ItemNotFound {
                    item_id: "test-id".to_string(),
                },
                "ITEM_NOT_FOUND",
            ),
            (
                CoreError::ValidationError {
                    field: "name".to_string(),
                    message: "must not be empty".to_string(),
                },
                "VALIDATION_ERROR",
            ),
            (CoreError::AuthRequired, "AUTH_REQUIRED"),
            (
                CoreError::DatabaseError {
                    operation: "update_item".to_string(),
                    details: "socket closed mid-query".to_string(),
                },
                "DATABASE_ERROR",
            ),
            (
                CoreError::SerializationError {
                    context: "outbox payload".to_string(),
                    details: "unexpected end of input".to_string(),
                },
                "SERIALIZATION_ERROR",
            ),
            (
                CoreError::IdempotencyError {
                    key: "key-1".to_string(),
                    details: "cached result corrupt".to_string(),
                },
                "IDEMPOTENCY_ERROR",
            ),
        ];

        for (error, expected_code) in cases {
            let rpc_error = error.to_rpc_error();
            assert_eq!(rpc_error.code, expected_code, "wrong code for {:?}", error);
            assert!(!rpc_error.message.is_empty());
        }
    }

    #[test]
    fn test_display_includes_identifiers() {
        let err = CoreError::ItemNotFound {
            item_id: "abc-123".to_string(),
        };
        assert_eq!(err.to_string(), "Item 'abc-123' not found");

        let err = CoreError::ValidationError {
            field: "description".to_string(),
            message: "too long".to_string(),
        };
        assert!(err.to_string().contains("description"));
        assert!(err.to_string().contains("too long"));
    }

    #[test]
    fn test_from_sqlx_error() {
        let core_err: CoreError = sqlx::Error::RowNotFound.into();
        assert_eq!(core_err.error_code(), "DATABASE_ERROR");
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let core_err: CoreError = json_err.into();
        assert_eq!(core_err.error_code(), "SERIALIZATION_ERROR");
    }
}
