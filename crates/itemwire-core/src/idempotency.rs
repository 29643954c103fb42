// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Idempotent execution of write operations.
//!
//! A client may attach an idempotency key to any mutating request. The first
//! execution under a key stores its encoded response; replays within the
//! retention window are answered from that stored response instead of
//! re-executing. Failed executions store nothing, so a retry after an error
//! runs the operation again.

use std::future::Future;
use std::sync::Arc;

use chrono::{Duration, Utc};
use prost::Message;
use tracing::{debug, warn};

use crate::error::{CoreError, Result};
use crate::persistence::{IdempotencyRecord, Persistence, StoreOutcome};
use itemwire_protocol::wire;

/// Default retention for stored results, in hours.
pub const DEFAULT_TTL_HOURS: i64 = 24;

/// Response types that can pass through the idempotency gate.
pub trait IdempotentResponse: Sized {
    /// Whether results of this shape are stored and replayed.
    ///
    /// Responses that carry no entity payload are not worth replaying; those
    /// operations re-execute on every call, so a retried delete surfaces
    /// not-found instead of a stale acknowledgement.
    const CACHEABLE: bool;

    /// Encode the response for storage.
    fn encode_result(&self) -> Vec<u8>;

    /// Decode a stored response.
    fn decode_result(key: &str, bytes: &[u8]) -> Result<Self>;
}

impl IdempotentResponse for wire::ItemResponse {
    const CACHEABLE: bool = true;

    fn encode_result(&self) -> Vec<u8> {
        self.encode_to_vec()
    }

    fn decode_result(key: &str, bytes: &[u8]) -> Result<Self> {
        Self::decode(bytes).map_err(|e| CoreError::IdempotencyError {
            key: key.to_string(),
            details: format!("stored result is not decodable: {}", e),
        })
    }
}

impl IdempotentResponse for wire::AckResponse {
    const CACHEABLE: bool = false;

    fn encode_result(&self) -> Vec<u8> {
        self.encode_to_vec()
    }

    fn decode_result(_key: &str, _bytes: &[u8]) -> Result<Self> {
        Ok(Self {})
    }
}

/// Wraps write operations with stored-result replay.
#[derive(Clone)]
pub struct IdempotencyGate {
    persistence: Arc<dyn Persistence>,
    ttl: Duration,
}

impl IdempotencyGate {
    /// Create a gate with the default retention window.
    pub fn new(persistence: Arc<dyn Persistence>) -> Self {
        Self::with_ttl(persistence, Duration::hours(DEFAULT_TTL_HOURS))
    }

    /// Create a gate with an explicit retention window.
    pub fn with_ttl(persistence: Arc<dyn Persistence>, ttl: Duration) -> Self {
        Self { persistence, ttl }
    }

    /// Run `op` under the given idempotency key.
    ///
    /// With no key (or an empty one) the operation simply runs. Otherwise a
    /// stored live result for the key is replayed without executing `op`.
    /// When two calls race on the same fresh key, the store step detects the
    /// loss and surfaces the first writer's result so every caller observes
    /// the same response.
    pub async fn execute<R, F, Fut>(&self, key: Option<&str>, op: F) -> Result<R>
    where
        R: IdempotentResponse,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<R>>,
    {
        let Some(key) = key.filter(|k| !k.is_empty()) else {
            return op().await;
        };

        if R::CACHEABLE
            && let Some(record) = self.persistence.get_idempotency_record(key).await?
            && record.expires_at > Utc::now()
        {
            debug!(key, "Replaying stored idempotent result");
            return R::decode_result(key, &record.result);
        }

        let response = op().await?;

        if R::CACHEABLE {
            let now = Utc::now();
            let record = IdempotencyRecord {
                key: key.to_string(),
                result: response.encode_result(),
                created_at: now,
                expires_at: now + self.ttl,
            };

            if self.persistence.store_idempotency_record(&record).await?
                == StoreOutcome::LostRace
            {
                warn!(key, "Lost idempotency race, surfacing first writer's result");
                if let Some(winner) = self.persistence.get_idempotency_record(key).await?
                    && winner.expires_at > Utc::now()
                {
                    return R::decode_result(key, &winner.result);
                }
                // Winner vanished (expired or reaped); our own result stands.
            }
        }

        Ok(response)
    }
}
