//! Storage abstraction and its two backends.
//!
//! [`Persistence`] is the trait the handlers talk to; [`postgres`] and
//! [`sqlite`] implement it over their respective pools.

/// PostgreSQL backend, the production default.
pub mod postgres;

/// SQLite backend for embedded and test use.
pub mod sqlite;

pub use self::postgres::PostgresPersistence;
pub use self::sqlite::SqlitePersistence;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::CoreError;
use itemwire_protocol::wire;

/// Item record from the persistence layer.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ItemRecord {
    /// Unique identifier for the item.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Free-form description.
    pub description: String,
    /// When the item was created.
    pub created_at: DateTime<Utc>,
    /// When the item was last updated, if ever.
    pub updated_at: Option<DateTime<Utc>>,
    /// Principal that created the item.
    pub created_by: String,
}

impl ItemRecord {
    /// Convert this record to its wire representation.
    pub fn to_wire(&self) -> wire::Item {
        wire::Item {
            id: self.id.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            created_at_ms: self.created_at.timestamp_millis(),
            updated_at_ms: self.updated_at.map(|t| t.timestamp_millis()),
            created_by: self.created_by.clone(),
        }
    }
}

/// Cached result of an idempotent write, keyed by client-supplied key.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct IdempotencyRecord {
    /// The client-supplied idempotency key.
    pub key: String,
    /// Encoded response payload that was produced by the original execution.
    pub result: Vec<u8>,
    /// When the record was written.
    pub created_at: DateTime<Utc>,
    /// When the record stops being served and becomes overwritable.
    pub expires_at: DateTime<Utc>,
}

/// Outbox message record from the persistence layer.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct OutboxMessageRecord {
    /// Database primary key.
    pub id: i64,
    /// Notification kind tag (e.g. "ItemCreated").
    pub message_type: String,
    /// JSON payload for the notification.
    pub payload: String,
    /// When the row was written.
    pub created_at: DateTime<Utc>,
    /// Whether the row has been delivered.
    pub is_processed: bool,
    /// When the row was delivered, if it has been.
    pub processed_at: Option<DateTime<Utc>>,
    /// Delivery attempts consumed so far.
    pub retry_count: i32,
    /// Error from the most recent failed attempt.
    pub last_error: Option<String>,
}

/// Outbox row to insert alongside an item mutation.
#[derive(Debug, Clone)]
pub struct NewOutboxMessage {
    /// Notification kind tag (e.g. "ItemCreated").
    pub message_type: String,
    /// JSON payload for the notification.
    pub payload: String,
    /// Insertion timestamp, shared with the item mutation.
    pub created_at: DateTime<Utc>,
}

/// Result of attempting to store an idempotency record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOutcome {
    /// The record was written (fresh key, or an expired row was overwritten).
    Stored,
    /// A live record for this key already exists; the write was skipped.
    LostRace,
}

/// Terminal result of one outbox delivery attempt.
#[derive(Debug, Clone)]
pub enum OutboxOutcome {
    /// The row was delivered and should be marked processed.
    Delivered {
        /// Database primary key of the row.
        id: i64,
        /// Delivery timestamp.
        processed_at: DateTime<Utc>,
    },
    /// Delivery failed; the retry counter is bumped and the error recorded.
    Failed {
        /// Database primary key of the row.
        id: i64,
        /// Error from this attempt, truncated to fit the column.
        error: String,
    },
}

/// Persistence interface used by core handlers and the outbox dispatcher.
#[allow(missing_docs)]
#[async_trait]
pub trait Persistence: Send + Sync {
    /// Insert an item and its outbox row in a single transaction.
    async fn insert_item(
        &self,
        item: &ItemRecord,
        outbox: &NewOutboxMessage,
    ) -> Result<(), CoreError>;

    /// Update an item and insert its outbox row in a single transaction.
    ///
    /// Fails with [`CoreError::ItemNotFound`] when the item no longer exists;
    /// in that case no outbox row is written.
    async fn update_item(
        &self,
        item: &ItemRecord,
        outbox: &NewOutboxMessage,
    ) -> Result<(), CoreError>;

    /// Delete an item and insert its outbox row in a single transaction.
    ///
    /// Fails with [`CoreError::ItemNotFound`] when the item no longer exists;
    /// in that case no outbox row is written.
    async fn delete_item(&self, item_id: &str, outbox: &NewOutboxMessage)
    -> Result<(), CoreError>;

    async fn get_item(&self, item_id: &str) -> Result<Option<ItemRecord>, CoreError>;

    /// List all items, newest first.
    async fn list_items(&self) -> Result<Vec<ItemRecord>, CoreError>;

    /// Fetch the record for a key, if one exists and has not expired.
    async fn get_idempotency_record(
        &self,
        key: &str,
    ) -> Result<Option<IdempotencyRecord>, CoreError>;

    /// Store an idempotency record, overwriting only expired rows.
    ///
    /// Returns [`StoreOutcome::LostRace`] when a live record for the same key
    /// already exists, in which case the caller should re-read the stored
    /// record and surface that result instead of its own.
    async fn store_idempotency_record(
        &self,
        record: &IdempotencyRecord,
    ) -> Result<StoreOutcome, CoreError>;

    /// Remove idempotency records that expired at or before `now`.
    ///
    /// Returns the number of rows removed.
    async fn delete_expired_idempotency_records(
        &self,
        now: DateTime<Utc>,
    ) -> Result<u64, CoreError>;

    /// Fetch undelivered outbox rows, oldest first.
    ///
    /// Rows that have consumed `max_retries` attempts are excluded.
    async fn fetch_pending_outbox(
        &self,
        limit: i64,
        max_retries: i32,
    ) -> Result<Vec<OutboxMessageRecord>, CoreError>;

    /// Apply a batch of delivery outcomes in a single transaction.
    async fn apply_outbox_outcomes(&self, outcomes: &[OutboxOutcome]) -> Result<(), CoreError>;

    async fn health_check_db(&self) -> Result<bool, CoreError>;
}
