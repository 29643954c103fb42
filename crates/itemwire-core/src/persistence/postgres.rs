// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! [`Persistence`] over PostgreSQL, the backend for server deployments.
//!
//! The SQL lives in free functions taking a pool, so integration tests can
//! call them without constructing the provider.

#![allow(dead_code)] // Free functions are reached via the trait impl and tests

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::error::CoreError;

/// Hands every [`Persistence`] call to a shared [`PgPool`].
#[derive(Clone)]
pub struct PostgresPersistence {
    pool: PgPool,
}

impl PostgresPersistence {
    /// Wrap an already-connected pool. Migrations are the caller's problem.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

use super::{
    IdempotencyRecord, ItemRecord, NewOutboxMessage, OutboxMessageRecord, OutboxOutcome,
    Persistence, StoreOutcome,
};

async fn insert_outbox_message(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    message: &NewOutboxMessage,
) -> Result<(), CoreError> {
    sqlx::query(
        r#"
        INSERT INTO outbox_messages (message_type, payload, created_at, is_processed, retry_count)
        VALUES ($1, $2, $3, FALSE, 0)
        "#,
    )
    .bind(&message.message_type)
    .bind(&message.payload)
    .bind(message.created_at)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

// ============================================================================
// Item Operations
// ============================================================================

/// Insert an item and its outbox row in one transaction.
pub async fn insert_item(
    pool: &PgPool,
    item: &ItemRecord,
    outbox: &NewOutboxMessage,
) -> Result<(), CoreError> {
    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        INSERT INTO items (id, name, description, created_at, updated_at, created_by)
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(&item.id)
    .bind(&item.name)
    .bind(&item.description)
    .bind(item.created_at)
    .bind(item.updated_at)
    .bind(&item.created_by)
    .execute(&mut *tx)
    .await?;

    insert_outbox_message(&mut tx, outbox).await?;

    tx.commit().await?;
    Ok(())
}

/// Update an item and insert its outbox row in one transaction.
pub async fn update_item(
    pool: &PgPool,
    item: &ItemRecord,
    outbox: &NewOutboxMessage,
) -> Result<(), CoreError> {
    let mut tx = pool.begin().await?;

    let result = sqlx::query(
        r#"
        UPDATE items
        SET name = $2, description = $3, updated_at = $4
        WHERE id = $1
        "#,
    )
    .bind(&item.id)
    .bind(&item.name)
    .bind(&item.description)
    .bind(item.updated_at)
    .execute(&mut *tx)
    .await?;

    if result.rows_affected() == 0 {
        return Err(CoreError::ItemNotFound {
            item_id: item.id.clone(),
        });
    }

    insert_outbox_message(&mut tx, outbox).await?;

    tx.commit().await?;
    Ok(())
}

/// Delete an item and insert its outbox row in one transaction.
pub async fn delete_item(
    pool: &PgPool,
    item_id: &str,
    outbox: &NewOutboxMessage,
) -> Result<(), CoreError> {
    let mut tx = pool.begin().await?;

    let result = sqlx::query("DELETE FROM items WHERE id = $1")
        .bind(item_id)
        .execute(&mut *tx)
        .await?;

    if result.rows_affected() == 0 {
        return Err(CoreError::ItemNotFound {
            item_id: item_id.to_string(),
        });
    }

    insert_outbox_message(&mut tx, outbox).await?;

    tx.commit().await?;
    Ok(())
}

/// Get an item by ID.
pub async fn get_item(pool: &PgPool, item_id: &str) -> Result<Option<ItemRecord>, CoreError> {
    let record = sqlx::query_as::<_, ItemRecord>(
        r#"
        SELECT id, name, description, created_at, updated_at, created_by
        FROM items
        WHERE id = $1
        "#,
    )
    .bind(item_id)
    .fetch_optional(pool)
    .await?;

    Ok(record)
}

/// List all items, newest first.
pub async fn list_items(pool: &PgPool) -> Result<Vec<ItemRecord>, CoreError> {
    let records = sqlx::query_as::<_, ItemRecord>(
        r#"
        SELECT id, name, description, created_at, updated_at, created_by
        FROM items
        ORDER BY created_at DESC, id DESC
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(records)
}

// ============================================================================
// Idempotency Operations
// ============================================================================

/// Get a stored idempotency record by key.
pub async fn get_idempotency_record(
    pool: &PgPool,
    key: &str,
) -> Result<Option<IdempotencyRecord>, CoreError> {
    let record = sqlx::query_as::<_, IdempotencyRecord>(
        r#"
        SELECT key, result, created_at, expires_at
        FROM idempotency_records
        WHERE key = $1
        "#,
    )
    .bind(key)
    .fetch_optional(pool)
    .await?;

    Ok(record)
}

/// Store an idempotency record, overwriting only expired rows.
pub async fn store_idempotency_record(
    pool: &PgPool,
    record: &IdempotencyRecord,
) -> Result<StoreOutcome, CoreError> {
    // The upsert only replaces rows whose expiry has passed. A conflicting
    // live row leaves rows_affected at zero, which signals a lost race.
    let result = sqlx::query(
        r#"
        INSERT INTO idempotency_records (key, result, created_at, expires_at)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (key) DO UPDATE SET
            result = EXCLUDED.result,
            created_at = EXCLUDED.created_at,
            expires_at = EXCLUDED.expires_at
        WHERE idempotency_records.expires_at <= EXCLUDED.created_at
        "#,
    )
    .bind(&record.key)
    .bind(&record.result)
    .bind(record.created_at)
    .bind(record.expires_at)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        Ok(StoreOutcome::LostRace)
    } else {
        Ok(StoreOutcome::Stored)
    }
}

/// Remove idempotency records that expired at or before `now`.
pub async fn delete_expired_idempotency_records(
    pool: &PgPool,
    now: DateTime<Utc>,
) -> Result<u64, CoreError> {
    let result = sqlx::query("DELETE FROM idempotency_records WHERE expires_at <= $1")
        .bind(now)
        .execute(pool)
        .await?;

    Ok(result.rows_affected())
}

// ============================================================================
// Outbox Operations
// ============================================================================

/// Fetch undelivered outbox rows, oldest first.
pub async fn fetch_pending_outbox(
    pool: &PgPool,
    limit: i64,
    max_retries: i32,
) -> Result<Vec<OutboxMessageRecord>, CoreError> {
    let records = sqlx::query_as::<_, OutboxMessageRecord>(
        r#"
        SELECT id, message_type, payload, created_at, is_processed,
               processed_at, retry_count, last_error
        FROM outbox_messages
        WHERE is_processed = FALSE AND retry_count < $1
        ORDER BY created_at ASC, id ASC
        LIMIT $2
        "#,
    )
    .bind(max_retries)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(records)
}

/// Apply a batch of delivery outcomes in one transaction.
pub async fn apply_outbox_outcomes(
    pool: &PgPool,
    outcomes: &[OutboxOutcome],
) -> Result<(), CoreError> {
    if outcomes.is_empty() {
        return Ok(());
    }

    let mut tx = pool.begin().await?;

    for outcome in outcomes {
        match outcome {
            OutboxOutcome::Delivered { id, processed_at } => {
                sqlx::query(
                    r#"
                    UPDATE outbox_messages
                    SET is_processed = TRUE, processed_at = $1, last_error = NULL
                    WHERE id = $2
                    "#,
                )
                .bind(processed_at)
                .bind(id)
                .execute(&mut *tx)
                .await?;
            }
            OutboxOutcome::Failed { id, error } => {
                sqlx::query(
                    r#"
                    UPDATE outbox_messages
                    SET retry_count = retry_count + 1, last_error = $1
                    WHERE id = $2
                    "#,
                )
                .bind(error)
                .bind(id)
                .execute(&mut *tx)
                .await?;
            }
        }
    }

    tx.commit().await?;
    Ok(())
}

#[async_trait::async_trait]
impl Persistence for PostgresPersistence {
    async fn insert_item(
        &self,
        item: &ItemRecord,
        outbox: &NewOutboxMessage,
    ) -> Result<(), CoreError> {
        insert_item(&self.pool, item, outbox).await
    }

    async fn update_item(
        &self,
        item: &ItemRecord,
        outbox: &NewOutboxMessage,
    ) -> Result<(), CoreError> {
        update_item(&self.pool, item, outbox).await
    }

    async fn delete_item(
        &self,
        item_id: &str,
        outbox: &NewOutboxMessage,
    ) -> Result<(), CoreError> {
        delete_item(&self.pool, item_id, outbox).await
    }

    async fn get_item(&self, item_id: &str) -> Result<Option<ItemRecord>, CoreError> {
        get_item(&self.pool, item_id).await
    }

    async fn list_items(&self) -> Result<Vec<ItemRecord>, CoreError> {
        list_items(&self.pool).await
    }

    async fn get_idempotency_record(
        &self,
        key: &str,
    ) -> Result<Option<IdempotencyRecord>, CoreError> {
        get_idempotency_record(&self.pool, key).await
    }

    async fn store_idempotency_record(
        &self,
        record: &IdempotencyRecord,
    ) -> Result<StoreOutcome, CoreError> {
        store_idempotency_record(&self.pool, record).await
    }

    async fn delete_expired_idempotency_records(
        &self,
        now: DateTime<Utc>,
    ) -> Result<u64, CoreError> {
        delete_expired_idempotency_records(&self.pool, now).await
    }

    async fn fetch_pending_outbox(
        &self,
        limit: i64,
        max_retries: i32,
    ) -> Result<Vec<OutboxMessageRecord>, CoreError> {
        fetch_pending_outbox(&self.pool, limit, max_retries).await
    }

    async fn apply_outbox_outcomes(&self, outcomes: &[OutboxOutcome]) -> Result<(), CoreError> {
        apply_outbox_outcomes(&self.pool, outcomes).await
    }

    async fn health_check_db(&self) -> Result<bool, CoreError> {
        let probe = sqlx::query_as::<_, (i32,)>("SELECT 1").fetch_one(&self.pool).await;
        Ok(probe.is_ok())
    }
}
