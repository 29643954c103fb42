// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! [`Persistence`] over a single SQLite file, for embedded deployments.

use std::path::Path;

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;

use crate::error::CoreError;
use crate::migrations;

use super::{
    IdempotencyRecord, ItemRecord, NewOutboxMessage, OutboxMessageRecord, OutboxOutcome,
    Persistence, StoreOutcome,
};

/// Stores everything in one SQLite database file.
#[derive(Clone)]
pub struct SqlitePersistence {
    pool: SqlitePool,
}

impl SqlitePersistence {
    /// Wrap an already-connected pool. Migrations are the caller's problem.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (or create) the database file at `path` and migrate it.
    ///
    /// Missing parent directories are created first, so
    /// `SqlitePersistence::from_path(".data/itemwire.db")` works on a
    /// fresh checkout.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| CoreError::DatabaseError {
                operation: "create_dir".to_string(),
                details: format!("cannot create directory {:?}: {}", parent, e),
            })?;
        }

        // mode=rwc creates the file on first open
        let url = format!("sqlite:{}?mode=rwc", path.to_string_lossy());
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await
            .map_err(|e| CoreError::DatabaseError {
                operation: "connect".to_string(),
                details: format!("cannot open SQLite database {:?}: {}", path, e),
            })?;

        migrations::SQLITE
            .run(&pool)
            .await
            .map_err(|e| CoreError::DatabaseError {
                operation: "migrate".to_string(),
                details: format!("migration failed: {}", e),
            })?;

        Ok(Self { pool })
    }
}

async fn insert_outbox_message(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    message: &NewOutboxMessage,
) -> Result<(), CoreError> {
    sqlx::query(
        r#"
        INSERT INTO outbox_messages (message_type, payload, created_at, is_processed, retry_count)
        VALUES (?, ?, ?, 0, 0)
        "#,
    )
    .bind(&message.message_type)
    .bind(&message.payload)
    .bind(message.created_at)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

#[async_trait::async_trait]
impl Persistence for SqlitePersistence {
    async fn insert_item(
        &self,
        item: &ItemRecord,
        outbox: &NewOutboxMessage,
    ) -> Result<(), CoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO items (id, name, description, created_at, updated_at, created_by)
            VALUES (?, ?, ?, ?, ?, ?)
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

    async fn update_item(
        &self,
        item: &ItemRecord,
        outbox: &NewOutboxMessage,
    ) -> Result<(), CoreError> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE items
            SET name = ?, description = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&item.name)
        .bind(&item.description)
        .bind(item.updated_at)
        .bind(&item.id)
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

    async fn delete_item(
        &self,
        item_id: &str,
        outbox: &NewOutboxMessage,
    ) -> Result<(), CoreError> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query("DELETE FROM items WHERE id = ?")
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

    async fn get_item(&self, item_id: &str) -> Result<Option<ItemRecord>, CoreError> {
        let record = sqlx::query_as::<_, ItemRecord>(
            r#"
            SELECT id, name, description, created_at, updated_at, created_by
            FROM items
            WHERE id = ?
            "#,
        )
        .bind(item_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn list_items(&self) -> Result<Vec<ItemRecord>, CoreError> {
        let records = sqlx::query_as::<_, ItemRecord>(
            r#"
            SELECT id, name, description, created_at, updated_at, created_by
            FROM items
            ORDER BY created_at DESC, id DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    async fn get_idempotency_record(
        &self,
        key: &str,
    ) -> Result<Option<IdempotencyRecord>, CoreError> {
        let record = sqlx::query_as::<_, IdempotencyRecord>(
            r#"
            SELECT key, result, created_at, expires_at
            FROM idempotency_records
            WHERE key = ?
            "#,
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn store_idempotency_record(
        &self,
        record: &IdempotencyRecord,
    ) -> Result<StoreOutcome, CoreError> {
        // The upsert only replaces rows whose expiry has passed. A conflicting
        // live row leaves rows_affected at zero, which signals a lost race.
        let result = sqlx::query(
            r#"
            INSERT INTO idempotency_records (key, result, created_at, expires_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                result = excluded.result,
                created_at = excluded.created_at,
                expires_at = excluded.expires_at
            WHERE idempotency_records.expires_at <= excluded.created_at
            "#,
        )
        .bind(&record.key)
        .bind(&record.result)
        .bind(record.created_at)
        .bind(record.expires_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            Ok(StoreOutcome::LostRace)
        } else {
            Ok(StoreOutcome::Stored)
        }
    }

    async fn delete_expired_idempotency_records(
        &self,
        now: DateTime<Utc>,
    ) -> Result<u64, CoreError> {
        let result = sqlx::query("DELETE FROM idempotency_records WHERE expires_at <= ?")
            .bind(now)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    async fn fetch_pending_outbox(
        &self,
        limit: i64,
        max_retries: i32,
    ) -> Result<Vec<OutboxMessageRecord>, CoreError> {
        let records = sqlx::query_as::<_, OutboxMessageRecord>(
            r#"
            SELECT id, message_type, payload, created_at, is_processed,
                   processed_at, retry_count, last_error
            FROM outbox_messages
            WHERE is_processed = 0 AND retry_count < ?
            ORDER BY created_at ASC, id ASC
            LIMIT ?
            "#,
        )
        .bind(max_retries)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    async fn apply_outbox_outcomes(&self, outcomes: &[OutboxOutcome]) -> Result<(), CoreError> {
        if outcomes.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;

        for outcome in outcomes {
            match outcome {
                OutboxOutcome::Delivered { id, processed_at } => {
                    sqlx::query(
                        r#"
                        UPDATE outbox_messages
                        SET is_processed = 1, processed_at = ?, last_error = NULL
                        WHERE id = ?
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
                        SET retry_count = retry_count + 1, last_error = ?
                        WHERE id = ?
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

    async fn health_check_db(&self) -> Result<bool, CoreError> {
        let probe = sqlx::query_as::<_, (i64,)>("SELECT 1").fetch_one(&self.pool).await;
        Ok(probe.is_ok())
    }
}
