// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Embedded schema migrations for both supported backends.
//!
//! The SQL files under `migrations/` are compiled into the binary, so the
//! server (or anything embedding itemwire-core) can bring a fresh database
//! up to date without shipping files alongside it:
//!
//! ```ignore
//! let pool = sqlx::PgPool::connect(&database_url).await?;
//! itemwire_core::migrations::run_postgres(&pool).await?;
//! ```

use sqlx::migrate::MigrateError;

/// Migrator over the PostgreSQL migration set.
pub static POSTGRES: sqlx::migrate::Migrator = sqlx::migrate!("./migrations/postgresql");

/// Migrator over the SQLite migration set.
pub static SQLITE: sqlx::migrate::Migrator = sqlx::migrate!("./migrations/sqlite");

/// Bring a PostgreSQL database up to the current schema.
///
/// Idempotent: migrations that already ran are skipped.
pub async fn run_postgres(pool: &sqlx::PgPool) -> Result<(), MigrateError> {
    POSTGRES.run(pool).await
}

/// Bring a SQLite database up to the current schema.
///
/// Idempotent: migrations that already ran are skipped.
pub async fn run_sqlite(pool: &sqlx::SqlitePool) -> Result<(), MigrateError> {
    SQLITE.run(pool).await
}
