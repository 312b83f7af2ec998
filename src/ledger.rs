//! The persistent ledger of applied migrations.
//!
//! One row per applied migration: the file name, the batch it was applied
//! in, and when. A row exists if and only if that migration is currently
//! considered applied; apply inserts and rollback deletes rows inside the
//! same transaction that runs the scripts.

use std::collections::HashSet;

use sqlx::{Executor, Postgres};

use crate::error::MigrateError;

/// Name of the ledger table.
pub const LEDGER_TABLE: &str = "schema_migrations";

const CREATE_LEDGER_SQL: &str = "CREATE TABLE IF NOT EXISTS schema_migrations (
    name       TEXT PRIMARY KEY,
    batch      INTEGER NOT NULL,
    applied_at TIMESTAMPTZ NOT NULL DEFAULT now()
)";

/// Idempotently create the ledger table. Safe to call every run.
pub async fn ensure<'a, E>(executor: E) -> Result<(), MigrateError>
where
    E: Executor<'a, Database = Postgres>,
{
    sqlx::query(CREATE_LEDGER_SQL)
        .execute(executor)
        .await
        .map_err(MigrateError::Ledger)?;
    Ok(())
}

/// Names of every applied migration, unordered.
pub async fn applied_set<'a, E>(executor: E) -> Result<HashSet<String>, MigrateError>
where
    E: Executor<'a, Database = Postgres>,
{
    let names: Vec<String> = sqlx::query_scalar("SELECT name FROM schema_migrations")
        .fetch_all(executor)
        .await
        .map_err(MigrateError::Ledger)?;
    Ok(names.into_iter().collect())
}

/// One more than the highest existing batch number; 1 for an empty ledger.
pub async fn next_batch<'a, E>(executor: E) -> Result<i32, MigrateError>
where
    E: Executor<'a, Database = Postgres>,
{
    Ok(last_batch(executor).await? + 1)
}

/// The highest existing batch number; 0 when nothing has been applied.
pub async fn last_batch<'a, E>(executor: E) -> Result<i32, MigrateError>
where
    E: Executor<'a, Database = Postgres>,
{
    sqlx::query_scalar("SELECT COALESCE(MAX(batch), 0) FROM schema_migrations")
        .fetch_one(executor)
        .await
        .map_err(MigrateError::Ledger)
}

/// Names recorded in `batch`, most recent name first.
pub async fn batch_names_desc<'a, E>(executor: E, batch: i32) -> Result<Vec<String>, MigrateError>
where
    E: Executor<'a, Database = Postgres>,
{
    sqlx::query_scalar("SELECT name FROM schema_migrations WHERE batch = $1 ORDER BY name DESC")
        .bind(batch)
        .fetch_all(executor)
        .await
        .map_err(MigrateError::Ledger)
}

/// Record a migration as applied. Runs on whatever executor the caller
/// holds, in practice the open apply transaction.
pub async fn insert<'a, E>(executor: E, name: &str, batch: i32) -> Result<(), MigrateError>
where
    E: Executor<'a, Database = Postgres>,
{
    sqlx::query("INSERT INTO schema_migrations (name, batch) VALUES ($1, $2)")
        .bind(name)
        .bind(batch)
        .execute(executor)
        .await
        .map_err(MigrateError::Ledger)?;
    Ok(())
}

/// Remove a migration's ledger row.
pub async fn delete<'a, E>(executor: E, name: &str) -> Result<(), MigrateError>
where
    E: Executor<'a, Database = Postgres>,
{
    sqlx::query("DELETE FROM schema_migrations WHERE name = $1")
        .bind(name)
        .execute(executor)
        .await
        .map_err(MigrateError::Ledger)?;
    Ok(())
}
