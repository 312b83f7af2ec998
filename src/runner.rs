//! Apply, rollback, and status orchestration.
//!
//! The runner diffs the file repository against the ledger and executes the
//! difference inside one transaction per operation. Per-item progress goes
//! through a caller-supplied callback; the runner itself never writes to a
//! terminal.

use std::collections::{HashMap, HashSet};

use serde::Serialize;
use sqlx::PgPool;
use tracing::debug;

use crate::error::MigrateError;
use crate::ledger;
use crate::repository::{FileRepository, MigrationFile};

/// Result of an apply run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Every file already has a ledger entry. No transaction was opened and
    /// no batch number was allocated.
    NothingPending,
    /// Migrations applied and committed as one batch, in apply order.
    Applied { names: Vec<String>, batch: i32 },
}

/// Result of a rollback run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RollbackOutcome {
    /// The ledger is empty; there is no batch to roll back.
    NothingToRollback,
    /// The most recent batch was rolled back, names in descending order.
    RolledBack { names: Vec<String>, batch: i32 },
}

/// One row of the status report, in file order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusEntry {
    pub name: String,
    pub applied: bool,
}

impl StatusEntry {
    pub fn status(&self) -> &'static str {
        if self.applied { "applied" } else { "pending" }
    }
}

/// Orchestrates migrations from one directory against one database.
pub struct Runner {
    repo: FileRepository,
}

impl Runner {
    pub fn new(repo: FileRepository) -> Self {
        Self { repo }
    }

    /// Apply every pending migration as one new batch.
    ///
    /// `progress` is invoked with each migration's name right after its up
    /// script has executed and its ledger row is written, in apply order.
    /// The whole batch commits together; any failure rolls the transaction
    /// back and nothing persists.
    pub async fn apply<F>(&self, pool: &PgPool, mut progress: F) -> Result<ApplyOutcome, MigrateError>
    where
        F: FnMut(&str),
    {
        ledger::ensure(pool).await?;
        let files = self.repo.load()?;
        let applied = ledger::applied_set(pool).await?;
        let pending = pending_files(&files, &applied);
        if pending.is_empty() {
            return Ok(ApplyOutcome::NothingPending);
        }

        let batch = ledger::next_batch(pool).await?;
        debug!(pending = pending.len(), batch, "applying migrations");

        let mut tx = pool.begin().await.map_err(MigrateError::Ledger)?;
        let mut names = Vec::with_capacity(pending.len());
        for file in pending {
            if file.up_sql.is_empty() {
                return Err(MigrateError::EmptyUp(file.name.clone()));
            }
            sqlx::raw_sql(&file.up_sql)
                .execute(&mut *tx)
                .await
                .map_err(|source| MigrateError::Apply {
                    name: file.name.clone(),
                    source,
                })?;
            ledger::insert(&mut *tx, &file.name, batch).await?;
            progress(&file.name);
            names.push(file.name.clone());
        }
        tx.commit().await.map_err(MigrateError::Ledger)?;

        Ok(ApplyOutcome::Applied { names, batch })
    }

    /// Roll back every migration in the most recent batch, in descending
    /// name order.
    ///
    /// Every ledger row of the batch must have a matching file with a
    /// non-empty down script; the check happens before the transaction
    /// opens, so a refused rollback leaves the database untouched.
    pub async fn rollback<F>(
        &self,
        pool: &PgPool,
        mut progress: F,
    ) -> Result<RollbackOutcome, MigrateError>
    where
        F: FnMut(&str),
    {
        ledger::ensure(pool).await?;
        let files = self.repo.load()?;
        let last = ledger::last_batch(pool).await?;
        if last == 0 {
            return Ok(RollbackOutcome::NothingToRollback);
        }
        let names = ledger::batch_names_desc(pool, last).await?;
        if names.is_empty() {
            return Ok(RollbackOutcome::NothingToRollback);
        }
        let matched = match_rollback_files(&files, &names)?;
        debug!(count = matched.len(), batch = last, "rolling back batch");

        let mut tx = pool.begin().await.map_err(MigrateError::Ledger)?;
        let mut rolled = Vec::with_capacity(matched.len());
        for file in matched {
            if file.down_sql.is_empty() {
                return Err(MigrateError::EmptyDown(file.name.clone()));
            }
            sqlx::raw_sql(&file.down_sql)
                .execute(&mut *tx)
                .await
                .map_err(|source| MigrateError::Rollback {
                    name: file.name.clone(),
                    source,
                })?;
            ledger::delete(&mut *tx, &file.name).await?;
            progress(&file.name);
            rolled.push(file.name.clone());
        }
        tx.commit().await.map_err(MigrateError::Ledger)?;

        Ok(RollbackOutcome::RolledBack {
            names: rolled,
            batch: last,
        })
    }

    /// Report each discovered file as applied or pending, in file order.
    /// Read-only; no transaction.
    pub async fn status(&self, pool: &PgPool) -> Result<Vec<StatusEntry>, MigrateError> {
        ledger::ensure(pool).await?;
        let files = self.repo.load()?;
        let applied = ledger::applied_set(pool).await?;
        Ok(files
            .into_iter()
            .map(|file| StatusEntry {
                applied: applied.contains(&file.name),
                name: file.name,
            })
            .collect())
    }
}

/// Files with no ledger entry, keeping the repository's ascending order.
fn pending_files<'a>(
    files: &'a [MigrationFile],
    applied: &HashSet<String>,
) -> Vec<&'a MigrationFile> {
    files.iter().filter(|f| !applied.contains(&f.name)).collect()
}

/// Resolve the last batch's ledger names (already descending) to their
/// files. A name without a file means the directory and ledger have
/// diverged, which is a hard error.
fn match_rollback_files<'a>(
    files: &'a [MigrationFile],
    names: &[String],
) -> Result<Vec<&'a MigrationFile>, MigrateError> {
    let by_name: HashMap<&str, &MigrationFile> =
        files.iter().map(|f| (f.name.as_str(), f)).collect();
    names
        .iter()
        .map(|name| {
            by_name
                .get(name.as_str())
                .copied()
                .ok_or_else(|| MigrateError::MissingFile(name.clone()))
        })
        .collect()
}
