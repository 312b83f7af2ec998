//! Failure taxonomy for the migration engine.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Everything that can go wrong while resolving configuration, reading
/// migration files, or running them against the database.
///
/// Errors raised inside an apply or rollback transaction abort the whole
/// batch; the failing migration's name is part of the message. The engine
/// never prints; callers decide how to surface these.
#[derive(Debug, Error)]
pub enum MigrateError {
    #[error("DATABASE_URL is not set; pass --database-url or set it in the environment or .env")]
    MissingDatabaseUrl,

    /// The URL is redacted before it lands here.
    #[error("unsupported database URL (only postgres is supported): {0}")]
    UnsupportedUrl(String),

    #[error("database connection failed: {source}")]
    Connect {
        #[source]
        source: sqlx::Error,
    },

    #[error("database connection failed: no response within {0:?}")]
    ConnectTimeout(Duration),

    #[error("migrations directory not found: {}", .0.display())]
    DirectoryNotFound(PathBuf),

    #[error("failed to read migrations directory {}: {source}", .path.display())]
    ReadDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read migration {name}: {source}")]
    UnreadableFile {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("migration {0} has no up SQL")]
    EmptyUp(String),

    #[error("migration {0} has no down SQL")]
    EmptyDown(String),

    #[error("apply {name}: {source}")]
    Apply {
        name: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("rollback {name}: {source}")]
    Rollback {
        name: String,
        #[source]
        source: sqlx::Error,
    },

    /// The ledger references a migration whose file no longer exists.
    #[error("migration file missing for {0}")]
    MissingFile(String),

    /// Ledger table queries and mutations, including transaction begin/commit.
    #[error("migration ledger error: {0}")]
    Ledger(#[source] sqlx::Error),
}
