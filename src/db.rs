//! Connection provisioning: a bounded pool plus a deadline-bounded ping.
//!
//! Collaborator glue for the binary; the engine itself only needs a live
//! pool. The deadline covers the initial connectivity check only, never
//! migration scripts.

use std::time::Duration;

use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::debug;

use crate::error::MigrateError;

/// Upper bound on pooled connections for one invocation.
const MAX_CONNECTIONS: u32 = 10;
/// Pooled connections are recycled after this long.
const MAX_LIFETIME: Duration = Duration::from_secs(30 * 60);
/// How long the initial ping may take before the run is aborted.
const PING_DEADLINE: Duration = Duration::from_secs(30);

/// Build a pool for `url` and verify the server answers within the ping
/// deadline. Dropping the returned pool releases every connection.
pub async fn connect(url: &str) -> Result<PgPool, MigrateError> {
    let pool = PgPoolOptions::new()
        .max_connections(MAX_CONNECTIONS)
        .max_lifetime(MAX_LIFETIME)
        .connect_lazy(url)
        .map_err(|source| MigrateError::Connect { source })?;

    debug!("pinging database");
    match tokio::time::timeout(PING_DEADLINE, sqlx::query("SELECT 1").execute(&pool)).await {
        Ok(Ok(_)) => Ok(pool),
        Ok(Err(source)) => Err(MigrateError::Connect { source }),
        Err(_elapsed) => Err(MigrateError::ConnectTimeout(PING_DEADLINE)),
    }
}
