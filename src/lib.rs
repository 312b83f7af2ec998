//! Batch-based SQL schema migrations for PostgreSQL.
//!
//! Migration scripts are plain `.sql` files in a directory, split into an up
//! and a down section by `-- up` / `-- down` marker lines. Applied
//! migrations are recorded in a `schema_migrations` ledger table, grouped
//! into numbered batches; each apply or rollback runs as a single
//! all-or-nothing transaction.
//!
//! File names are the only ordering mechanism: apply runs in byte-wise
//! ascending name order, rollback runs the most recent batch in descending
//! name order. Name files with a leading timestamp so lexicographic order
//! matches intended order.
//!
//! There is no cross-process coordination: two concurrent apply runs against
//! the same database can allocate the same batch number.
//!
//! # Example
//! ```no_run
//! use strata::{FileRepository, Runner};
//!
//! # async fn demo() -> Result<(), strata::MigrateError> {
//! let pool = strata::db::connect("postgres://localhost/app").await?;
//! let runner = Runner::new(FileRepository::new("migrations"));
//! runner.apply(&pool, |name| println!("Applied {name}")).await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod db;
pub mod error;
pub mod ledger;
pub mod repository;
pub mod runner;

pub use config::resolve_database_url;
pub use error::MigrateError;
pub use repository::{FileRepository, MigrationFile};
pub use runner::{ApplyOutcome, RollbackOutcome, Runner, StatusEntry};
