//! End-to-end migration flows against a live PostgreSQL server.
//!
//! These cover the properties that need a real database: batch atomicity,
//! rollback ordering, and ledger round trips. They are ignored by default
//! because they need a server; point `STRATA_TEST_DATABASE_URL` at a
//! scratch database and run
//!
//!     cargo test -- --ignored
//!
//! The suite shares one ledger table, so tests serialize on a lock.

use std::collections::HashSet;

use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use tempfile::TempDir;
use tokio::sync::Mutex;

use strata::error::MigrateError;
use strata::repository::FileRepository;
use strata::runner::{ApplyOutcome, RollbackOutcome, Runner};

static DB_LOCK: Mutex<()> = Mutex::const_new(());

fn test_url() -> String {
    std::env::var("STRATA_TEST_DATABASE_URL")
        .expect("set STRATA_TEST_DATABASE_URL to run the live-database tests")
}

async fn connect() -> PgPool {
    PgPoolOptions::new()
        .max_connections(2)
        .connect(&test_url())
        .await
        .expect("connect to the test database")
}

/// Drop the ledger and every table the fixtures create.
async fn reset(pool: &PgPool) {
    sqlx::raw_sql(
        "DROP TABLE IF EXISTS schema_migrations;
         DROP TABLE IF EXISTS strata_a;
         DROP TABLE IF EXISTS strata_b;
         DROP TABLE IF EXISTS strata_c;",
    )
    .execute(pool)
    .await
    .unwrap();
}

fn write_migration(dir: &TempDir, name: &str, up: &str, down: &str) {
    let content = format!("-- up\n{up}\n-- down\n{down}\n");
    std::fs::write(dir.path().join(name), content).unwrap();
}

async fn ledger_rows(pool: &PgPool) -> Vec<(String, i32)> {
    sqlx::query("SELECT name, batch FROM schema_migrations ORDER BY name")
        .fetch_all(pool)
        .await
        .unwrap()
        .into_iter()
        .map(|row| (row.get("name"), row.get("batch")))
        .collect()
}

fn two_file_dir() -> TempDir {
    let dir = TempDir::new().unwrap();
    write_migration(
        &dir,
        "20240101_a.sql",
        "CREATE TABLE strata_a (id INT);",
        "DROP TABLE strata_a;",
    );
    write_migration(
        &dir,
        "20240102_b.sql",
        "CREATE TABLE strata_b (id INT);",
        "DROP TABLE strata_b;",
    );
    dir
}

#[tokio::test]
#[ignore = "needs a running PostgreSQL server"]
async fn apply_is_idempotent_and_batches_are_monotonic() {
    let _guard = DB_LOCK.lock().await;
    let pool = connect().await;
    reset(&pool).await;

    let dir = two_file_dir();
    let runner = Runner::new(FileRepository::new(dir.path()));

    let mut seen = Vec::new();
    let outcome = runner.apply(&pool, |name| seen.push(name.to_string())).await.unwrap();
    assert_eq!(
        outcome,
        ApplyOutcome::Applied {
            names: vec!["20240101_a.sql".into(), "20240102_b.sql".into()],
            batch: 1,
        }
    );
    assert_eq!(seen, vec!["20240101_a.sql", "20240102_b.sql"]);

    // Second run: nothing pending, no new batch allocated.
    let outcome = runner.apply(&pool, |_| {}).await.unwrap();
    assert_eq!(outcome, ApplyOutcome::NothingPending);

    // A third file lands in batch 2, not 3.
    write_migration(
        &dir,
        "20240103_c.sql",
        "CREATE TABLE strata_c (id INT);",
        "DROP TABLE strata_c;",
    );
    let outcome = runner.apply(&pool, |_| {}).await.unwrap();
    assert_eq!(
        outcome,
        ApplyOutcome::Applied {
            names: vec!["20240103_c.sql".into()],
            batch: 2,
        }
    );

    reset(&pool).await;
}

#[tokio::test]
#[ignore = "needs a running PostgreSQL server"]
async fn apply_then_rollback_round_trips() {
    let _guard = DB_LOCK.lock().await;
    let pool = connect().await;
    reset(&pool).await;

    let dir = two_file_dir();
    let runner = Runner::new(FileRepository::new(dir.path()));

    runner.apply(&pool, |_| {}).await.unwrap();
    assert_eq!(
        ledger_rows(&pool).await,
        vec![
            ("20240101_a.sql".to_string(), 1),
            ("20240102_b.sql".to_string(), 1),
        ]
    );

    let mut seen = Vec::new();
    let outcome = runner
        .rollback(&pool, |name| seen.push(name.to_string()))
        .await
        .unwrap();
    assert_eq!(
        outcome,
        RollbackOutcome::RolledBack {
            names: vec!["20240102_b.sql".into(), "20240101_a.sql".into()],
            batch: 1,
        }
    );
    // Reverse name order: b before a.
    assert_eq!(seen, vec!["20240102_b.sql", "20240101_a.sql"]);

    // Ledger is back to its pre-apply state.
    assert!(ledger_rows(&pool).await.is_empty());

    // And there is nothing left to roll back.
    let outcome = runner.rollback(&pool, |_| {}).await.unwrap();
    assert_eq!(outcome, RollbackOutcome::NothingToRollback);

    reset(&pool).await;
}

#[tokio::test]
#[ignore = "needs a running PostgreSQL server"]
async fn failed_batch_leaves_no_trace() {
    let _guard = DB_LOCK.lock().await;
    let pool = connect().await;
    reset(&pool).await;

    let dir = TempDir::new().unwrap();
    write_migration(
        &dir,
        "20240101_a.sql",
        "CREATE TABLE strata_a (id INT);",
        "DROP TABLE strata_a;",
    );
    write_migration(
        &dir,
        "20240102_b.sql",
        "SELECT * FROM table_that_does_not_exist;",
        "SELECT 1;",
    );
    write_migration(
        &dir,
        "20240103_c.sql",
        "CREATE TABLE strata_c (id INT);",
        "DROP TABLE strata_c;",
    );

    let runner = Runner::new(FileRepository::new(dir.path()));
    let mut seen = Vec::new();
    let err = runner
        .apply(&pool, |name| seen.push(name.to_string()))
        .await
        .unwrap_err();
    match err {
        MigrateError::Apply { name, .. } => assert_eq!(name, "20240102_b.sql"),
        other => panic!("unexpected error: {other}"),
    }

    // A ran before the failure, C never ran; none of it persisted.
    assert_eq!(seen, vec!["20240101_a.sql"]);
    assert!(ledger_rows(&pool).await.is_empty());
    let exists: bool = sqlx::query_scalar(
        "SELECT EXISTS (SELECT 1 FROM information_schema.tables WHERE table_name = 'strata_a')",
    )
    .fetch_one(&pool)
    .await
    .unwrap();
    assert!(!exists, "strata_a must not survive the aborted batch");

    reset(&pool).await;
}

#[tokio::test]
#[ignore = "needs a running PostgreSQL server"]
async fn status_reflects_the_ledger_in_file_order() {
    let _guard = DB_LOCK.lock().await;
    let pool = connect().await;
    reset(&pool).await;

    let dir = two_file_dir();
    let runner = Runner::new(FileRepository::new(dir.path()));

    // Nothing applied yet.
    let entries = runner.status(&pool).await.unwrap();
    assert_eq!(entries.len(), 2);
    assert!(entries.iter().all(|e| !e.applied));

    runner.apply(&pool, |_| {}).await.unwrap();
    write_migration(
        &dir,
        "20240103_c.sql",
        "CREATE TABLE strata_c (id INT);",
        "DROP TABLE strata_c;",
    );

    let entries = runner.status(&pool).await.unwrap();
    let report: Vec<(String, bool)> = entries
        .into_iter()
        .map(|e| (e.name, e.applied))
        .collect();
    assert_eq!(
        report,
        vec![
            ("20240101_a.sql".to_string(), true),
            ("20240102_b.sql".to_string(), true),
            ("20240103_c.sql".to_string(), false),
        ]
    );

    reset(&pool).await;
}

#[tokio::test]
#[ignore = "needs a running PostgreSQL server"]
async fn rollback_refuses_when_a_file_has_vanished() {
    let _guard = DB_LOCK.lock().await;
    let pool = connect().await;
    reset(&pool).await;

    let dir = two_file_dir();
    let runner = Runner::new(FileRepository::new(dir.path()));
    runner.apply(&pool, |_| {}).await.unwrap();

    std::fs::remove_file(dir.path().join("20240102_b.sql")).unwrap();

    let err = runner.rollback(&pool, |_| {}).await.unwrap_err();
    match err {
        MigrateError::MissingFile(name) => assert_eq!(name, "20240102_b.sql"),
        other => panic!("unexpected error: {other}"),
    }

    // Refused before the transaction: the whole batch is still applied.
    let names: HashSet<String> = ledger_rows(&pool).await.into_iter().map(|(n, _)| n).collect();
    assert_eq!(names.len(), 2);

    // The table from the still-present migration also survived.
    let exists: bool = sqlx::query_scalar(
        "SELECT EXISTS (SELECT 1 FROM information_schema.tables WHERE table_name = 'strata_b')",
    )
    .fetch_one(&pool)
    .await
    .unwrap();
    assert!(exists);

    reset(&pool).await;
}

#[tokio::test]
#[ignore = "needs a running PostgreSQL server"]
async fn empty_down_aborts_the_whole_rollback() {
    let _guard = DB_LOCK.lock().await;
    let pool = connect().await;
    reset(&pool).await;

    let dir = TempDir::new().unwrap();
    write_migration(
        &dir,
        "20240101_a.sql",
        "CREATE TABLE strata_a (id INT);",
        "DROP TABLE strata_a;",
    );
    // No down section at all.
    std::fs::write(
        dir.path().join("20240102_b.sql"),
        "CREATE TABLE strata_b (id INT);\n",
    )
    .unwrap();

    let runner = Runner::new(FileRepository::new(dir.path()));
    runner.apply(&pool, |_| {}).await.unwrap();

    let err = runner.rollback(&pool, |_| {}).await.unwrap_err();
    match err {
        MigrateError::EmptyDown(name) => assert_eq!(name, "20240102_b.sql"),
        other => panic!("unexpected error: {other}"),
    }
    // No entries were removed.
    assert_eq!(ledger_rows(&pool).await.len(), 2);

    reset(&pool).await;
}
