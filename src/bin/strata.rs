//! strata command-line interface.
//!
//! Thin glue around the library: argument parsing, connection setup, and
//! printing. All reporting happens here; the engine only returns values.

use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use tracing_subscriber::EnvFilter;

use strata::config::resolve_database_url;
use strata::db;
use strata::repository::FileRepository;
use strata::runner::{ApplyOutcome, RollbackOutcome, Runner};

/// Skeleton written by `migrate:make`.
const MIGRATION_STUB: &str = "-- up\n\n\n-- down\n\n";

#[derive(Parser)]
#[command(
    name = "strata",
    version,
    about = "Batch-based SQL schema migrations for PostgreSQL"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Apply all pending migrations
    #[command(name = "migrate")]
    Migrate(MigrateArgs),

    /// Roll back the most recent migration batch
    #[command(name = "migrate:rollback")]
    Rollback(MigrateArgs),

    /// Show which migrations are applied and which are pending
    #[command(name = "migrate:status")]
    Status {
        #[command(flatten)]
        args: MigrateArgs,

        /// Emit the report as JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Create a new timestamped migration file
    #[command(name = "migrate:make")]
    Make {
        /// Migration name, e.g. create_users_table
        name: String,

        /// Migrations directory
        #[arg(long, env = "STRATA_MIGRATIONS_DIR", default_value = "migrations")]
        dir: PathBuf,

        /// Overwrite the file if it exists
        #[arg(short, long)]
        force: bool,
    },
}

#[derive(Args)]
struct MigrateArgs {
    /// Migrations directory
    #[arg(long, env = "STRATA_MIGRATIONS_DIR", default_value = "migrations")]
    dir: PathBuf,

    /// Database URL (overrides env DATABASE_URL)
    #[arg(long)]
    database_url: Option<String>,
}

#[tokio::main]
async fn main() {
    // .env first so both DATABASE_URL and RUST_LOG can live there.
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    if let Err(err) = run().await {
        eprintln!("{} {err}", "error:".red().bold());
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Migrate(args) => migrate(args).await,
        Command::Rollback(args) => rollback(args).await,
        Command::Status { args, json } => status(args, json).await,
        Command::Make { name, dir, force } => make(&name, &dir, force),
    }
}

async fn migrate(args: MigrateArgs) -> Result<()> {
    let url = resolve_database_url(args.database_url.as_deref())?;
    let pool = db::connect(&url).await?;
    let runner = Runner::new(FileRepository::new(&args.dir));

    let result = runner
        .apply(&pool, |name| {
            println!("{} {name}", "Applied".green());
        })
        .await;
    pool.close().await;

    match result? {
        ApplyOutcome::NothingPending => println!("No pending migrations."),
        ApplyOutcome::Applied { names, batch } => {
            println!(
                "{}",
                format!("Applied {} migrations in batch {}", names.len(), batch)
                    .green()
                    .bold()
            );
        }
    }
    Ok(())
}

async fn rollback(args: MigrateArgs) -> Result<()> {
    let url = resolve_database_url(args.database_url.as_deref())?;
    let pool = db::connect(&url).await?;
    let runner = Runner::new(FileRepository::new(&args.dir));

    let result = runner
        .rollback(&pool, |name| {
            println!("{} {name}", "Rolled back".yellow());
        })
        .await;
    pool.close().await;

    match result? {
        RollbackOutcome::NothingToRollback => println!("Nothing to rollback."),
        RollbackOutcome::RolledBack { names, batch } => {
            println!(
                "{}",
                format!("Rolled back {} migrations from batch {}", names.len(), batch)
                    .yellow()
                    .bold()
            );
        }
    }
    Ok(())
}

async fn status(args: MigrateArgs, json: bool) -> Result<()> {
    let url = resolve_database_url(args.database_url.as_deref())?;
    let pool = db::connect(&url).await?;
    let runner = Runner::new(FileRepository::new(&args.dir));

    let result = runner.status(&pool).await;
    pool.close().await;
    let entries = result?;

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }
    if entries.is_empty() {
        println!("No migration files found.");
        return Ok(());
    }
    println!("Name\tStatus");
    for entry in &entries {
        let status = if entry.applied {
            entry.status().green()
        } else {
            entry.status().yellow()
        };
        println!("{}\t{status}", entry.name);
    }
    Ok(())
}

fn make(name: &str, dir: &Path, force: bool) -> Result<()> {
    let name = name.trim();
    if name.is_empty() {
        anyhow::bail!("migration name is required");
    }

    let timestamp = chrono::Utc::now().format("%Y%m%d%H%M%S");
    let filename = format!("{timestamp}_{}.sql", to_snake(name));
    let path = dir.join(&filename);
    if !force && path.exists() {
        anyhow::bail!("file exists: {} (use --force to overwrite)", path.display());
    }

    std::fs::create_dir_all(dir)?;
    std::fs::write(&path, MIGRATION_STUB)?;
    println!("{} {}", "Created".green(), path.display());
    Ok(())
}

/// Convert CamelCase or space/hyphen separated names to snake_case.
fn to_snake(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut prev_lower = false;
    for ch in s.chars() {
        if ch.is_ascii_uppercase() {
            if prev_lower {
                out.push('_');
            }
            out.push(ch.to_ascii_lowercase());
            prev_lower = false;
        } else if ch == ' ' || ch == '-' {
            out.push('_');
            prev_lower = false;
        } else {
            prev_lower = ch.is_ascii_lowercase() || ch.is_ascii_digit();
            out.push(ch);
        }
    }
    out
}
