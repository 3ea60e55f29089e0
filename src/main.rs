//! Intake admin tool
//!
//! Operates on the local record database and object buckets of an
//! intake-store deployment.
//!
//! ## Usage
//!
//! ```bash
//! # Show what a submitter has staged
//! intake-admin list-staged "Hospital A" academic
//!
//! # Commit everything staged in a category (Ctrl-C stops between records)
//! intake-admin commit "Hospital A" academic
//!
//! # Discard staged records
//! intake-admin clear-staged "Hospital A" award
//!
//! # Per-category counts for a submitter
//! intake-admin overview "Hospital A"
//!
//! # Summary document versions, newest first
//! intake-admin documents "Hospital A"
//!
//! # Row counts and stored object totals
//! intake-admin --storage-dir /data/intake stats
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use intake_store::services::events::spawn_logging_listener;
use intake_store::{Category, Config, FsObjectStore, RecordDb, ServiceSettings, Services, Submitter};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "intake-admin")]
#[command(about = "Administer staged and committed intake records")]
struct Args {
    /// Path to config file
    #[arg(short, long, env = "INTAKE_CONFIG")]
    config: Option<PathBuf>,

    /// Storage directory
    #[arg(long, env = "INTAKE_STORAGE_DIR")]
    storage_dir: Option<PathBuf>,

    /// Base URL for public object references
    #[arg(long)]
    public_base_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List staged records of a submitter
    ListStaged { submitter: String, category: Category },
    /// Commit all staged records of a submitter in a category
    Commit { submitter: String, category: Category },
    /// Discard all staged records of a submitter in a category
    ClearStaged { submitter: String, category: Category },
    /// Committed and staged counts per category
    Overview { submitter: String },
    /// Summary document versions
    Documents { submitter: String },
    /// Database and object store statistics
    Stats,
}

#[derive(Serialize)]
struct Stats {
    records: intake_store::db::DbStats,
    objects: intake_store::object_store::ObjectStoreStats,
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::from_default_env().add_directive("intake_store=info".parse()?))
        .init();

    let args = Args::parse();

    // Load config
    let mut config = match &args.config {
        Some(path) => Config::load(path).with_context(|| format!("loading {}", path.display()))?,
        None => Config::default(),
    };

    // Apply CLI overrides
    if let Some(dir) = args.storage_dir {
        config.storage_dir = dir;
    }
    if let Some(url) = args.public_base_url {
        config.public_base_url = url;
    }

    tokio::fs::create_dir_all(&config.storage_dir).await?;

    // Save default config if it doesn't exist
    let config_path = config.config_path();
    if !config_path.exists() {
        config.save(&config_path)?;
        info!(path = %config_path.display(), "Created default config");
    }

    let db = Arc::new(RecordDb::open(&config.records_db_path())?);
    let objects = Arc::new(FsObjectStore::new(config.objects_dir(), &config.public_base_url).await?);
    let services = Services::new(db.clone(), objects.clone(), ServiceSettings::from(&config));
    let _listener = spawn_logging_listener(services.events.clone());

    match args.command {
        Command::ListStaged { submitter, category } => {
            let submitter = Submitter::new(submitter)?;
            let staged = services.staging.list_staged(&submitter, category).await?;
            for record in &staged {
                println!(
                    "{}\t{}\t{} attachment(s)\t{}",
                    record.id,
                    record.staged_at.format("%Y-%m-%d %H:%M:%S"),
                    record.attachments.len(),
                    record.title()
                );
            }
        }
        Command::Commit { submitter, category } => {
            let submitter = Submitter::new(submitter)?;
            let (cancel_tx, cancel_rx) = watch::channel(false);

            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Interrupt received, stopping after the current record");
                    let _ = cancel_tx.send(true);
                }
            });

            let report = services
                .cancellable_commit(cancel_rx)
                .commit(&submitter, category)
                .await?;

            let (committed, total) = report.counts();
            println!("{} of {} record(s) committed", committed, total);
            for outcome in report.failed() {
                println!(
                    "  left staged: {} {} ({})",
                    outcome.staged_id,
                    outcome.title,
                    outcome.error.as_deref().unwrap_or_default()
                );
            }
            if report.cancelled {
                println!(
                    "  not attempted after interrupt: {} record(s)",
                    report.not_attempted()
                );
            }
            for outcome in report.duplicated() {
                println!("  still staged after commit: {} {}", outcome.staged_id, outcome.title);
            }
        }
        Command::ClearStaged { submitter, category } => {
            let submitter = Submitter::new(submitter)?;
            let removed = services.staging.clear_staged(&submitter, category).await?;
            println!("Removed {} staged record(s)", removed);
        }
        Command::Overview { submitter } => {
            let submitter = Submitter::new(submitter)?;
            print_json(&services.records.overview(&submitter).await?)?;
        }
        Command::Documents { submitter } => {
            let submitter = Submitter::new(submitter)?;
            print_json(&services.documents.list_versions(&submitter).await?)?;
        }
        Command::Stats => {
            print_json(&Stats {
                records: db.stats()?,
                objects: objects.stats().await?,
            })?;
        }
    }

    Ok(())
}
