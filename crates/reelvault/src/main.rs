use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use log::{error, info, warn};

use reelvault::config::{find_config, load_config, Config};
use reelvault::coordinator::Coordinator;
use reelvault::db::Database;
use reelvault::error::{ConfigError, ReelvaultError};
use reelvault::watcher::DirectoryMonitor;
use reelvault::worker::ApprovalPool;

#[derive(Parser)]
#[command(name = "reelvault", version, about = "Media ingestion and archive daemon")]
struct Cli {
    /// Path to the config file. Defaults to the standard search paths.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Watch the download directory and register settled media files
    Watch,
    /// Approve pending entries and transfer them to the archive
    Approve {
        /// Entry ids to approve
        #[arg(required = true)]
        ids: Vec<i64>,
    },
    /// Reject a pending entry
    Reject {
        /// Entry id to reject
        id: i64,
    },
    /// List pending entries
    List,
    /// Show recently processed entries
    History {
        #[arg(long, default_value_t = 50)]
        limit: u32,
    },
    /// Show queue and history counters
    Stats,
    /// Create the database and apply migrations, then exit
    InitDb,
}

fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_ok() {
        // Route `log` records from the library into tracing.
        let _ = tracing_log::LogTracer::init();
    }
}

fn main() -> ExitCode {
    init_logging();
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), ReelvaultError> {
    let config_path = match cli.config {
        Some(path) => path,
        None => find_config()?,
    };
    info!("Using config {}", config_path.display());
    let config = load_config(&config_path)?;

    let db_path = config.database.resolved_path().ok_or_else(|| {
        ConfigError::Validation {
            message: "No database path configured and no home directory found".to_string(),
        }
    })?;
    let db = Database::open(&db_path).map_err(ReelvaultError::Database)?;

    match cli.command {
        Command::Watch => watch(&config, db),
        Command::Approve { ids } => approve(&config, db, ids),
        Command::Reject { id } => {
            let coordinator = Coordinator::new(&config, db)?;
            coordinator.recover_stale()?;
            coordinator.reject(id)?;
            println!("Rejected entry {}", id);
            Ok(())
        }
        Command::List => {
            let coordinator = Coordinator::new(&config, db)?;
            let rows = coordinator.list_pending()?;
            if rows.is_empty() {
                println!("No pending entries");
            }
            for row in rows {
                println!(
                    "{:>5}  {:<10}  {:>12}  {}  {}",
                    row.id,
                    row.status.to_string(),
                    row.file_size,
                    row.detected_at,
                    row.original_filename
                );
                if let Some(msg) = row.error_message {
                    println!("       last error: {}", msg);
                }
            }
            Ok(())
        }
        Command::History { limit } => {
            let coordinator = Coordinator::new(&config, db)?;
            for row in coordinator.list_processed(limit)? {
                println!(
                    "{:>5}  {:<8}  v{}  {}  {} -> {}",
                    row.id,
                    row.action.to_string(),
                    row.version_number,
                    row.processed_at,
                    row.original_filename,
                    row.final_filename.as_deref().unwrap_or("-")
                );
            }
            Ok(())
        }
        Command::Stats => {
            let coordinator = Coordinator::new(&config, db)?;
            let stats = coordinator.stats()?;
            match serde_json::to_string_pretty(&stats) {
                Ok(json) => println!("{}", json),
                Err(e) => error!("Could not serialize stats: {}", e),
            }
            Ok(())
        }
        Command::InitDb => {
            // Database::open already ran migrations.
            println!("Database ready at {}", db_path.display());
            Ok(())
        }
    }
}

fn watch(config: &Config, db: Database) -> Result<(), ReelvaultError> {
    let monitor = DirectoryMonitor::new(config.watcher.clone(), db)?;

    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&shutdown);
    if let Err(e) = ctrlc::set_handler(move || {
        info!("Received interrupt, shutting down");
        flag.store(true, Ordering::Relaxed);
    }) {
        warn!("Could not install interrupt handler: {}", e);
    }

    monitor.scan_existing();
    monitor.watch(shutdown)?;
    Ok(())
}

fn approve(config: &Config, db: Database, ids: Vec<i64>) -> Result<(), ReelvaultError> {
    let coordinator = Coordinator::new(config, db)?;
    coordinator.recover_stale()?;

    if ids.len() == 1 {
        let outcome = coordinator.approve(ids[0])?;
        println!(
            "Approved entry {}: {} ({} bytes, version {})",
            outcome.id, outcome.final_filename, outcome.bytes_copied, outcome.version_number
        );
        return Ok(());
    }

    let workers = config.transfer.workers.min(ids.len()).max(1);
    let pool = ApprovalPool::new(Arc::new(coordinator), workers);
    for id in &ids {
        if pool.submit(*id).is_err() {
            error!("Could not queue entry {}", id);
        }
    }

    let mut failures = 0;
    for _ in 0..ids.len() {
        match pool.recv_result() {
            Some(result) => match result.outcome {
                Ok(outcome) => println!(
                    "Approved entry {}: {} ({} bytes, version {})",
                    outcome.id,
                    outcome.final_filename,
                    outcome.bytes_copied,
                    outcome.version_number
                ),
                Err(e) => {
                    failures += 1;
                    error!("Entry {} failed: {}", result.id, e);
                }
            },
            None => break,
        }
    }

    pool.shutdown();
    pool.wait();

    if failures > 0 {
        return Err(ReelvaultError::Coordinator(
            reelvault::coordinator::CoordinatorError::Internal(format!(
                "{} of {} approvals failed",
                failures,
                ids.len()
            )),
        ));
    }
    Ok(())
}
