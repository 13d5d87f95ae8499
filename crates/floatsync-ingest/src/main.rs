//! Floatsync Ingest - archive to Postgres synchronisation tool

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use floatsync_common::logging::{init_logging, LogConfig, LogLevel};
use floatsync_common::EntityId;
use floatsync_ingest::config::IngestConfig;
use floatsync_ingest::extract::CommandExtractor;
use floatsync_ingest::http::build_client;
use floatsync_ingest::store::postgres::{create_pool, run_migrations};
use floatsync_ingest::store::{DbConfig, PgStore};
use floatsync_ingest::sync::EntitySync;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "floatsync-ingest")]
#[command(author, version, about = "Incremental float archive ingestion")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Ingestion worker count (overrides INGEST_WORKERS)
    #[arg(short, long, global = true)]
    workers: Option<usize>,

    /// Staging directory (overrides INGEST_DATA_DIR)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ingest new cycles for the given entities
    Sync {
        /// Entity ids, e.g. 4903220
        #[arg(short, long = "entity", required = true, num_args = 1..)]
        entities: Vec<EntityId>,
    },

    /// Ingest new cycles for every entity already in the database
    UpdateAll,

    /// Apply database migrations and exit
    Migrate,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    // Environment variables take precedence over the flag
    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("floatsync-ingest")
        .filter_directives("sqlx=warn,hyper=info,reqwest=info")
        .build()
        .overlay_env()?;

    let _guard = init_logging(&log_config)?;

    let mut config = IngestConfig::from_env().context("Invalid ingestion configuration")?;
    if let Some(workers) = cli.workers {
        config.pool.workers = workers;
    }
    if let Some(dir) = cli.data_dir {
        config.cache.data_dir = dir;
    }
    config.validate()?;

    let db_config = DbConfig::from_env()?;
    let pool = create_pool(&db_config).await?;
    run_migrations(&pool).await?;

    let entities = match cli.command {
        Command::Migrate => {
            info!("Migrations applied");
            return Ok(());
        },
        Command::Sync { entities } => Some(entities),
        Command::UpdateAll => None,
    };

    let extractor = config
        .extractor_cmd
        .as_deref()
        .and_then(CommandExtractor::from_command_line)
        .context("INGEST_EXTRACTOR_CMD must name the record extractor executable")?;

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received, finishing in-flight cycles");
                cancel.cancel();
            }
        });
    }

    let sync = EntitySync::from_config(
        &config,
        build_client(&config.http)?,
        Arc::new(extractor),
        Arc::new(PgStore::new(pool)),
        cancel,
    );

    info!(
        workers = config.pool.workers,
        data_dir = %config.cache.data_dir.display(),
        roots = config.archive.roots.len(),
        "Starting ingestion"
    );

    let report = match entities {
        Some(entities) => sync.sync_entities(&entities).await,
        None => sync.update_all().await?,
    };

    report.log();
    let cache = sync.cache().status().await;
    info!(
        cached_items = cache.items,
        cached_bytes = cache.size_bytes,
        negative_entries = cache.negative_entries,
        "Cache status"
    );

    info!("Ingestion complete");
    Ok(())
}
