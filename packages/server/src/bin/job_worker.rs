//! Background job worker
//!
//! Polls the job store and runs mail and image jobs until Ctrl+C.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dispatcher_core::domains::build_job_registry;
use dispatcher_core::kernel::jobs::{
    InMemoryJobStore, JobStore, JobWorker, JobWorkerConfig, PostgresJobStore,
};
use dispatcher_core::kernel::ServerDeps;
use dispatcher_core::Config;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "job_worker")]
#[command(about = "Background job worker for mail and image jobs")]
struct Cli {
    /// Worker ID written to claimed jobs (defaults to a random one)
    #[arg(long, env = "JOBS_WORKER_ID")]
    worker_id: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the worker (default)
    Run,

    /// Apply database migrations and exit
    Migrate,

    /// Delete completed and failed jobs older than the given number of days
    Purge {
        #[arg(long, default_value_t = 30)]
        older_than_days: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,dispatcher_core=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    // Load configuration
    let config = Config::from_env().context("Failed to load configuration")?;
    tracing::info!("Configuration loaded");

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run(config, cli.worker_id).await,
        Commands::Migrate => {
            let store = connect(&config).await?;
            tracing::info!("Running database migrations...");
            store.migrate().await.context("Failed to run migrations")?;
            tracing::info!("Migrations complete");
            Ok(())
        }
        Commands::Purge { older_than_days } => {
            let store = connect(&config).await?;
            let cutoff = chrono::Utc::now() - chrono::Duration::days(older_than_days);
            let deleted = store
                .purge_finished(cutoff)
                .await
                .context("Failed to purge finished jobs")?;
            tracing::info!(deleted, %cutoff, "Purged finished jobs");
            Ok(())
        }
    }
}

async fn connect(config: &Config) -> Result<PostgresJobStore> {
    let database_url = config
        .database_url
        .as_deref()
        .context("DATABASE_URL must be set")?;

    tracing::info!("Connecting to database...");
    let store = PostgresJobStore::connect(database_url, 10)
        .await
        .context("Failed to connect to database")?;
    tracing::info!("Database connected");
    Ok(store)
}

async fn run(config: Config, worker_id: Option<String>) -> Result<()> {
    let store: Arc<dyn JobStore> = match &config.database_url {
        Some(_) => {
            let store = connect(&config).await?;
            store.migrate().await.context("Failed to run migrations")?;
            Arc::new(store)
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using in-memory job store (jobs are lost on exit)");
            Arc::new(InMemoryJobStore::new())
        }
    };

    let registry = build_job_registry(&config.jobs).context("Failed to build job registry")?;
    let deps = Arc::new(ServerDeps::from_config(&config)?);

    let mut worker_config = match worker_id {
        Some(id) => JobWorkerConfig::with_worker_id(id),
        None => JobWorkerConfig::default(),
    };
    worker_config.batch_size = config.jobs.batch_size;
    worker_config.poll_interval = config.jobs.poll_interval;
    worker_config.max_concurrency = config.jobs.max_concurrency;

    let worker = JobWorker::new(store, Arc::new(registry), deps, worker_config);
    worker.run_until_shutdown().await?;

    Ok(())
}
