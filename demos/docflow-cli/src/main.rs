//! Command-line driver for the docflow lifecycle.
//!
//! `sweep` seeds draft documents and lets both background sweepers push them
//! to APPROVED. `race` seeds one submitted document and runs the concurrency
//! harness against it, printing the result as JSON.
//!
//! Both commands use the in-memory stores unless `--database-url` is given.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use docflow_core::{
    BatchRequest, ConcurrencyHarness, DocumentStatus, DocumentStore, HarnessConfig, MemoryBackend,
    NewDocument, Sweeper, SweeperConfig, TransitionEngine,
};
use docflow_postgres::PgStore;
use sqlx::postgres::PgPoolOptions;
use tokio::sync::watch;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "docflow", about = "Document lifecycle sweeper and approval race runner")]
struct Args {
    /// PostgreSQL connection string. The in-memory stores are used when unset.
    #[arg(long, env = "DOCFLOW_DATABASE_URL", global = true)]
    database_url: Option<String>,

    /// Connection pool size for the PostgreSQL backend.
    #[arg(long, env = "DOCFLOW_MAX_CONNECTIONS", default_value_t = 20, global = true)]
    max_connections: u32,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Seed drafts and run the submit and approve sweepers.
    Sweep(SweepArgs),
    /// Race concurrent approvals of a single document.
    Race(RaceArgs),
}

#[derive(Parser, Debug)]
struct SweepArgs {
    /// Number of draft documents to create before the sweepers start.
    #[arg(long, env = "DOCFLOW_SEED", default_value_t = 250)]
    seed: usize,

    /// Seconds between sweep cycles.
    #[arg(long, env = "DOCFLOW_SWEEP_INTERVAL_SECS", default_value_t = 60)]
    interval_secs: u64,

    /// Documents per sweep page.
    #[arg(long, env = "DOCFLOW_SWEEP_BATCH_SIZE", default_value_t = 100)]
    batch_size: usize,

    /// How long to let the sweepers run before shutting down.
    #[arg(long, env = "DOCFLOW_RUN_SECS", default_value_t = 5)]
    run_secs: u64,
}

#[derive(Parser, Debug)]
struct RaceArgs {
    /// Maximum number of attempts in flight at once.
    #[arg(long, env = "DOCFLOW_THREADS", default_value_t = 10)]
    threads: usize,

    /// Total number of approval attempts.
    #[arg(long, env = "DOCFLOW_ATTEMPTS", default_value_t = 100)]
    attempts: usize,

    /// Initiator recorded on the winning approval.
    #[arg(long, env = "DOCFLOW_INITIATOR", default_value = "concurrency-test")]
    initiator: String,

    /// Upper bound on the wait for all attempts, in seconds.
    #[arg(long, env = "DOCFLOW_TIMEOUT_SECS", default_value_t = 30)]
    timeout_secs: u64,
}

/// The stores a command runs against.
struct Backend {
    engine: TransitionEngine,
    harness: ConcurrencyHarness,
}

impl Backend {
    async fn connect(args: &Args) -> anyhow::Result<Self> {
        match &args.database_url {
            Some(url) => {
                let pool = PgPoolOptions::new()
                    .max_connections(args.max_connections)
                    .connect(url)
                    .await
                    .context("failed to connect to postgres")?;
                let store = Arc::new(PgStore::new(pool));
                store.migrate().await.context("failed to apply schema")?;
                info!("using postgres backend");
                Ok(Self {
                    engine: store.engine(),
                    harness: store.harness(),
                })
            }
            None => {
                let backend = MemoryBackend::new();
                info!("using in-memory backend");
                Ok(Self {
                    engine: backend.engine(),
                    harness: backend.harness(),
                })
            }
        }
    }

    fn documents(&self) -> &Arc<dyn DocumentStore> {
        self.engine.documents()
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();
    let backend = Backend::connect(&args).await?;

    match &args.cmd {
        Command::Sweep(sweep) => run_sweep(&backend, sweep).await,
        Command::Race(race) => run_race(&backend, race).await,
    }
}

async fn run_sweep(backend: &Backend, args: &SweepArgs) -> anyhow::Result<()> {
    for i in 0..args.seed {
        backend
            .documents()
            .create(NewDocument::new("docflow-cli", format!("seeded document {i}")))
            .await
            .context("failed to seed document")?;
    }
    info!(seeded = args.seed, "seeded draft documents");

    let config = SweeperConfig {
        interval: Duration::from_secs(args.interval_secs),
        batch_size: args.batch_size,
    };
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let submitter =
        Sweeper::submitter(backend.engine.clone(), config.clone()).spawn(shutdown_rx.clone());
    let approver = Sweeper::approver(backend.engine.clone(), config).spawn(shutdown_rx);

    tokio::select! {
        _ = tokio::time::sleep(Duration::from_secs(args.run_secs)) => {}
        _ = tokio::signal::ctrl_c() => info!("interrupted"),
    }
    shutdown_tx.send(true).context("sweepers already stopped")?;
    submitter.await.context("submit sweeper panicked")?;
    approver.await.context("approve sweeper panicked")?;

    let mut counts = serde_json::Map::new();
    for status in DocumentStatus::ALL {
        let count = backend.documents().count_by_status(status).await?;
        counts.insert(status.as_str().to_string(), count.into());
    }
    println!("{}", serde_json::to_string_pretty(&counts)?);
    Ok(())
}

async fn run_race(backend: &Backend, args: &RaceArgs) -> anyhow::Result<()> {
    let document = backend
        .documents()
        .create(NewDocument::new("docflow-cli", "race target"))
        .await?;
    let submitted = backend
        .engine
        .submit(&BatchRequest::new([document.id], "docflow-cli"))
        .await?;
    anyhow::ensure!(
        submitted.iter().all(|r| r.is_success()),
        "failed to submit race target: {submitted:?}"
    );

    let config = HarnessConfig::new(args.threads, args.attempts)
        .with_initiator(args.initiator.clone())
        .with_timeout(Duration::from_secs(args.timeout_secs));
    let result = backend.harness.run(document.id, &config).await?;

    println!("{}", serde_json::to_string_pretty(&result)?);
    if !result.is_linearizable() {
        anyhow::bail!("approval race produced {} winners", result.successful_attempts);
    }
    Ok(())
}
