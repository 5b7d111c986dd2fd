//! ferry: migrate a Slack file archive into a destination folder tree.
//!
//! Configuration comes from the environment (and `.env`); see `ferry_core::Config`.

use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use ferry_api::{router, serve, shutdown_signal, AppState};
use ferry_core::{Config, MigrationReport};
use ferry_db::StateStore;
use ferry_infra::init_telemetry;
use ferry_plugins::create_annotator;
use ferry_source::{SlackArchive, SourceArchive};
use ferry_storage::create_destination;
use ferry_worker::{
    spawn_claim_reaper, AdmissionPolicy, IntakeQueue, Orchestrator, Pipeline, PipelineSettings,
    Staging,
};

#[derive(Parser)]
#[command(name = "ferry", about = "Slack archive media migration")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Which paths to run
    #[arg(long, value_enum, default_value_t = Mode::Migrate)]
    mode: Mode,

    /// Listing page size (overrides MIGRATION_BATCH_SIZE)
    #[arg(long)]
    batch_size: Option<usize>,

    /// Batch pipelines in flight (overrides MAX_CONCURRENT_DOWNLOADS)
    #[arg(long)]
    max_concurrent: Option<usize>,
}

#[derive(Subcommand)]
enum Commands {
    /// Print record counts per status and the most recent failures
    Status {
        /// Maximum number of failures to list
        #[arg(long, default_value = "20")]
        limit: i64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// Page through the whole archive once
    Migrate,
    /// Serve the notification endpoint until interrupted
    Realtime,
    /// Run a batch migration while serving notifications
    Both,
}

impl Mode {
    fn runs_batch(self) -> bool {
        matches!(self, Mode::Migrate | Mode::Both)
    }

    fn runs_realtime(self) -> bool {
        matches!(self, Mode::Realtime | Mode::Both)
    }
}

struct Realtime {
    server: JoinHandle<anyhow::Result<()>>,
    dispatcher: JoinHandle<MigrationReport>,
}

fn print_json(value: &impl Serialize) -> anyhow::Result<()> {
    let out = serde_json::to_string_pretty(value).context("Serialize output")?;
    println!("{}", out);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = Config::from_env().context("Failed to load configuration")?;
    config.migration = config
        .migration
        .with_overrides(cli.batch_size, cli.max_concurrent);
    config.validate().context("Invalid configuration")?;

    init_telemetry(config.log_format, &config.environment)
        .map_err(|e| anyhow::anyhow!("Failed to initialize telemetry: {}", e))?;

    let store = StateStore::open(&config.database_path, config.database_max_connections)
        .await
        .context("Failed to open state store")?;

    match cli.command {
        Some(Commands::Status { limit }) => print_status(&store, limit).await,
        None => run(cli.mode, config, store).await,
    }
}

async fn print_status(store: &StateStore, limit: i64) -> anyhow::Result<()> {
    let stats = store.records().stats().await?;
    let failures = store.records().failures(limit).await?;
    print_json(&json!({ "stats": stats, "failures": failures }))
}

async fn run(mode: Mode, config: Config, store: StateStore) -> anyhow::Result<()> {
    tracing::info!(
        mode = ?mode,
        batch_size = config.migration.batch_size,
        max_concurrent = config.migration.max_concurrent,
        environment = %config.environment,
        "Starting ferry"
    );

    // Nothing of this process holds a claim or a staging file yet
    let released = store.records().release_stale_claims().await?;
    if released > 0 {
        tracing::info!(released, "Released claims left by a previous process");
    }
    let staging = Staging::new(config.scratch_dir.clone());
    staging
        .purge_stale()
        .await
        .context("Failed to clean scratch directory")?;

    let source: Arc<dyn SourceArchive> = Arc::new(SlackArchive::new(&config.slack)?);
    let destination = create_destination(&config.destination)
        .await
        .context("Failed to initialize destination")?;
    let annotator = create_annotator(&config.annotator)?;

    let pipeline = Pipeline::new(
        store.clone(),
        source.clone(),
        destination,
        annotator,
        staging,
        PipelineSettings::from_config(&config),
    );
    let admission = AdmissionPolicy::from_config(&config.migration);

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            shutdown_signal().await;
            shutdown.cancel();
        }
    });

    let reaper = spawn_claim_reaper(
        store.clone(),
        config.migration.stale_claim_reap_interval,
        shutdown.clone(),
    );

    let realtime = if mode.runs_realtime() {
        Some(
            start_realtime(
                &config,
                pipeline.clone(),
                store.clone(),
                admission.clone(),
                shutdown.clone(),
            )
            .await?,
        )
    } else {
        None
    };

    let batch = if mode.runs_batch() {
        let orchestrator =
            Orchestrator::new(pipeline, store.clone(), source, admission, &config.migration);
        Some(
            orchestrator
                .run_migration(
                    config.migration.batch_size,
                    config.migration.max_concurrent,
                    &shutdown,
                )
                .await,
        )
    } else {
        None
    };

    // The realtime path keeps serving after a successful batch run until interrupted
    if realtime.is_none() || matches!(batch, Some(Err(_))) {
        shutdown.cancel();
    }

    let realtime_report = match realtime {
        Some(realtime) => Some(finish_realtime(realtime).await?),
        None => None,
    };
    if let Some(reaper) = reaper {
        if let Err(e) = reaper.await {
            tracing::warn!(error = %e, "Stale claim reaper task failed");
        }
    }

    let batch_report = batch.transpose()?;

    print_json(&json!({ "batch": batch_report, "realtime": realtime_report }))
}

async fn start_realtime(
    config: &Config,
    pipeline: Pipeline,
    store: StateStore,
    admission: AdmissionPolicy,
    shutdown: CancellationToken,
) -> anyhow::Result<Realtime> {
    let secret = config.realtime.require_secret()?;

    let addr = config.realtime.bind_address();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind realtime endpoint to {}", addr))?;

    let (intake, dispatcher) = IntakeQueue::start(
        pipeline,
        store,
        admission,
        config.realtime.max_concurrent,
        config.realtime.queue_capacity,
        shutdown.clone(),
    );
    let state = AppState::new(intake, secret, config.realtime.signature_tolerance);
    let app = router(state, &config.realtime.endpoint);

    tracing::info!(
        endpoint = %config.realtime.endpoint,
        max_concurrent = config.realtime.max_concurrent,
        queue_capacity = config.realtime.queue_capacity,
        "Realtime intake enabled"
    );
    let server = tokio::spawn(serve(listener, app, shutdown));

    Ok(Realtime { server, dispatcher })
}

async fn finish_realtime(realtime: Realtime) -> anyhow::Result<MigrationReport> {
    realtime
        .server
        .await
        .context("Realtime server task failed")??;
    let report = realtime
        .dispatcher
        .await
        .context("Realtime dispatcher task failed")?;

    tracing::info!(
        completed = report.completed,
        failed = report.failed,
        interrupted = report.interrupted,
        "Realtime intake finished"
    );
    Ok(report)
}
