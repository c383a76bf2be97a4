//! # devsync launcher
//!
//! Loads configuration, prepares the store and either runs a single pass
//! over every enabled entity kind (`--once`) or schedules them until Ctrl-C.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use devsync::cache::DiskCache;
use devsync::config::{AppConfig, ConfigLoader};
use devsync::entities::{ConfiguredEntityLister, EntityKind};
use devsync::orchestrator::SyncOrchestrator;
use devsync::paginator::ChunkedPaginator;
use devsync::repositories::{SyncCursorRepository, SyncedRecordRepository};
use devsync::scheduler::SyncScheduler;
use devsync::transport::RateLimitedTransport;
use devsync::{db, telemetry};

#[derive(Debug, Parser)]
#[command(name = "devsync", version, about = "Incremental sync of paginated upstream collections")]
struct Cli {
    /// Run one pass over every enabled kind and exit
    #[arg(long)]
    once: bool,

    /// Restrict to these entity kinds (repeatable)
    #[arg(long = "kind", value_parser = parse_kind)]
    kinds: Vec<EntityKind>,

    /// Directory holding the layered `.env` files
    #[arg(long)]
    config_dir: Option<PathBuf>,
}

fn parse_kind(value: &str) -> Result<EntityKind, String> {
    value.parse()
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let loader = match &cli.config_dir {
        Some(dir) => ConfigLoader::with_base_dir(dir.clone()),
        None => ConfigLoader::new(),
    };
    let config = loader.load().context("Failed to load configuration")?;
    telemetry::init_tracing(&config)?;

    info!(profile = %config.profile, "Loaded configuration");
    if let Ok(redacted) = config.redacted_json() {
        debug!(config = %redacted, "Effective configuration");
    }

    let scheduler = build_scheduler(&config, &cli.kinds).await?;

    if cli.once {
        let reports = scheduler.run_once().await;
        let failed: usize = reports.iter().map(|(_, report)| report.failed).sum();
        for (kind, report) in &reports {
            info!(kind = kind.as_str(), %report, "Pass complete");
        }
        if failed > 0 {
            error!(failed, "Some entities failed to sync");
            std::process::exit(1);
        }
        return Ok(());
    }

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "Failed to listen for shutdown signal");
            return;
        }
        info!("Shutdown signal received");
        signal_token.cancel();
    });

    scheduler.run(shutdown).await;
    Ok(())
}

async fn build_scheduler(config: &AppConfig, kinds: &[EntityKind]) -> Result<SyncScheduler> {
    let conn = db::init_pool(config).await?;
    db::migrate(&conn).await?;

    let connections = config.connections()?;
    let transport = RateLimitedTransport::new(config.transport.settings())?;
    let cache = DiskCache::new(&config.sync.cache_dir);
    let paginator = ChunkedPaginator::new(
        transport,
        cache,
        config.sync.paginator_settings(&config.transport),
    );

    let orchestrator = SyncOrchestrator::new(
        paginator,
        Arc::new(SyncCursorRepository::new(conn.clone())),
        Arc::new(SyncedRecordRepository::new(conn)),
        config.adaptive_schedule()?,
        connections.clone(),
        config.sync.sync_settings()?,
    );

    let jobs = config
        .job_specs()
        .into_iter()
        .filter(|job| kinds.is_empty() || kinds.contains(&job.kind))
        .collect::<Vec<_>>();
    info!(
        jobs = jobs.len(),
        tenants = connections.len(),
        "Sync engine ready"
    );

    Ok(SyncScheduler::new(
        orchestrator,
        Arc::new(ConfiguredEntityLister::new(connections)),
        jobs,
    ))
}
