//! Data ingestion orchestrator - runs the collection pass, then the load pass

use anyhow::{Context, Result};
use bngb_ingest::ingestion::pipeline::{collect_region, load_region};
use bngb_ingest::ingestion::utils::build_http_client;
use bngb_ingest::ingestion::{Config, FileSink, Loader, Region, RunSummary};
use clap::{Parser, ValueEnum};
use std::process::ExitCode;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Exit status when the run finished but some region did not fully succeed
const EXIT_PARTIAL: u8 = 2;

#[derive(Debug, Parser)]
#[command(
    name = "data-ingestion",
    version,
    about = "Collect BNGB geographic names per UF and load them into PostgreSQL"
)]
struct Cli {
    /// Which pass(es) to run
    #[arg(long, value_enum, default_value_t = Phase::All)]
    phase: Phase,

    /// Drop and recreate the target table before loading
    #[arg(long)]
    reset_schema: bool,

    /// Region codes to process (defaults to BNGB_REGIONS or all 27)
    regions: Vec<Region>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Phase {
    Collect,
    Load,
    All,
}

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_thread_ids(false)
        .with_level(true)
        .init();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(summary) if summary.is_complete() => {
            info!("Process finished: {}", summary);
            ExitCode::SUCCESS
        }
        Ok(summary) => {
            warn!("Process finished with skipped or partial regions: {}", summary);
            for (region, outcome) in summary.incomplete() {
                warn!("  {}: {}", region, outcome);
            }
            ExitCode::from(EXIT_PARTIAL)
        }
        Err(e) => {
            error!("Ingestion aborted: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<RunSummary> {
    info!("Starting BNGB ingestion pipeline");

    dotenvy::dotenv().ok();
    let config = Config::from_env().context("Failed to load configuration")?;
    info!("Configuration loaded");

    let regions = if cli.regions.is_empty() {
        config.regions.clone()
    } else {
        cli.regions.clone()
    };

    let sink = FileSink::from_config(&config);
    let mut summary = RunSummary::default();

    if matches!(cli.phase, Phase::Collect | Phase::All) {
        run_collection(&config, &sink, &regions, &mut summary).await?;
    }

    if matches!(cli.phase, Phase::Load | Phase::All) {
        run_load(&config, &sink, &regions, cli.reset_schema, &mut summary).await?;
    }

    Ok(summary)
}

/// Pass 1: fetch, normalize and persist every region
async fn run_collection(
    config: &Config,
    sink: &FileSink,
    regions: &[Region],
    summary: &mut RunSummary,
) -> Result<()> {
    info!("=== Collection pass ({} regions) ===", regions.len());
    let client = build_http_client(config.http_timeout)?;

    for (idx, &region) in regions.iter().enumerate() {
        info!("Step {}/{}: collecting {}", idx + 1, regions.len(), region);

        let outcome = collect_region(&client, config, sink, region).await;
        info!("{}: {}", region, outcome);
        summary.record_collection(region, outcome);

        // Pacing for the upstream API
        tokio::time::sleep(config.throttle).await;
    }

    Ok(())
}

/// Pass 2: load every persisted region over one connection
async fn run_load(
    config: &Config,
    sink: &FileSink,
    regions: &[Region],
    reset_schema: bool,
    summary: &mut RunSummary,
) -> Result<()> {
    info!("=== Load pass ({} regions) ===", regions.len());

    let mut loader = Loader::connect(&config.database)
        .await
        .context("Failed to connect to database")?;

    if reset_schema {
        loader.reset_schema().await.context("Failed to reset schema")?;
    } else {
        loader.ensure_schema().await.context("Failed to ensure schema")?;
    }

    for (idx, &region) in regions.iter().enumerate() {
        info!("Step {}/{}: loading {}", idx + 1, regions.len(), region);

        let outcome = load_region(&mut loader, sink, region)
            .await
            .with_context(|| format!("Database failure while loading {}", region))?;
        info!("{}: {}", region, outcome);
        summary.record_load(region, outcome);
    }

    let total = loader.count_rows().await?;
    info!("Table now holds {} rows", total);
    loader.close().await?;

    Ok(())
}
