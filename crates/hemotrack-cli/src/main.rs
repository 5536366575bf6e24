use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use hemotrack_client::{ReqwestFetcher, builtin_adapters};
use hemotrack_core::config::SourcesConfig;
use hemotrack_core::pipeline::ScrapePipeline;
use hemotrack_core::report::TracingRunReporter;
use hemotrack_core::run::RunOutcome;
use hemotrack_core::scheduler::{Scheduler, SchedulerConfig};
use hemotrack_core::traits::{AdapterRegistry, RunLedger};
use hemotrack_db::{Database, DatabaseConfig, InventoryRepository, RunRepository};

#[derive(Parser)]
#[command(name = "hemotrack", version, about = "Blood inventory scraping pipeline")]
struct Cli {
    /// Path to the sources configuration file
    #[arg(short, long, env = "HEMOTRACK_SOURCES", default_value = "config/sources.json")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduler until interrupted
    Run {
        /// Maximum number of concurrent scrapes
        #[arg(short, long, default_value_t = 4)]
        workers: usize,
    },

    /// Execute one run for a single source, outside its schedule
    Scrape {
        /// Source id to scrape
        #[arg(short, long)]
        source: String,
    },

    /// List the configured sources
    Sources,

    /// Show the run history of a source
    History {
        /// Source id
        #[arg(short, long)]
        source: String,

        /// Number of runs to show
        #[arg(short, long, default_value_t = 10)]
        limit: usize,
    },

    /// Show the last successful run per source and flag stale ones
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Setup tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("hemotrack=info".parse()?))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = SourcesConfig::load(&cli.config)
        .with_context(|| format!("Failed to load sources from {}", cli.config.display()))?;

    match cli.command {
        Commands::Run { workers } => cmd_run(&config, &cli.config, workers).await,
        Commands::Scrape { source } => cmd_scrape(&config, &source).await,
        Commands::Sources => cmd_sources(&config),
        Commands::History { source, limit } => cmd_history(&source, limit).await,
        Commands::Status => cmd_status(&config).await,
    }
}

/// Connect to PostgreSQL and run migrations.
async fn connect_db() -> Result<Database> {
    let db_config = DatabaseConfig::from_env().map_err(|e| anyhow::anyhow!(e))?;
    let db = Database::connect(&db_config)
        .await
        .context("Failed to connect to database")?;
    db.migrate().await.map_err(|e| anyhow::anyhow!(e))?;
    Ok(db)
}

/// Every enabled source must name a registered adapter, checked up front
/// so a typo fails at startup rather than on the first trigger.
fn check_adapters(config: &SourcesConfig, registry: &AdapterRegistry) -> Result<()> {
    for source in config.enabled() {
        if !registry.contains(&source.adapter) {
            bail!(
                "source '{}' names unknown adapter '{}' (available: {})",
                source.id,
                source.adapter,
                registry.names().join(", ")
            );
        }
    }
    Ok(())
}

fn build_pipeline(
    db: &Database,
) -> Result<ScrapePipeline<ReqwestFetcher, InventoryRepository, RunRepository, TracingRunReporter>> {
    let fetcher = ReqwestFetcher::new().map_err(|e| anyhow::anyhow!(e))?;
    Ok(ScrapePipeline::new(
        fetcher,
        builtin_adapters(),
        db.inventory_repo(),
        db.run_repo(),
        Arc::new(TracingRunReporter),
    ))
}

async fn cmd_run(config: &SourcesConfig, config_path: &Path, workers: usize) -> Result<()> {
    check_adapters(config, &builtin_adapters())?;
    let db = connect_db().await?;
    let pipeline = build_pipeline(&db)?;

    let scheduler = Scheduler::new(
        pipeline,
        Arc::new(TracingRunReporter),
        SchedulerConfig { workers },
    );
    scheduler.schedule_all(config).await;

    let scheduled = scheduler.scheduled_sources().await;
    tracing::info!(
        sources = scheduled.len(),
        "Scheduler running, SIGHUP reloads sources, Ctrl-C stops"
    );

    wait_with_reload(&scheduler, config_path).await?;
    tracing::info!("Shutting down");
    scheduler.shutdown().await;

    Ok(())
}

/// Block until Ctrl-C; on SIGHUP, re-read the sources file and rederive
/// the trigger set without restarting unaffected sources.
#[cfg(unix)]
async fn wait_with_reload<Run, R>(scheduler: &Scheduler<Run, R>, config_path: &Path) -> Result<()>
where
    Run: hemotrack_core::traits::SourceRunner,
    R: hemotrack_core::report::RunReporter + 'static,
{
    use tokio::signal::unix::{SignalKind, signal};

    let mut hangup =
        signal(SignalKind::hangup()).context("Failed to install SIGHUP handler")?;
    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result.context("Failed to listen for shutdown signal")?;
                return Ok(());
            }
            _ = hangup.recv() => {
                match SourcesConfig::load(config_path) {
                    Ok(new_config) => {
                        if let Err(e) = check_adapters(&new_config, &builtin_adapters()) {
                            tracing::error!(error = %e, "Reload rejected, keeping current schedule");
                            continue;
                        }
                        scheduler.reload(&new_config).await;
                        tracing::info!("Sources reloaded");
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Reload failed, keeping current schedule");
                    }
                }
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_with_reload<Run, R>(_scheduler: &Scheduler<Run, R>, _config_path: &Path) -> Result<()>
where
    Run: hemotrack_core::traits::SourceRunner,
    R: hemotrack_core::report::RunReporter + 'static,
{
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")
}

async fn cmd_scrape(config: &SourcesConfig, source_id: &str) -> Result<()> {
    let source = config
        .get(source_id)
        .with_context(|| format!("Unknown source '{source_id}'"))?;
    check_adapters(config, &builtin_adapters())?;

    let db = connect_db().await?;
    let pipeline = build_pipeline(&db)?;

    let result = pipeline.execute(source).await;

    println!(
        "{} {} in {}ms: {} observed, {} inserted, {} updated, {} deactivated, {} malformed",
        result.source_id,
        result.outcome,
        result.duration_ms(),
        result.counts.observed,
        result.counts.inserted,
        result.counts.updated,
        result.counts.deactivated,
        result.counts.malformed,
    );
    if let Some(error) = &result.error {
        println!("  error: {error}");
    }
    if result.outcome == RunOutcome::Failure {
        std::process::exit(1);
    }
    Ok(())
}

fn cmd_sources(config: &SourcesConfig) -> Result<()> {
    if config.sources().is_empty() {
        println!("No sources configured");
        return Ok(());
    }
    for source in config.sources() {
        let state = if source.enabled { "enabled" } else { "disabled" };
        println!(
            "  {} ({}) — adapter {}, every {}, {}",
            source.id, source.name, source.adapter, source.cadence, state
        );
    }
    Ok(())
}

async fn cmd_history(source_id: &str, limit: usize) -> Result<()> {
    let db = connect_db().await?;
    let history = db
        .run_repo()
        .history(source_id, limit)
        .await
        .map_err(|e| anyhow::anyhow!(e))?;

    if history.is_empty() {
        println!("No runs recorded for source '{source_id}'");
        return Ok(());
    }

    for run in &history {
        println!(
            "  [{}] {} — {}ms, {} observed, {} inserted, {} updated, {} deactivated, {} malformed{}",
            run.outcome,
            run.finished_at.format("%Y-%m-%d %H:%M:%S UTC"),
            run.duration_ms(),
            run.counts.observed,
            run.counts.inserted,
            run.counts.updated,
            run.counts.deactivated,
            run.counts.malformed,
            run.error
                .as_deref()
                .map(|e| format!(" ({e})"))
                .unwrap_or_default(),
        );
    }
    println!("\nTotal: {} runs", history.len());
    Ok(())
}

async fn cmd_status(config: &SourcesConfig) -> Result<()> {
    let db = connect_db().await?;
    let ledger = db.run_repo();
    let now = Utc::now();

    for source in config.enabled() {
        let last = ledger
            .last_successful(&source.id)
            .await
            .map_err(|e| anyhow::anyhow!(e))?;

        match last {
            None => println!("  {} — never succeeded", source.id),
            Some(run) => {
                let age = now.signed_duration_since(run.finished_at);
                // A source that has missed three cadences is worth a look.
                let stale_after = source.cadence.interval() * 3;
                let marker = if age.to_std().is_ok_and(|a| a > stale_after) {
                    " STALE"
                } else {
                    ""
                };
                println!(
                    "  {} — last {} at {} ({}m ago){}",
                    source.id,
                    run.outcome,
                    run.finished_at.format("%Y-%m-%d %H:%M:%S UTC"),
                    age.num_minutes(),
                    marker,
                );
            }
        }
    }
    Ok(())
}
