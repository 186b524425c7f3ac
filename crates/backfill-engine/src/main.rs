//! Backfill - Main entry point

use anyhow::Context;
use backfill_common::logging::{init_logging, LogConfig, LogLevel};
use backfill_common::report::{spawn_reporter, FailureReportLayer, HttpFailureSink, ReporterHandle};
use backfill_engine::config::Config;
use backfill_engine::db::{create_pool, health_check};
use backfill_engine::migrate::{CodeToTextJob, PgMigrationStore};
use backfill_engine::oracle::HttpOracle;
use backfill_engine::reconcile::{BalanceReconciler, PgBalanceStore};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// How long shutdown waits for queued failure reports
const REPORT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Batch repair jobs for the indexer database
#[derive(Parser, Debug)]
#[command(name = "backfill")]
#[command(author, version, about, long_about = None)]
#[command(arg_required_else_help = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Env file to load before reading the environment
    #[arg(long, default_value = ".env", global = true)]
    env: PathBuf,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Convert TransactionDetails.code into codetext
    CodeToText {
        /// Validate and convert every batch, then roll it back
        #[arg(long)]
        dry_run: bool,
    },

    /// Re-fetch fungible balances from the node and write them back
    Reconcile {
        /// Only reconcile rows with an id above this one
        #[arg(long, default_value_t = 0)]
        after: i64,

        /// Query the node but roll back every batch
        #[arg(long)]
        dry_run: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match Config::load(&cli.env) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(2);
        },
    };

    let (layer, reporter) = match start_reporter(&config) {
        Some((layer, handle)) => (Some(layer), Some(handle)),
        None => (None, None),
    };

    let base = LogConfig::builder()
        .level(if cli.verbose { LogLevel::Debug } else { LogLevel::Info })
        .log_file_prefix("backfill")
        .filter_directives("sqlx=warn,hyper=warn,reqwest=info")
        .build();

    // Environment variables take precedence
    let log_config = base.clone().merge_env().unwrap_or(base);

    if let Err(e) = init_logging(&log_config, layer) {
        eprintln!("Warning: failed to initialize logging: {}", e);
    }

    let result = execute(&cli, &config).await;

    if let Err(ref e) = result {
        error!(error = %format!("{:#}", e), "Backfill job failed, aborting");
    }

    if let Some(reporter) = reporter {
        if !reporter.drain(REPORT_DRAIN_TIMEOUT).await {
            warn!("Timed out waiting for failure reports to be delivered");
        }
        if reporter.dropped() > 0 {
            warn!(dropped = reporter.dropped(), "Some failure reports were dropped");
        }
    }

    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}

/// Build the failure-report layer when `ERROR_REPORT_URL` is configured.
fn start_reporter(config: &Config) -> Option<(FailureReportLayer, ReporterHandle)> {
    let url = config.report.url.as_deref()?;

    match HttpFailureSink::new(url, Duration::from_secs(config.report.timeout_secs)) {
        Ok(sink) => Some(spawn_reporter(
            Arc::new(sink),
            config.report.endpoint.clone(),
            config.report.queue_capacity,
        )),
        Err(e) => {
            eprintln!("Warning: failure reporting disabled: {}", e);
            None
        },
    }
}

async fn execute(cli: &Cli, config: &Config) -> anyhow::Result<()> {
    let pool = create_pool(&config.database)
        .await
        .context("Could not connect to database")?;
    health_check(&pool)
        .await
        .context("Database health check failed")?;
    info!("Successfully connected to database");

    let outcome = match cli.command {
        Commands::CodeToText { dry_run } => run_code_to_text(pool.clone(), config, dry_run).await,
        Commands::Reconcile { after, dry_run } => {
            run_reconcile(pool.clone(), config, after, dry_run).await
        },
    };

    pool.close().await;
    outcome
}

async fn run_code_to_text(pool: sqlx::PgPool, config: &Config, dry_run: bool) -> anyhow::Result<()> {
    let job = CodeToTextJob::new(
        Arc::new(PgMigrationStore::new(pool)),
        config.code_to_text_job(dry_run),
    );

    let summary = job.run().await.context("Migration failed")?;
    info!(
        windows = summary.windows,
        rows_converted = summary.rows_converted,
        rows_updated = summary.rows_updated,
        dry_run = summary.dry_run,
        "code-to-text finished"
    );

    Ok(())
}

async fn run_reconcile(
    pool: sqlx::PgPool,
    config: &Config,
    after: i64,
    dry_run: bool,
) -> anyhow::Result<()> {
    let oracle = HttpOracle::new(config.oracle_url()?, config.oracle_timeout())
        .context("Failed to build oracle client")?;

    let reconciler = BalanceReconciler::new(
        Arc::new(PgBalanceStore::new(pool)),
        Arc::new(oracle),
        config.reconcile_job(after, dry_run),
    );

    let summary = reconciler.run().await.context("Reconciliation failed")?;
    info!(
        windows = summary.windows,
        processed = summary.processed,
        updated = summary.updated,
        skipped = summary.skipped(),
        dry_run = summary.dry_run,
        "reconcile finished"
    );

    Ok(())
}
