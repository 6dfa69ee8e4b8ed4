/*
 * catalog-sync CLI
 *
 * Entry point for the external scheduler: one invocation runs the named
 * streams once and exits.
 *
 * Usage:
 *   catalog-sync run works categories
 *   catalog-sync run --all --json
 *   catalog-sync status contributors
 *   catalog-sync reset works --key categories_last_check
 *
 * Exit codes:
 *   0  every stream succeeded or was skipped (lease held, index missing)
 *   1  at least one stream failed mid-run
 *   2  configuration or connection error
 */

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use catalog_sync::{Clients, StreamId, SyncConfig, SyncMetrics};

#[derive(Parser)]
#[command(name = "catalog-sync", version, about = "Incremental catalog sync into Elasticsearch")]
struct Cli {
    /// YAML configuration file (environment variables override it)
    #[arg(long, short, env = "CATALOG_SYNC_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Log and print reports as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Write Prometheus text exposition here after the command (`metrics` builds)
    #[arg(long, global = true)]
    metrics_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run streams once
    Run {
        /// Streams to run (works, categories, contributors)
        #[arg(required_unless_present = "all")]
        streams: Vec<StreamId>,

        /// Run every stream
        #[arg(long, conflicts_with = "streams")]
        all: bool,
    },
    /// Show stored checkpoints of a stream
    Status { stream: StreamId },
    /// Forget checkpoints so the next run starts over
    Reset {
        stream: StreamId,

        /// Only this checkpoint key (e.g. works_last_check)
        #[arg(long)]
        key: Option<String>,
    },
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn print<T: serde::Serialize + std::fmt::Debug>(value: &T, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string(value)?);
    } else {
        println!("{:#?}", value);
    }
    Ok(())
}

async fn execute(cli: &Cli, config: &SyncConfig, metrics: SyncMetrics) -> anyhow::Result<ExitCode> {
    let clients = Clients::connect(config)
        .await
        .context("failed to connect to backing services")?;
    let orchestrator = clients.orchestrator(config, metrics);

    let code = match &cli.command {
        Command::Run { streams, all } => {
            let streams: Vec<StreamId> = if *all {
                StreamId::ALL.to_vec()
            } else {
                streams.clone()
            };

            let mut failed = false;
            for result in orchestrator.run_many(&streams).await {
                match result {
                    Ok(report) => {
                        failed |= report.abort_reason().map_or(false, |r| r.is_error());
                        print(&report, cli.json)?;
                    }
                    Err(e) => {
                        error!(error = %e, "run could not complete");
                        failed = true;
                    }
                }
            }
            if failed {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            }
        }
        Command::Status { stream } => {
            print(&orchestrator.status(*stream).await?, cli.json)?;
            ExitCode::SUCCESS
        }
        Command::Reset { stream, key } => {
            if orchestrator.reset(*stream, key.as_deref()).await? {
                ExitCode::SUCCESS
            } else {
                error!(stream = %stream, "stream is running; reset refused");
                ExitCode::FAILURE
            }
        }
    };

    clients.close().await;
    Ok(code)
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.json);

    let config = match SyncConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "invalid configuration");
            return ExitCode::from(2);
        }
    };
    info!(
        batch_size = config.sync.batch_size,
        lock_ttl_secs = config.sync.lock_ttl_secs,
        policy = ?config.validation.policy,
        "configuration loaded"
    );

    #[cfg(feature = "metrics")]
    let registry = prometheus::Registry::new();
    #[cfg(feature = "metrics")]
    let metrics = match SyncMetrics::register(&registry) {
        Ok(metrics) => metrics,
        Err(e) => {
            error!(error = %e, "metrics registration failed");
            return ExitCode::from(2);
        }
    };
    #[cfg(not(feature = "metrics"))]
    let metrics = {
        if cli.metrics_file.is_some() {
            tracing::warn!("--metrics-file ignored: built without the metrics feature");
        }
        SyncMetrics::disabled()
    };

    let code = match execute(&cli, &config, metrics).await {
        Ok(code) => code,
        Err(e) => {
            error!(error = ?e, "command failed");
            ExitCode::from(2)
        }
    };

    #[cfg(feature = "metrics")]
    if let Some(path) = &cli.metrics_file {
        let encoded = prometheus::TextEncoder::new().encode_to_string(&registry.gather());
        let written = encoded
            .map_err(anyhow::Error::from)
            .and_then(|text| std::fs::write(path, text).map_err(anyhow::Error::from));
        if let Err(e) = written {
            error!(error = %e, path = %path.display(), "failed to write metrics");
        }
    }

    code
}
