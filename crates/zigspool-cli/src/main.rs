//! Command-line entry point for the Zigbee2MQTT → Check_MK bridge.

mod bus;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use zigspool_core::config::json_logging;
use zigspool_core::BridgeConfig;
use zigspool_devices::{DeviceRegistry, MessageRouter, SpoolWorker, SpoolWriter};

/// Publish Zigbee2MQTT device health as Check_MK spool files.
#[derive(Parser, Debug)]
#[command(name = "zigspool")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Action to perform (defaults to `run`).
    #[command(subcommand)]
    command: Option<Command>,

    /// Verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,
}

/// Available commands.
#[derive(Subcommand, Debug)]
enum Command {
    /// Connect to the broker and keep the spool directory up to date.
    Run,
    /// Print the effective configuration as JSON and exit.
    Config,
}

fn init_logging(verbose: bool) {
    let default_directive = if verbose { "zigspool=debug" } else { "zigspool=info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));

    if json_logging() {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_thread_ids(false)
            .compact()
            .init();
    }
}

async fn ensure_spool_dir(dir: &Path) -> Result<()> {
    info!("Verifying spool directory {} ...", dir.display());
    if !tokio::fs::try_exists(dir).await.unwrap_or(false) {
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("Failed to create spool directory {}", dir.display()))?;
    }
    Ok(())
}

async fn run(config: BridgeConfig) -> Result<()> {
    ensure_spool_dir(&config.spool_dir).await?;

    let (worker, worker_task) = SpoolWorker::spawn(SpoolWriter::new(&config.spool_dir));
    let worker = Arc::new(worker);
    let mut registry =
        DeviceRegistry::new(worker.clone(), config.piggyback.clone(), config.freshness);
    let router = MessageRouter::new(&config.topic_root);

    info!(
        "Connecting to MQTT Server {} ...",
        config.mqtt.endpoint.full_broker_addr()
    );
    bus::run(&config, &mut registry, &router, tokio::signal::ctrl_c()).await?;

    worker.flush().await;
    drop(registry);
    drop(worker);
    worker_task.await.context("Spool worker panicked")?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let config = BridgeConfig::from_env()?;

    match args.command.unwrap_or(Command::Run) {
        Command::Run => run(config).await,
        Command::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
    }
}
