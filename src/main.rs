/*!
 * Ingest Router - trigger adapter
 *
 * Reads one trigger message per line from stdin, routes it, and
 * acknowledges the outcome. Routing failures are logged, never fatal.
 */

use anyhow::{Context, Result};
use clap::Parser;
use ingest_router::{acknowledge, logging, InvocationHandler, RouterConfig};
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Parser)]
#[command(name = "ingest-router")]
#[command(version, about = "Route newly ingested blobs to destination containers by message type", long_about = None)]
struct Cli {
    /// TOML configuration file (otherwise read from the environment)
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Write JSON logs to this file instead of stdout
    #[arg(long = "log-file", value_name = "FILE")]
    log_file: Option<PathBuf>,

    /// Verbose (debug) logging
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,
}

fn load_config(cli: &Cli) -> Result<RouterConfig> {
    let mut config = match &cli.config {
        Some(path) => RouterConfig::from_file(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => RouterConfig::from_env().context("loading configuration from environment")?,
    };

    if cli.log_file.is_some() {
        config.log_file = cli.log_file.clone();
    }
    if cli.verbose {
        config.verbose = true;
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;
    logging::init_logging(&config).context("initializing logging")?;

    tracing::info!(
        version = ingest_router::VERSION,
        ingest_container = %config.ingest.container,
        destination_container = %config.destination.container,
        use_case = %config.use_case,
        "Ingest router started"
    );

    let handler = InvocationHandler::from_config(config).context("building storage clients")?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut invocations: u64 = 0;
    while let Some(line) = lines.next_line().await.context("reading trigger messages")? {
        if line.trim().is_empty() {
            continue;
        }
        invocations += 1;
        acknowledge(handler.handle_message(&line).await);
    }

    tracing::info!(invocations, "Trigger input closed, shutting down");
    Ok(())
}
