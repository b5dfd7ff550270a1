//! timburr
//!
//! Subscribes to broker topics and runs a task for every message.
//!
//! # Architecture Overview
//!
//! ```text
//!                     ┌────────────────────────────────────────────────┐
//!                     │                    TIMBURR                      │
//!                     │                                                 │
//!   Broker topics     │  ┌──────────────┐    ┌───────────────────────┐ │
//!   ──────────────────┼─▶│ subscription │───▶│ task                  │─┼──▶ job runner
//!                     │  │ basic/regex  │    │ registry → executors  │─┼──▶ purge targets
//!                     │  └──────▲───────┘    └───────────────────────┘ │
//!                     │         │                                       │
//!   Topic catalog     │  ┌──────┴───────┐                               │
//!   ──────────────────┼─▶│   watcher    │                               │
//!                     │  └──────────────┘                               │
//!                     │                                                 │
//!                     │  config · observability · resilience · lifecycle│
//!                     └────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use timburr::config::load_config;
use timburr::lifecycle;
use timburr::observability::{logging, metrics};

#[derive(Parser)]
#[command(name = "timburr")]
#[command(about = "Broker subscription engine", long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, env = "TIMBURR_CONFIG", default_value = "conf/config.toml")]
    config: PathBuf,

    /// Validate the configuration and exit.
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    if cli.check {
        println!("{}: ok ({} rules)", cli.config.display(), config.rules.len());
        return Ok(());
    }

    logging::init_logging(&config.observability);
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %cli.config.display(),
        rules = config.rules.len(),
        "timburr starting"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let subscriber = lifecycle::start(&config).await?;

    lifecycle::wait_for_shutdown().await;

    let deadline = Duration::from_millis(config.options.shutdown_timeout_ms);
    if !lifecycle::shutdown(&subscriber, deadline).await {
        return Err("subscriptions did not stop before the shutdown deadline".into());
    }
    Ok(())
}
