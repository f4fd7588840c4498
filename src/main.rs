//! Ping Monitor - device reachability reports
//!
//! Keeps a small list of network devices in SQLite, pings them on demand and
//! appends the results to timestamped text reports.

mod cli;
mod config;
mod db;
mod probe;
mod report;
mod scheduler;

use clap::Parser;
use cli::Cli;
use config::MonitorConfig;
use db::Store;
use probe::IcmpPinger;

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let cli = Cli::parse();
    let cfg = cli.apply(MonitorConfig::load());

    init_logging(&cfg.log_file)?;
    tracing::info!("Starting the application");
    tracing::debug!("Using database at {}", cfg.db_path.display());

    let store = Store::new(&cfg.db_path)?;
    let pinger = Arc::new(IcmpPinger::new(cfg.probe_timeout));

    match cli::execute(cli.command, &cfg, store, pinger).await {
        Ok(output) => {
            println!("{}", output);
            Ok(())
        }
        Err(e) => {
            tracing::error!("{}", e);
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}

/// Send log lines to `log_file`, appending. `RUST_LOG` overrides the level.
fn init_logging(log_file: &Path) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let file = OpenOptions::new().create(true).append(true).open(log_file)?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("ping_monitor=debug"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(Mutex::new(file)).with_ansi(false))
        .init();

    Ok(())
}
