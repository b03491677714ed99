//! `passbook` - command-line client for the ticket ledger

mod cli;
mod commands;

use anyhow::{Context, Result};
use passbook_core::PassbookConfig;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let matches = cli::build().get_matches();

    init_logging(matches.get_flag("log-json"));

    let config = load_config(matches.get_one::<PathBuf>("config"))?;
    tracing::debug!(station = %config.station_url, data_dir = %config.data_dir.display(), "Starting");

    commands::run(config, &matches).await
}

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<PassbookConfig> {
    match path {
        Some(path) => PassbookConfig::load(path)
            .with_context(|| format!("failed to load config from {}", path.display())),
        None => {
            let config = PassbookConfig::default().with_env_overrides();
            config.validate().context("invalid configuration")?;
            Ok(config)
        }
    }
}
