mod api;
mod cli;
mod config;
mod download;
mod error;
mod install;
mod models;
mod self_install;
mod shell;
mod utils;
mod version_manager;

use anyhow::Result;
use clap::Parser;
use cli::Cli;
use config::Config;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins over --verbose
    let default_level = if cli.verbose { "info" } else { "warn" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let config = Config::load().map_err(|e| anyhow::anyhow!(e))?;

    cli.with_config(config)
        .run()
        .await
        .map_err(|e| anyhow::anyhow!(e))
}
