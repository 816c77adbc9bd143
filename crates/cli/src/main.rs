//! CLI entry point for cachegroup.

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::prelude::*;

use cli::CliConfig;

#[tokio::main]
async fn main() -> Result<()> {
    // Filter on RUST_LOG, compact output on stderr so that stdout only carries results.
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_level(true),
        )
        .try_init()
        .context("error initializing logging/tracing system")?;

    let config = CliConfig::parse();
    cli::run(config).await
}
