use anyhow::Result;
use clap::Parser;
use tabflow_cli::load_config;
use tracing::{error, info};

use super::context::CliContext;
use super::dispatch::dispatch;
use super::env::CliArgs;
use super::runtime::init_logging;

pub async fn run() -> Result<()> {
    let cli = CliArgs::parse();

    let loaded = load_config(cli.config.as_deref()).await?;
    let logging = &loaded.config.logging;
    init_logging(
        cli.log_level.as_deref().unwrap_or(&logging.level),
        cli.debug,
        cli.log_format.unwrap_or(logging.format),
    )?;

    info!("Starting tabflow v{}", env!("CARGO_PKG_VERSION"));
    loaded.report();
    let ctx = CliContext::new(loaded.config, loaded.path);

    match dispatch(&cli, &ctx).await {
        Ok(()) => Ok(()),
        Err(err) => {
            error!("Command failed: {}", err);
            Err(err)
        }
    }
}
