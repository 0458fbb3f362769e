use anyhow::Result;

use super::config::cmd_config;
use super::env::CliArgs;
use super::parse::cmd_parse;
use super::serve::cmd_serve;
use crate::cli::commands::Commands;
use crate::cli::context::CliContext;

pub async fn dispatch(cli: &CliArgs, ctx: &CliContext) -> Result<()> {
    match cli.command.clone() {
        Commands::Serve(args) => cmd_serve(args, ctx).await,
        Commands::Parse(args) => cmd_parse(args),
        Commands::Config(args) => cmd_config(args, ctx),
    }
}
