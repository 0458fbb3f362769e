use clap::Parser;
use std::path::PathBuf;

use tabflow_cli::LogFormat;

use super::commands::Commands;

const VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("GIT_HASH"),
    ", built ",
    env!("BUILD_DATE"),
    ")"
);

#[derive(Parser)]
#[command(author, version = VERSION, about, long_about = None)]
#[command(propagate_version = true)]
pub struct CliArgs {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    /// Log level (overrides logging.level)
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,

    /// Log line format (overrides logging.format)
    #[arg(long, value_enum, global = true)]
    pub log_format: Option<LogFormat>,

    /// Enable debug mode
    #[arg(short, long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Commands,
}
