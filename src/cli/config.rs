use anyhow::Result;
use clap::{Args, ValueEnum};

use crate::cli::context::CliContext;

#[derive(Clone, Debug, Default, ValueEnum)]
pub enum ConfigFormat {
    #[default]
    Yaml,
    Json,
}

#[derive(Args, Clone, Debug)]
pub struct ConfigArgs {
    /// Output format
    #[arg(short, long, value_enum, default_value_t = ConfigFormat::Yaml)]
    pub format: ConfigFormat,
}

/// Prints the configuration after file and environment resolution.
pub fn cmd_config(args: ConfigArgs, ctx: &CliContext) -> Result<()> {
    let config = ctx.config();
    eprintln!("# resolved from {}", ctx.config_path().display());
    match args.format {
        ConfigFormat::Yaml => print!("{}", serde_yaml::to_string(config)?),
        ConfigFormat::Json => println!("{}", serde_json::to_string_pretty(config)?),
    }
    Ok(())
}
