use clap::Subcommand;

use super::config::ConfigArgs;
use super::parse::ParseArgs;
use super::serve::ServeArgs;

#[derive(Subcommand, Clone)]
pub enum Commands {
    /// Run the JSON-lines command channel on stdin/stdout
    Serve(ServeArgs),

    /// Parse an action string and print the result as JSON
    Parse(ParseArgs),

    /// Print the effective configuration
    Config(ConfigArgs),
}
