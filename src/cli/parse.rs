use anyhow::Result;
use clap::Args;

#[derive(Args, Clone, Debug)]
pub struct ParseArgs {
    /// Action text, e.g. `click(12)` or `setValue(3, "hello")`
    pub text: String,

    /// Thought to attach to the parsed action
    #[arg(long, default_value = "")]
    pub thought: String,
}

/// Prints the parsed action; parse failures are reported in the JSON
/// payload, not as a command error.
pub fn cmd_parse(args: ParseArgs) -> Result<()> {
    let parsed = agent_core::parse_response(&args.thought, &args.text);
    println!("{}", serde_json::to_string_pretty(&parsed)?);
    Ok(())
}
