use std::time::Duration;

use anyhow::Result;
use clap::Args;
use tabflow_cli::{serve_lines, Collaborators, Orchestrator};
use tabflow_event_bus::to_mpsc;
use tokio::io::{self, BufReader};
use tracing::info;

use crate::cli::context::CliContext;

#[derive(Args, Clone, Debug)]
pub struct ServeArgs {
    /// Write task events to stdout alongside command responses
    #[arg(long)]
    pub events: bool,

    /// Seconds to wait for in-flight steps on shutdown
    #[arg(long, default_value_t = 10)]
    pub shutdown_grace_secs: u64,
}

pub async fn cmd_serve(args: ServeArgs, ctx: &CliContext) -> Result<()> {
    let config = ctx.config();
    let orchestrator = Orchestrator::build(config, Collaborators::http(config)?)?;
    let events = args
        .events
        .then(|| to_mpsc(orchestrator.events.clone(), 256));

    info!(
        reasoning = %config.reasoning.base_url,
        bridge = %config.bridge.base_url,
        max_concurrent_tasks = config.orchestrator.max_concurrent_tasks,
        "command channel ready on stdin"
    );
    let mut stdout = io::stdout();
    let served = serve_lines(
        &orchestrator.router,
        BufReader::new(io::stdin()),
        &mut stdout,
        events,
    )
    .await;

    orchestrator
        .shutdown(Duration::from_secs(args.shutdown_grace_secs), config)
        .await?;
    served
}
