//! JSON-lines transport for the command channel.
//!
//! Each input line is one command; each output line is either a command
//! response or, when forwarding is enabled, a task event (tagged `event`).

use anyhow::{Context, Result};
use serde::Serialize;
use tabflow_core_types::TaskEvent;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::commands::CommandRouter;

/// Runs until the input reaches EOF.
pub async fn serve_lines<R, W>(
    router: &CommandRouter,
    reader: R,
    writer: &mut W,
    mut events: Option<mpsc::Receiver<TaskEvent>>,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = reader.lines();
    let mut handled = 0usize;
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read command")? else {
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }
                let response = router.handle_json(&line).await;
                write_line(writer, &response).await?;
                handled += 1;
            }
            Some(event) = next_event(&mut events) => {
                write_line(writer, &event).await?;
            }
        }
    }
    writer.flush().await?;
    info!(commands = handled, "command channel closed");
    Ok(())
}

async fn next_event(events: &mut Option<mpsc::Receiver<TaskEvent>>) -> Option<TaskEvent> {
    match events {
        Some(rx) => match rx.recv().await {
            Some(event) => Some(event),
            None => {
                debug!("event stream ended");
                *events = None;
                None
            }
        },
        None => std::future::pending().await,
    }
}

async fn write_line<W, T>(writer: &mut W, value: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut line = serde_json::to_vec(value).context("Failed to encode response")?;
    line.push(b'\n');
    writer.write_all(&line).await?;
    writer.flush().await?;
    Ok(())
}
