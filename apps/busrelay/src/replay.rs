//! Replay driver: feeds newline-delimited JSON messages to the partition relay.

use anyhow::{Context, Result};
use busrelay_dispatch::{InboundMessage, PartitionRelay};
use bytes::Bytes;
use serde::Deserialize;
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{info, warn};

/// One input line.
#[derive(Debug, Deserialize)]
struct InputLine {
    topic: String,
    partition: i32,
    offset: i64,
    payload: Value,
}

/// Parse one input line into a message.
pub(crate) fn parse_line(line: &str) -> Result<InboundMessage> {
    let input: InputLine = serde_json::from_str(line).context("malformed input line")?;
    let payload = match input.payload {
        Value::String(raw) => Bytes::from(raw),
        other => Bytes::from(other.to_string()),
    };
    Ok(InboundMessage::new(
        input.topic,
        input.partition,
        input.offset,
        payload,
    ))
}

/// Submit every line of `reader` until EOF or Ctrl-C, then drain the workers.
///
/// Malformed lines are logged and skipped. Returns the number of messages
/// processed.
pub(crate) async fn run<R>(reader: R, mut relay: PartitionRelay) -> Result<u64>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("failed to read input")? else {
                    info!("input exhausted, draining partition workers");
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }
                match parse_line(&line) {
                    Ok(message) => relay.submit(message).await?,
                    Err(e) => warn!(error = %e, "skipping input line"),
                }
            }
            _ = &mut shutdown => {
                info!("received shutdown signal, draining partition workers");
                break;
            }
        }
    }

    Ok(relay.shutdown().await)
}
