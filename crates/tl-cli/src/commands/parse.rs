//! Parse command for turning a free-text trip description into a log.

use std::io::Write;

use anyhow::{Context, Result};
use chrono::Utc;

use tl_core::{LogEntry, LogStore};
use tl_llm::Client;

use crate::Tracker;

pub fn render_entry(entry: &LogEntry) -> Result<String> {
    Ok(serde_json::to_string_pretty(entry)?)
}

/// Parses `text` and prints the resulting log, saving it when a tracker is given.
pub async fn run<W: Write, S: LogStore>(
    writer: &mut W,
    client: &Client,
    model: &str,
    text: &str,
    save: Option<&mut Tracker<S>>,
) -> Result<()> {
    let parsed = client
        .parse_log(model, text)
        .await
        .context("failed to parse trip description")?;
    tracing::debug!(?parsed, "parsed trip description");
    let entry = parsed.into_entry(Utc::now());

    writeln!(writer, "{}", render_entry(&entry)?)?;
    if let Some(tracker) = save {
        save_entry(writer, tracker, &entry).await?;
    }
    Ok(())
}

pub async fn save_entry<W: Write, S: LogStore>(
    writer: &mut W,
    tracker: &mut Tracker<S>,
    entry: &LogEntry,
) -> Result<()> {
    let (id, report) = tracker.save_log(entry).await?;
    writeln!(writer, "Saved log {id}; {report}")?;
    Ok(())
}
