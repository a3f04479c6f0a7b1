//! Outbox command for listing logs waiting to be synced.

use std::collections::HashSet;
use std::io::Write;

use anyhow::Result;

use tl_core::LogStore;
use tl_db::Database;

use crate::commands::logs::write_records;

pub fn run<W: Write>(writer: &mut W, db: &Database, json: bool) -> Result<()> {
    let queued = db.list_not_synced()?;

    if json {
        writeln!(writer, "{}", serde_json::to_string_pretty(&queued)?)?;
        return Ok(());
    }

    if queued.is_empty() {
        writeln!(writer, "Outbox is empty.")?;
        return Ok(());
    }

    writeln!(writer, "{} log(s) waiting to sync, oldest first:", queued.len())?;
    write_records(writer, &queued, &HashSet::new())
}
