//! Logs command for listing saved logs.

use std::collections::HashSet;
use std::io::Write;

use anyhow::Result;

use tl_core::{LogId, LogRecord, LogStore};
use tl_db::Database;

/// One line per log: id, date, route and the headline figures.
pub fn format_log_line(record: &LogRecord) -> String {
    let entry = &record.entry;
    format!(
        "#{} {} {} -> {} | {:.3} km | drive {} min | break {} min | fuel {} L, cost {}",
        record.id,
        entry.date,
        entry.departure_name,
        entry.arrival_name,
        entry.distance_km,
        entry.driving_minutes,
        entry.break_minutes,
        entry.fuel_litres,
        entry.fuel_cost,
    )
}

pub fn write_records<W: Write>(
    writer: &mut W,
    records: &[LogRecord],
    queued: &HashSet<LogId>,
) -> Result<()> {
    for record in records {
        let marker = if queued.contains(&record.id) {
            " [queued]"
        } else {
            ""
        };
        writeln!(writer, "{}{marker}", format_log_line(record))?;
        if !record.entry.note.is_empty() {
            writeln!(writer, "    {}", record.entry.note)?;
        }
    }
    Ok(())
}

pub fn run<W: Write>(writer: &mut W, db: &Database, json: bool) -> Result<()> {
    let records = db.list_all()?;

    if json {
        writeln!(writer, "{}", serde_json::to_string_pretty(&records)?)?;
        return Ok(());
    }

    if records.is_empty() {
        writeln!(writer, "No logs recorded.")?;
        return Ok(());
    }

    let queued: HashSet<LogId> = db.list_not_synced()?.iter().map(|r| r.id).collect();
    write_records(writer, &records, &queued)
}
