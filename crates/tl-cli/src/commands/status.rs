//! Status command for showing the store and configured collaborators.

use std::io::Write;

use anyhow::Result;

use tl_core::LogStore;
use tl_db::Database;

use crate::Config;

pub fn run<W: Write>(writer: &mut W, db: &Database, config: &Config) -> Result<()> {
    let logs = db.list_all()?.len();
    let queued = db.count_not_synced()?;

    writeln!(writer, "Transport log status")?;
    writeln!(writer, "Database: {}", config.database_path.display())?;
    writeln!(writer, "Logs: {logs}")?;
    writeln!(writer, "Queued for sync: {queued}")?;
    writeln!(
        writer,
        "Remote sheet: {}",
        if config.sheets_webapp_url.is_some() {
            "configured"
        } else {
            "not configured"
        }
    )?;
    match config.openai_api_key {
        Some(_) => writeln!(writer, "Parser: configured ({})", config.openai_model)?,
        None => writeln!(writer, "Parser: not configured")?,
    }
    Ok(())
}
