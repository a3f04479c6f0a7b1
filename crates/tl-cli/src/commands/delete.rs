//! Delete command.

use std::io::Write;

use anyhow::{Result, bail};

use tl_core::{LogId, LogStore};
use tl_db::Database;

/// Deletes a log from the store and the outbox.
pub fn run<W: Write>(writer: &mut W, db: &mut Database, id: i64) -> Result<()> {
    let id = LogId::new(id);
    if !db.delete_by_id(id)? {
        bail!("no log with id {id}");
    }
    tracing::info!(%id, "log deleted");
    writeln!(writer, "Deleted log {id}.")?;
    Ok(())
}
