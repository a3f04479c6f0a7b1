//! Sync command for delivering the outbox to the remote sheet.

use std::io::Write;

use anyhow::{Result, bail};

use tl_core::LogStore;
use tl_sync::{Connectivity, SyncReport, Synchronizer};

/// Runs one sync pass and reports the outcome.
///
/// A halted pass is an error so scripts can retry; skipped passes are not.
pub async fn run<W: Write, S: LogStore>(
    writer: &mut W,
    store: &mut S,
    sync: &Synchronizer,
    connectivity: Connectivity,
) -> Result<()> {
    let report = sync.try_sync(store, connectivity).await?;
    if matches!(report, SyncReport::Halted { .. }) {
        bail!("{report}");
    }
    writeln!(writer, "{report}")?;
    Ok(())
}
