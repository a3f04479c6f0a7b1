//! Command-line argument definitions.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Transport log.
///
/// Records driving sessions with their GPS distance, breaks, rests and fuel
/// stops, keeps them locally and delivers them to a remote sheet when
/// online.
#[derive(Debug, Parser)]
#[command(name = "tl", version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to config file.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Start without network connectivity; nothing is synced.
    #[arg(long, global = true)]
    pub offline: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run an interactive driving session.
    ///
    /// Reads commands from stdin, one per line: break, rest,
    /// `fuel <litres> [cost]`, `from <name>`, `to <name>`, status, online,
    /// offline, sync, `end [note]`. Append `@lat,lng` to use a manual
    /// position. The session ends when stdin closes.
    Drive {
        /// JSONL file of positions to replay as the GPS feed.
        #[arg(long)]
        gps: Option<PathBuf>,

        /// Milliseconds between replayed positions.
        #[arg(long, default_value_t = 1000)]
        gps_interval_ms: u64,

        /// Starting latitude when no fix is available.
        #[arg(long, requires = "lng", allow_hyphen_values = true)]
        lat: Option<f64>,

        /// Starting longitude when no fix is available.
        #[arg(long, requires = "lat", allow_hyphen_values = true)]
        lng: Option<f64>,
    },

    /// List saved logs.
    Logs {
        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },

    /// List logs waiting to be synced.
    Outbox {
        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Delete a log and its outbox entry.
    Delete {
        /// Log id.
        id: i64,
    },

    /// Deliver queued logs to the remote sheet.
    Sync,

    /// Parse a free-text trip description into a log.
    Parse {
        /// Trip description.
        text: String,

        /// Save the parsed log and queue it for sync.
        #[arg(long)]
        save: bool,
    },

    /// Show store and configuration status.
    Status,
}
