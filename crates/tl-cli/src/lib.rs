//! Transport log CLI library.
//!
//! This crate provides the CLI interface for the transport log.

mod cli;
pub mod commands;
mod config;
pub mod gps;
pub mod tracker;

pub use cli::{Cli, Commands};
pub use config::Config;
pub use tracker::{AfterSave, Ended, StartOutcome, Tracker};
