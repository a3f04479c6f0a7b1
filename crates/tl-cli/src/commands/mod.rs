//! CLI subcommand implementations.

pub mod delete;
pub mod drive;
pub mod logs;
pub mod outbox;
pub mod parse;
pub mod status;
pub mod sync;
