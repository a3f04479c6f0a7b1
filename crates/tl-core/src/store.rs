//! Persistent store contract.

use crate::types::{LogEntry, LogId, LogRecord};

/// Durable storage for finished logs and the not-yet-synchronized outbox.
///
/// Implementations must make every call atomic on its own and must make an
/// `append` visible to the next `list_all`.
pub trait LogStore {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Stores a new log, optionally queueing it for synchronization.
    fn append(&mut self, entry: &LogEntry, queue_for_sync: bool) -> Result<LogId, Self::Error>;

    /// Fetches a single log.
    fn get(&self, id: LogId) -> Result<Option<LogRecord>, Self::Error>;

    /// All logs, oldest first.
    fn list_all(&self) -> Result<Vec<LogRecord>, Self::Error>;

    /// Queued logs in the order they were queued.
    fn list_not_synced(&self) -> Result<Vec<LogRecord>, Self::Error>;

    /// Number of queued logs.
    fn count_not_synced(&self) -> Result<usize, Self::Error> {
        Ok(self.list_not_synced()?.len())
    }

    /// Empties the outbox.
    fn clear_not_synced(&mut self) -> Result<usize, Self::Error>;

    /// Removes exactly the given logs from the outbox in one operation.
    ///
    /// Logs queued after the caller read the outbox stay queued.
    fn clear_delivered(&mut self, ids: &[LogId]) -> Result<usize, Self::Error>;

    /// Deletes a log from both the canonical set and the outbox.
    ///
    /// Returns whether anything was deleted.
    fn delete_by_id(&mut self, id: LogId) -> Result<bool, Self::Error>;
}
