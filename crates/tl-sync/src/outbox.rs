//! Draining the outbox to the remote sink.
//!
//! Records are posted strictly one at a time in queue order. The first
//! failure ends the pass and leaves the whole queue in place; only a pass in
//! which every record was acknowledged clears the delivered entries.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

use tl_core::{LogId, LogStore};

use crate::sink::{HttpSink, RemoteSink, TransportError};

/// Errors that prevent a sync pass from running at all.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The local store failed.
    #[error("store error: {0}")]
    Store(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl SyncError {
    fn store(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Store(Box::new(err))
    }
}

/// Why a sync pass did nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncSkip {
    Offline,
    NotConfigured,
}

impl fmt::Display for SyncSkip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Offline => f.write_str("offline"),
            Self::NotConfigured => f.write_str("no remote endpoint configured"),
        }
    }
}

/// Outcome of one sync pass.
#[derive(Debug)]
pub enum SyncReport {
    Skipped(SyncSkip),
    /// Every queued record was delivered and cleared.
    Completed { delivered: usize },
    /// A post failed; nothing was cleared.
    Halted {
        attempted: usize,
        pending: usize,
        failed: LogId,
        error: TransportError,
    },
}

impl fmt::Display for SyncReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Skipped(reason) => write!(f, "sync skipped: {reason}"),
            Self::Completed { delivered: 0 } => f.write_str("nothing to sync"),
            Self::Completed { delivered } => write!(f, "synced {delivered} log(s)"),
            Self::Halted {
                pending,
                failed,
                error,
                ..
            } => write!(
                f,
                "sync stopped at log {failed} ({error}); {pending} log(s) still queued"
            ),
        }
    }
}

/// Explicit online/offline state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Connectivity {
    online: bool,
}

impl Connectivity {
    pub const fn new(online: bool) -> Self {
        Self { online }
    }

    pub const fn is_online(&self) -> bool {
        self.online
    }

    /// Updates the state. Returns `true` on an offline to online transition.
    pub const fn set_online(&mut self, online: bool) -> bool {
        let came_online = online && !self.online;
        self.online = online;
        came_online
    }
}

impl Default for Connectivity {
    fn default() -> Self {
        Self::new(true)
    }
}

/// Delivers queued logs to an optional remote sink.
pub struct Synchronizer {
    sink: Option<Box<dyn RemoteSink>>,
}

impl fmt::Debug for Synchronizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Synchronizer")
            .field("configured", &self.sink.is_some())
            .finish()
    }
}

impl Synchronizer {
    pub fn new(sink: Option<Box<dyn RemoteSink>>) -> Self {
        Self { sink }
    }

    /// A synchronizer posting over HTTP, or an unconfigured one without an endpoint.
    pub fn from_endpoint(endpoint: Option<&str>) -> Result<Self, TransportError> {
        let sink = match endpoint.map(str::trim).filter(|url| !url.is_empty()) {
            Some(url) => Some(Box::new(HttpSink::new(url)?) as Box<dyn RemoteSink>),
            None => None,
        };
        Ok(Self::new(sink))
    }

    pub const fn is_configured(&self) -> bool {
        self.sink.is_some()
    }

    /// Runs one sync pass over the store's outbox.
    pub async fn try_sync<S: LogStore>(
        &self,
        store: &mut S,
        connectivity: Connectivity,
    ) -> Result<SyncReport, SyncError> {
        if !connectivity.is_online() {
            tracing::debug!("sync skipped while offline");
            return Ok(SyncReport::Skipped(SyncSkip::Offline));
        }
        let Some(sink) = self.sink.as_deref() else {
            tracing::debug!("sync skipped without endpoint");
            return Ok(SyncReport::Skipped(SyncSkip::NotConfigured));
        };

        let queued = store.list_not_synced().map_err(SyncError::store)?;
        if queued.is_empty() {
            return Ok(SyncReport::Completed { delivered: 0 });
        }

        let mut delivered = Vec::with_capacity(queued.len());
        for record in &queued {
            tracing::debug!(id = %record.id, "posting log");
            if let Err(error) = sink.post_record(record).await {
                tracing::warn!(id = %record.id, %error, "sync halted");
                return Ok(SyncReport::Halted {
                    attempted: delivered.len() + 1,
                    pending: queued.len(),
                    failed: record.id,
                    error,
                });
            }
            delivered.push(record.id);
        }

        store.clear_delivered(&delivered).map_err(SyncError::store)?;
        tracing::info!(delivered = delivered.len(), "outbox drained");
        Ok(SyncReport::Completed {
            delivered: delivered.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::{DateTime, NaiveDate, Utc};
    use tl_core::{LogEntry, LogRecord};
    use tl_db::Database;

    /// Records posted notes; fails on the given 1-based call numbers.
    #[derive(Default)]
    struct StubSink {
        fail_on: Vec<usize>,
        calls: Mutex<Vec<String>>,
    }

    impl StubSink {
        fn failing_on(calls: &[usize]) -> Self {
            Self {
                fail_on: calls.to_vec(),
                calls: Mutex::default(),
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl RemoteSink for StubSink {
        async fn post_record(&self, record: &LogRecord) -> Result<(), TransportError> {
            let mut calls = self.calls.lock().unwrap();
            calls.push(record.entry.note.clone());
            if self.fail_on.contains(&calls.len()) {
                Err(TransportError::NotAcknowledged)
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl RemoteSink for std::sync::Arc<StubSink> {
        async fn post_record(&self, record: &LogRecord) -> Result<(), TransportError> {
            self.as_ref().post_record(record).await
        }
    }

    fn entry(note: &str) -> LogEntry {
        let at = DateTime::parse_from_rfc3339("2025-01-01T08:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        LogEntry {
            date: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
            departure_name: "A".to_string(),
            arrival_name: "B".to_string(),
            departure_time: at,
            arrival_time: at,
            driving_minutes: 0,
            break_minutes: 0,
            distance_km: 0.0,
            fuel_litres: 0.0,
            fuel_cost: 0.0,
            departure_lat: 0.0,
            departure_lng: 0.0,
            arrival_lat: 0.0,
            arrival_lng: 0.0,
            note: note.to_string(),
        }
    }

    fn queued_db(notes: &[&str]) -> Database {
        let mut db = Database::open_in_memory().unwrap();
        for note in notes {
            db.append(&entry(note), true).unwrap();
        }
        db
    }

    fn pending_notes(db: &Database) -> Vec<String> {
        db.list_not_synced()
            .unwrap()
            .into_iter()
            .map(|r| r.entry.note)
            .collect()
    }

    fn synchronizer(stub: &std::sync::Arc<StubSink>) -> Synchronizer {
        Synchronizer::new(Some(Box::new(std::sync::Arc::clone(stub))))
    }

    #[tokio::test]
    async fn failure_halts_pass_and_keeps_queue() {
        let stub = std::sync::Arc::new(StubSink::failing_on(&[2]));
        let sync = synchronizer(&stub);
        let mut db = queued_db(&["one", "two", "three"]);

        let report = sync.try_sync(&mut db, Connectivity::new(true)).await.unwrap();

        assert!(matches!(
            report,
            SyncReport::Halted {
                attempted: 2,
                pending: 3,
                ..
            }
        ));
        assert_eq!(stub.calls(), vec!["one", "two"]);
        assert_eq!(pending_notes(&db), vec!["one", "two", "three"]);
    }

    #[tokio::test]
    async fn full_success_clears_outbox_only() {
        let stub = std::sync::Arc::new(StubSink::default());
        let sync = synchronizer(&stub);
        let mut db = queued_db(&["one", "two", "three", "four"]);

        let report = sync.try_sync(&mut db, Connectivity::new(true)).await.unwrap();

        assert!(matches!(report, SyncReport::Completed { delivered: 4 }));
        assert_eq!(stub.calls(), vec!["one", "two", "three", "four"]);
        assert!(pending_notes(&db).is_empty());
        assert_eq!(db.list_all().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn retry_after_failure_resends_from_front() {
        let stub = std::sync::Arc::new(StubSink::failing_on(&[1]));
        let sync = synchronizer(&stub);
        let mut db = queued_db(&["one", "two"]);

        sync.try_sync(&mut db, Connectivity::new(true)).await.unwrap();
        let report = sync.try_sync(&mut db, Connectivity::new(true)).await.unwrap();

        assert!(matches!(report, SyncReport::Completed { delivered: 2 }));
        assert_eq!(stub.calls(), vec!["one", "one", "two"]);
        assert!(pending_notes(&db).is_empty());
    }

    #[tokio::test]
    async fn offline_pass_is_a_no_op() {
        let stub = std::sync::Arc::new(StubSink::default());
        let sync = synchronizer(&stub);
        let mut db = queued_db(&["one"]);

        let report = sync.try_sync(&mut db, Connectivity::new(false)).await.unwrap();

        assert!(matches!(report, SyncReport::Skipped(SyncSkip::Offline)));
        assert!(stub.calls().is_empty());
        assert_eq!(pending_notes(&db), vec!["one"]);
    }

    #[tokio::test]
    async fn missing_endpoint_is_a_no_op() {
        let sync = Synchronizer::from_endpoint(None).unwrap();
        assert!(!sync.is_configured());
        let mut db = queued_db(&["one"]);

        let report = sync.try_sync(&mut db, Connectivity::new(true)).await.unwrap();

        assert!(matches!(report, SyncReport::Skipped(SyncSkip::NotConfigured)));
        assert_eq!(pending_notes(&db), vec!["one"]);
    }

    #[tokio::test]
    async fn empty_queue_is_safe_to_repeat() {
        let stub = std::sync::Arc::new(StubSink::default());
        let sync = synchronizer(&stub);
        let mut db = queued_db(&[]);

        for _ in 0..2 {
            let report = sync.try_sync(&mut db, Connectivity::new(true)).await.unwrap();
            assert!(matches!(report, SyncReport::Completed { delivered: 0 }));
        }
        assert!(stub.calls().is_empty());
    }

    #[test]
    fn blank_endpoint_counts_as_unconfigured() {
        assert!(!Synchronizer::from_endpoint(Some("   ")).unwrap().is_configured());
        assert!(
            Synchronizer::from_endpoint(Some("https://example.com/exec"))
                .unwrap()
                .is_configured()
        );
    }

    #[test]
    fn connectivity_reports_transition_to_online() {
        let mut connectivity = Connectivity::new(false);
        assert!(connectivity.set_online(true));
        assert!(!connectivity.set_online(true));
        assert!(!connectivity.set_online(false));
        assert!(!connectivity.is_online());
    }

    #[test]
    fn report_display_is_human_readable() {
        assert_eq!(
            SyncReport::Skipped(SyncSkip::Offline).to_string(),
            "sync skipped: offline"
        );
        assert_eq!(
            SyncReport::Completed { delivered: 2 }.to_string(),
            "synced 2 log(s)"
        );
    }
}
