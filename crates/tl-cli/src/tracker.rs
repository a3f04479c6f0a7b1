//! Application context for a driving session.
//!
//! The [`Tracker`] owns everything the drive loop touches: the session
//! engine, the log store, the synchronizer, the location source and the
//! connectivity flag. Each action either completes or fails on its own;
//! nothing here ends the process.

use std::fmt;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use tokio::sync::watch;

use tl_core::{
    Coordinate, EndOptions, FuelEvent, IntervalKind, LatLng, LocationError, LocationSource,
    LogEntry, LogId, LogStore, SessionEngine, SessionError, SessionSnapshot, Subscription, Toggle,
    fix_or_fallback,
};
use tl_sync::{Connectivity, SyncError, SyncReport, Synchronizer};

/// Result of asking the tracker to start a session.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StartOutcome {
    Started(Coordinate),
    /// A session was already running; nothing changed.
    AlreadyActive,
}

/// The sync pass that follows a save.
///
/// The log is stored and queued either way.
#[derive(Debug)]
pub enum AfterSave {
    Synced(SyncReport),
    SyncFailed(SyncError),
}

impl fmt::Display for AfterSave {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Synced(report) => fmt::Display::fmt(report, f),
            Self::SyncFailed(err) => write!(f, "log queued, sync failed: {err}"),
        }
    }
}

/// A finished session after it was stored.
#[derive(Debug)]
pub struct Ended {
    pub id: LogId,
    pub entry: LogEntry,
    pub report: AfterSave,
}

pub struct Tracker<S> {
    engine: SessionEngine,
    store: S,
    sync: Synchronizer,
    location: Box<dyn LocationSource>,
    connectivity: Connectivity,
    location_timeout: Duration,
    snapshots: watch::Sender<Option<SessionSnapshot>>,
}

impl<S: LogStore> Tracker<S> {
    pub fn new(
        store: S,
        sync: Synchronizer,
        location: Box<dyn LocationSource>,
        connectivity: Connectivity,
        location_timeout: Duration,
    ) -> Self {
        let (snapshots, _) = watch::channel(None);
        Self {
            engine: SessionEngine::new(),
            store,
            sync,
            location,
            connectivity,
            location_timeout,
            snapshots,
        }
    }

    pub const fn engine(&self) -> &SessionEngine {
        &self.engine
    }

    pub const fn store(&self) -> &S {
        &self.store
    }

    pub const fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub const fn is_online(&self) -> bool {
        self.connectivity.is_online()
    }

    /// Receiver for the snapshots published by [`Tracker::refresh`].
    pub fn snapshots(&self) -> watch::Receiver<Option<SessionSnapshot>> {
        self.snapshots.subscribe()
    }

    /// Starts a session at the current fix, or at `fallback` when no fix
    /// arrives in time.
    pub async fn start(&mut self, fallback: Option<LatLng>) -> Result<StartOutcome> {
        if self.engine.is_active() {
            tracing::info!("session already active, start ignored");
            return Ok(StartOutcome::AlreadyActive);
        }

        let subscription = self.location.subscribe().unwrap_or_else(|err| {
            tracing::warn!(%err, "location stream unavailable, tracking start point only");
            Subscription::detached()
        });

        let now = Utc::now();
        let Some(initial) = fix_or_fallback(
            self.location.as_mut(),
            self.location_timeout,
            fallback,
            now.timestamp_millis(),
        )
        .await
        else {
            drop(subscription);
            return Err(LocationError::Unavailable {
                reason: "no starting fix and no manual coordinate".to_string(),
            }
            .into());
        };

        self.engine.start_session_at(initial, subscription, now)?;
        self.refresh(now);
        Ok(StartOutcome::Started(initial))
    }

    /// Waits for the next coordinate of the running session.
    pub async fn next_location(&mut self) -> Coordinate {
        self.engine.next_location().await
    }

    pub fn on_location(&mut self, coord: Coordinate) -> bool {
        self.engine.on_location_update(coord)
    }

    pub async fn toggle_break(&mut self, manual: Option<LatLng>) -> Result<Toggle> {
        self.toggle(IntervalKind::Break, manual).await
    }

    pub async fn toggle_rest(&mut self, manual: Option<LatLng>) -> Result<Toggle> {
        self.toggle(IntervalKind::Rest, manual).await
    }

    async fn toggle(&mut self, kind: IntervalKind, manual: Option<LatLng>) -> Result<Toggle> {
        self.ensure_active()?;
        let coord = self.resolve_fix(manual).await.map(|c| c.lat_lng());
        let toggle = self.engine.toggle_at(kind, coord, Utc::now())?;
        self.refresh(Utc::now());
        Ok(toggle)
    }

    /// Records a fuel stop. The amount is checked before waiting on a fix.
    pub async fn add_fuel(
        &mut self,
        amount_litres: f64,
        cost: Option<f64>,
        manual: Option<LatLng>,
    ) -> Result<FuelEvent> {
        self.ensure_active()?;
        FuelEvent::check_amount(amount_litres).map_err(SessionError::from)?;
        let coord = self.resolve_fix(manual).await.map(|c| c.lat_lng());
        let event = self
            .engine
            .add_fuel_event_at(amount_litres, cost, coord, Utc::now())?;
        self.refresh(Utc::now());
        Ok(event)
    }

    /// Ends the session, stores its log and tries to deliver the outbox.
    ///
    /// `options.end_coord` is replaced by the manual coordinate or a fresh
    /// fix; without either the last track point is used. The session keeps
    /// running if the log cannot be stored.
    pub async fn end(&mut self, mut options: EndOptions, manual: Option<LatLng>) -> Result<Ended> {
        self.ensure_active()?;
        options.end_coord = self.resolve_fix(manual).await;
        let now = Utc::now();
        let entry = self.engine.closing_entry(options, now)?;
        let id = self.append(&entry)?;
        self.engine.close_session();
        self.refresh(now);
        let report = self.sync_after_save().await;
        Ok(Ended { id, entry, report })
    }

    /// Appends a log, queues it for delivery and runs a sync pass.
    ///
    /// Fails only when the log was not stored.
    pub async fn save_log(&mut self, entry: &LogEntry) -> Result<(LogId, AfterSave)> {
        let id = self.append(entry)?;
        Ok((id, self.sync_after_save().await))
    }

    fn append(&mut self, entry: &LogEntry) -> Result<LogId> {
        let id = self.store.append(entry, true)?;
        tracing::info!(%id, online = self.is_online(), "log saved and queued");
        Ok(id)
    }

    async fn sync_after_save(&mut self) -> AfterSave {
        match self.sync.try_sync(&mut self.store, self.connectivity).await {
            Ok(report) => AfterSave::Synced(report),
            Err(err) => {
                tracing::warn!(error = %err, "sync after save failed, log stays queued");
                AfterSave::SyncFailed(err)
            }
        }
    }

    pub async fn try_sync(&mut self) -> Result<SyncReport> {
        Ok(self.sync.try_sync(&mut self.store, self.connectivity).await?)
    }

    /// Updates connectivity. Coming back online triggers a sync pass.
    pub async fn set_online(&mut self, online: bool) -> Result<Option<SyncReport>> {
        if self.connectivity.set_online(online) {
            tracing::info!("back online");
            return Ok(Some(self.try_sync().await?));
        }
        tracing::info!(online, "connectivity updated");
        Ok(None)
    }

    /// Publishes the current session figures.
    pub fn refresh(&self, now: DateTime<Utc>) {
        self.snapshots.send_replace(self.engine.snapshot(now));
    }

    const fn ensure_active(&self) -> Result<(), SessionError> {
        if self.engine.is_active() {
            Ok(())
        } else {
            Err(SessionError::NotActive)
        }
    }

    async fn resolve_fix(&mut self, manual: Option<LatLng>) -> Option<Coordinate> {
        let now_ms = Utc::now().timestamp_millis();
        if let Some(position) = manual {
            return Some(Coordinate::at(position, now_ms));
        }
        fix_or_fallback(self.location.as_mut(), self.location_timeout, None, now_ms).await
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use tl_core::{LogRecord, Session};
    use tl_db::Database;
    use tl_sync::{RemoteSink, SyncSkip, TransportError};
    use tokio::sync::mpsc;

    /// Location source driven by the test through a channel.
    pub(crate) struct StubLocation {
        fix: Option<Coordinate>,
        feed: Option<mpsc::Receiver<Coordinate>>,
    }

    impl StubLocation {
        pub(crate) fn without_fix() -> Self {
            Self {
                fix: None,
                feed: None,
            }
        }

        pub(crate) fn with_feed(fix: Coordinate) -> (Self, mpsc::Sender<Coordinate>) {
            let (tx, rx) = mpsc::channel(16);
            (
                Self {
                    fix: Some(fix),
                    feed: Some(rx),
                },
                tx,
            )
        }
    }

    #[async_trait]
    impl LocationSource for StubLocation {
        async fn current_fix(&mut self) -> Result<Coordinate, LocationError> {
            self.fix.ok_or_else(|| LocationError::Unavailable {
                reason: "stub has no fix".to_string(),
            })
        }

        fn subscribe(&mut self) -> Result<Subscription, LocationError> {
            Ok(self
                .feed
                .take()
                .map_or_else(Subscription::detached, Subscription::from_receiver))
        }
    }

    /// Sink that acknowledges every post. Clones share the log of notes.
    #[derive(Clone, Default)]
    pub(crate) struct AcceptAll {
        pub(crate) posted: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl RemoteSink for AcceptAll {
        async fn post_record(&self, record: &LogRecord) -> Result<(), TransportError> {
            self.posted.lock().unwrap().push(record.entry.note.clone());
            Ok(())
        }
    }

    #[derive(Debug)]
    struct StoreFailure(&'static str);

    impl fmt::Display for StoreFailure {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(self.0)
        }
    }

    impl std::error::Error for StoreFailure {}

    /// In-memory database whose writes or outbox reads can be made to fail.
    struct FlakyStore {
        inner: Database,
        fail_append: bool,
        fail_outbox: bool,
    }

    impl FlakyStore {
        fn new() -> Self {
            Self {
                inner: Database::open_in_memory().unwrap(),
                fail_append: false,
                fail_outbox: false,
            }
        }
    }

    fn db_failure<E>(_: E) -> StoreFailure {
        StoreFailure("database error")
    }

    impl LogStore for FlakyStore {
        type Error = StoreFailure;

        fn append(&mut self, entry: &LogEntry, queue_for_sync: bool) -> Result<LogId, StoreFailure> {
            if self.fail_append {
                return Err(StoreFailure("disk full"));
            }
            self.inner.append(entry, queue_for_sync).map_err(db_failure)
        }

        fn get(&self, id: LogId) -> Result<Option<LogRecord>, StoreFailure> {
            self.inner.get(id).map_err(db_failure)
        }

        fn list_all(&self) -> Result<Vec<LogRecord>, StoreFailure> {
            self.inner.list_all().map_err(db_failure)
        }

        fn list_not_synced(&self) -> Result<Vec<LogRecord>, StoreFailure> {
            if self.fail_outbox {
                return Err(StoreFailure("outbox unreadable"));
            }
            self.inner.list_not_synced().map_err(db_failure)
        }

        fn clear_not_synced(&mut self) -> Result<usize, StoreFailure> {
            self.inner.clear_not_synced().map_err(db_failure)
        }

        fn clear_delivered(&mut self, ids: &[LogId]) -> Result<usize, StoreFailure> {
            self.inner.clear_delivered(ids).map_err(db_failure)
        }

        fn delete_by_id(&mut self, id: LogId) -> Result<bool, StoreFailure> {
            self.inner.delete_by_id(id).map_err(db_failure)
        }
    }

    fn flaky_tracker(store: FlakyStore, online: bool) -> Tracker<FlakyStore> {
        Tracker::new(
            store,
            Synchronizer::new(Some(Box::new(AcceptAll::default()))),
            Box::new(StubLocation::without_fix()),
            Connectivity::new(online),
            Duration::from_millis(50),
        )
    }

    fn tracker(location: StubLocation, online: bool) -> Tracker<Database> {
        Tracker::new(
            Database::open_in_memory().unwrap(),
            Synchronizer::new(None),
            Box::new(location),
            Connectivity::new(online),
            Duration::from_millis(50),
        )
    }

    fn session(tracker: &Tracker<Database>) -> &Session {
        tracker.engine().session().unwrap()
    }

    const DEPOT: LatLng = LatLng {
        lat: 35.0,
        lng: 139.0,
    };

    #[tokio::test]
    async fn start_falls_back_to_manual_coordinate() {
        let mut tracker = tracker(StubLocation::without_fix(), true);
        let outcome = tracker.start(Some(DEPOT)).await.unwrap();
        assert!(matches!(outcome, StartOutcome::Started(c) if c.lat_lng() == DEPOT));
        assert!(tracker.snapshots().borrow().is_some());
    }

    #[tokio::test]
    async fn start_without_any_position_fails() {
        let mut tracker = tracker(StubLocation::without_fix(), true);
        let err = tracker.start(None).await.unwrap_err();
        assert!(err.downcast_ref::<LocationError>().is_some());
        assert!(!tracker.engine().is_active());
    }

    #[tokio::test]
    async fn second_start_is_a_no_op() {
        let mut tracker = tracker(StubLocation::without_fix(), true);
        tracker.start(Some(DEPOT)).await.unwrap();
        let outcome = tracker.start(Some(LatLng::ZERO)).await.unwrap();
        assert_eq!(outcome, StartOutcome::AlreadyActive);
        assert_eq!(session(&tracker).track_points()[0].lat_lng(), DEPOT);
    }

    #[tokio::test]
    async fn location_feed_accumulates_distance() {
        let start = Coordinate::new(35.0, 139.0, 0);
        let (location, feed) = StubLocation::with_feed(start);
        let mut tracker = tracker(location, true);
        tracker.start(None).await.unwrap();

        // ~11 m, then ~1.1 km north
        feed.send(Coordinate::new(35.0001, 139.0, 1)).await.unwrap();
        feed.send(Coordinate::new(35.01, 139.0, 2)).await.unwrap();
        for _ in 0..2 {
            let coord = tracker.next_location().await;
            tracker.on_location(coord);
        }

        assert_eq!(session(&tracker).track_points().len(), 2);
        assert!((session(&tracker).accumulated_distance_km() - 1.112).abs() < 0.01);
    }

    #[tokio::test]
    async fn refresh_publishes_location_progress() {
        let start = Coordinate::new(35.0, 139.0, 0);
        let (location, feed) = StubLocation::with_feed(start);
        let mut tracker = tracker(location, true);
        tracker.start(None).await.unwrap();
        let view = tracker.snapshots();

        feed.send(Coordinate::new(35.01, 139.0, 1)).await.unwrap();
        let coord = tracker.next_location().await;
        assert!(tracker.on_location(coord));
        assert_eq!(view.borrow().as_ref().unwrap().track_points, 1);

        tracker.refresh(Utc::now());
        let snapshot = view.borrow().clone().unwrap();
        assert_eq!(snapshot.track_points, 2);
        assert!((snapshot.distance_km - 1.112).abs() < 0.01);
    }

    #[tokio::test]
    async fn actions_while_idle_are_precondition_errors() {
        let mut tracker = tracker(StubLocation::without_fix(), true);
        for err in [
            tracker.toggle_break(None).await.unwrap_err(),
            tracker.add_fuel(10.0, None, None).await.unwrap_err(),
            tracker.end(EndOptions::default(), None).await.unwrap_err(),
        ] {
            let err = err.downcast_ref::<SessionError>().unwrap();
            assert!(err.is_precondition());
        }
        assert!(tracker.store().list_all().unwrap().is_empty());
    }

    #[tokio::test]
    async fn invalid_fuel_is_rejected_and_session_survives() {
        let mut tracker = tracker(StubLocation::without_fix(), true);
        tracker.start(Some(DEPOT)).await.unwrap();
        let err = tracker.add_fuel(0.0, Some(100.0), None).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SessionError>(),
            Some(SessionError::Validation(_))
        ));
        let err = tracker.add_fuel(f64::INFINITY, None, None).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SessionError>(),
            Some(SessionError::Validation(_))
        ));
        assert!(tracker.engine().is_active());
        assert!(session(&tracker).fuel_events().is_empty());
    }

    #[tokio::test]
    async fn toggles_degrade_to_no_coordinate() {
        let mut tracker = tracker(StubLocation::without_fix(), true);
        tracker.start(Some(DEPOT)).await.unwrap();
        assert_eq!(tracker.toggle_break(None).await.unwrap(), Toggle::Opened);
        assert_eq!(
            tracker.toggle_break(Some(DEPOT)).await.unwrap(),
            Toggle::Closed
        );
        let closed = &session(&tracker).breaks()[0];
        assert!(closed.start_coord.is_none());
        assert_eq!(closed.end_coord, Some(DEPOT));
    }

    #[tokio::test]
    async fn fuel_round_trip_reaches_the_stored_log() {
        let mut tracker = tracker(StubLocation::without_fix(), true);
        tracker.start(Some(DEPOT)).await.unwrap();
        tracker.add_fuel(10.5, Some(3000.0), Some(DEPOT)).await.unwrap();

        let ended = tracker
            .end(EndOptions::default(), None)
            .await
            .unwrap();

        assert_eq!(ended.entry.fuel_litres, 10.5);
        assert_eq!(ended.entry.fuel_cost, 3000.0);
        assert!(ended.entry.note.contains("10.5 L, cost 3000"));
        assert!(matches!(
            ended.report,
            AfterSave::Synced(SyncReport::Skipped(SyncSkip::NotConfigured))
        ));
        let stored = tracker.store().get(ended.id).unwrap().unwrap();
        assert_eq!(stored.entry.note, ended.entry.note);
        assert_eq!(tracker.store().count_not_synced().unwrap(), 1);
        assert!(!tracker.engine().is_active());
    }

    #[tokio::test]
    async fn offline_save_is_delivered_after_coming_online() {
        let sink = AcceptAll::default();
        let mut tracker = Tracker::new(
            Database::open_in_memory().unwrap(),
            Synchronizer::new(Some(Box::new(sink.clone()))),
            Box::new(StubLocation::without_fix()),
            Connectivity::new(false),
            Duration::from_millis(50),
        );
        tracker.start(Some(DEPOT)).await.unwrap();
        let ended = tracker
            .end(
                EndOptions {
                    note: "offline run".to_string(),
                    ..EndOptions::default()
                },
                None,
            )
            .await
            .unwrap();

        assert!(matches!(
            ended.report,
            AfterSave::Synced(SyncReport::Skipped(SyncSkip::Offline))
        ));
        assert_eq!(tracker.store().count_not_synced().unwrap(), 1);

        let report = tracker.set_online(true).await.unwrap();
        assert!(matches!(report, Some(SyncReport::Completed { delivered: 1 })));
        assert_eq!(tracker.store().count_not_synced().unwrap(), 0);
        assert_eq!(tracker.store().list_all().unwrap().len(), 1);
        assert_eq!(sink.posted.lock().unwrap().as_slice(), ["offline run"]);

        // Already online: no transition, no pass.
        assert!(tracker.set_online(true).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn failed_store_keeps_session_running() {
        let mut store = FlakyStore::new();
        store.fail_append = true;
        let mut tracker = flaky_tracker(store, false);
        tracker.start(Some(DEPOT)).await.unwrap();
        tracker.add_fuel(10.5, Some(3000.0), Some(DEPOT)).await.unwrap();

        let err = tracker
            .end(EndOptions::default(), None)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "disk full");
        assert!(tracker.engine().is_active());
        let session = tracker.engine().session().unwrap();
        assert_eq!(session.fuel_events().len(), 1);
        assert_eq!(session.fuel_events()[0].amount_litres, 10.5);

        // Once the store recovers the same session ends normally.
        tracker.store_mut().fail_append = false;
        let ended = tracker.end(EndOptions::default(), None).await.unwrap();
        assert_eq!(ended.entry.fuel_litres, 10.5);
        assert!(!tracker.engine().is_active());
        assert_eq!(tracker.store().list_all().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn failed_sync_after_save_still_returns_the_id() {
        let mut store = FlakyStore::new();
        store.fail_outbox = true;
        let mut tracker = flaky_tracker(store, true);
        tracker.start(Some(DEPOT)).await.unwrap();

        let ended = tracker.end(EndOptions::default(), None).await.unwrap();
        assert!(matches!(ended.report, AfterSave::SyncFailed(_)));
        assert_eq!(
            ended.report.to_string(),
            "log queued, sync failed: store error: outbox unreadable"
        );
        assert!(!tracker.engine().is_active());

        let (id, report) = tracker.save_log(&ended.entry).await.unwrap();
        assert!(matches!(report, AfterSave::SyncFailed(_)));
        assert_ne!(id, ended.id);

        tracker.store_mut().fail_outbox = false;
        assert_eq!(tracker.store().count_not_synced().unwrap(), 2);
    }
}
