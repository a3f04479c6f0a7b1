//! The driving session state machine.
//!
//! [`SessionEngine`] is either idle (no [`Session`]) or active. While active
//! it accrues distance from location updates, tracks break and rest
//! intervals independently, and records fuel stops. Ending a session turns
//! it into a [`LogEntry`] and returns the engine to idle.
//!
//! Every operation has an `_at` variant taking the current instant so the
//! arithmetic can be tested without a clock.

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::geo::{Coordinate, LatLng, distance_km, is_significant_step, maps_link};
use crate::location::Subscription;
use crate::note::{NoteInputs, compose_note};
use crate::types::{
    FuelEvent, Interval, IntervalKind, LogEntry, ValidationError, local_date, ms_to_minutes,
    round_km, total_ms,
};

/// Session engine errors.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SessionError {
    /// A session is already running.
    #[error("a driving session is already active")]
    AlreadyActive,
    /// The operation needs a running session.
    #[error("no driving session is active")]
    NotActive,
    /// User input was rejected.
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

impl SessionError {
    /// Whether the error is an invalid state transition.
    pub const fn is_precondition(&self) -> bool {
        matches!(self, Self::AlreadyActive | Self::NotActive)
    }
}

/// One continuous driving period.
#[derive(Debug)]
pub struct Session {
    start_time: DateTime<Utc>,
    start_coord: Coordinate,
    track_points: Vec<Coordinate>,
    accumulated_distance_km: f64,
    breaks: Vec<Interval>,
    rests: Vec<Interval>,
    fuel_events: Vec<FuelEvent>,
    subscription: Subscription,
}

impl Session {
    fn new(start_time: DateTime<Utc>, start_coord: Coordinate, subscription: Subscription) -> Self {
        Self {
            start_time,
            start_coord,
            track_points: vec![start_coord],
            accumulated_distance_km: 0.0,
            breaks: Vec::new(),
            rests: Vec::new(),
            fuel_events: Vec::new(),
            subscription,
        }
    }

    pub const fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    pub const fn start_coord(&self) -> &Coordinate {
        &self.start_coord
    }

    pub fn track_points(&self) -> &[Coordinate] {
        &self.track_points
    }

    pub const fn accumulated_distance_km(&self) -> f64 {
        self.accumulated_distance_km
    }

    pub fn breaks(&self) -> &[Interval] {
        &self.breaks
    }

    pub fn rests(&self) -> &[Interval] {
        &self.rests
    }

    pub fn fuel_events(&self) -> &[FuelEvent] {
        &self.fuel_events
    }

    pub fn is_on_break(&self) -> bool {
        self.breaks.last().is_some_and(Interval::is_open)
    }

    pub fn is_resting(&self) -> bool {
        self.rests.last().is_some_and(Interval::is_open)
    }

    fn last_point(&self) -> &Coordinate {
        // The start point is never removed.
        self.track_points.last().unwrap_or(&self.start_coord)
    }

    fn intervals_mut(&mut self, kind: IntervalKind) -> &mut Vec<Interval> {
        match kind {
            IntervalKind::Break => &mut self.breaks,
            IntervalKind::Rest => &mut self.rests,
        }
    }
}

/// Whether a toggle opened or closed an interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Toggle {
    Opened,
    Closed,
}

/// Caller-supplied details for ending a session.
#[derive(Debug, Clone, Default)]
pub struct EndOptions {
    /// Where the session ended. Defaults to the last accepted track point.
    pub end_coord: Option<Coordinate>,
    pub note: String,
    pub departure_name: Option<String>,
    pub arrival_name: Option<String>,
}

/// Live figures for a running session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: i64,
    pub distance_km: f64,
    pub track_points: usize,
    pub on_break: bool,
    pub resting: bool,
    pub break_ms: i64,
    pub rest_ms: i64,
    pub fuel_litres: f64,
    pub fuel_cost: f64,
}

/// Owner of the at-most-one active session.
#[derive(Debug, Default)]
pub struct SessionEngine {
    session: Option<Session>,
}

impl SessionEngine {
    pub const fn new() -> Self {
        Self { session: None }
    }

    pub const fn is_active(&self) -> bool {
        self.session.is_some()
    }

    pub const fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// Starts a session at `initial` with the given location stream.
    pub fn start_session(
        &mut self,
        initial: Coordinate,
        subscription: Subscription,
    ) -> Result<&Session, SessionError> {
        self.start_session_at(initial, subscription, Utc::now())
    }

    pub fn start_session_at(
        &mut self,
        initial: Coordinate,
        mut subscription: Subscription,
        now: DateTime<Utc>,
    ) -> Result<&Session, SessionError> {
        if self.session.is_some() {
            subscription.cancel();
            return Err(SessionError::AlreadyActive);
        }
        tracing::info!(lat = initial.lat, lng = initial.lng, "session started");
        Ok(&*self
            .session
            .insert(Session::new(now, initial, subscription)))
    }

    /// Applies a location update. Returns whether the point was kept.
    pub fn on_location_update(&mut self, coord: Coordinate) -> bool {
        let Some(session) = self.session.as_mut() else {
            return false;
        };
        let delta = distance_km(session.last_point(), &coord);
        if !is_significant_step(delta) {
            tracing::debug!(delta_m = delta * 1000.0, "discarded location jitter");
            return false;
        }
        session.track_points.push(coord);
        session.accumulated_distance_km += delta;
        tracing::debug!(
            delta_km = delta,
            total_km = session.accumulated_distance_km,
            "accepted track point"
        );
        true
    }

    /// Waits for the next coordinate from the active session's stream.
    ///
    /// Never resolves while idle or after the stream has ended.
    pub async fn next_location(&mut self) -> Coordinate {
        let next = match self.session.as_mut() {
            Some(session) => session.subscription.next().await,
            None => None,
        };
        match next {
            Some(coord) => coord,
            None => std::future::pending().await,
        }
    }

    pub fn toggle_break(&mut self, coord: Option<LatLng>) -> Result<Toggle, SessionError> {
        self.toggle_at(IntervalKind::Break, coord, Utc::now())
    }

    pub fn toggle_rest(&mut self, coord: Option<LatLng>) -> Result<Toggle, SessionError> {
        self.toggle_at(IntervalKind::Rest, coord, Utc::now())
    }

    /// Closes the open interval of `kind`, or opens a new one.
    pub fn toggle_at(
        &mut self,
        kind: IntervalKind,
        coord: Option<LatLng>,
        now: DateTime<Utc>,
    ) -> Result<Toggle, SessionError> {
        let session = self.session.as_mut().ok_or(SessionError::NotActive)?;
        let intervals = session.intervals_mut(kind);
        let toggle = match intervals.last_mut() {
            Some(open) if open.is_open() => {
                open.end = Some(now);
                open.end_coord = coord;
                Toggle::Closed
            }
            _ => {
                intervals.push(Interval::open(now, coord));
                Toggle::Opened
            }
        };
        tracing::info!(%kind, ?toggle, "interval toggled");
        Ok(toggle)
    }

    pub fn add_fuel_event(
        &mut self,
        amount_litres: f64,
        cost: Option<f64>,
        coord: Option<LatLng>,
    ) -> Result<FuelEvent, SessionError> {
        self.add_fuel_event_at(amount_litres, cost, coord, Utc::now())
    }

    pub fn add_fuel_event_at(
        &mut self,
        amount_litres: f64,
        cost: Option<f64>,
        coord: Option<LatLng>,
        now: DateTime<Utc>,
    ) -> Result<FuelEvent, SessionError> {
        let session = self.session.as_mut().ok_or(SessionError::NotActive)?;
        let event = FuelEvent::new(now, amount_litres, cost, coord)?;
        tracing::info!(
            litres = event.amount_litres,
            cost = event.cost,
            "fuel stop recorded"
        );
        session.fuel_events.push(event.clone());
        Ok(event)
    }

    /// Current figures for the running session, if any.
    pub fn snapshot(&self, now: DateTime<Utc>) -> Option<SessionSnapshot> {
        let session = self.session.as_ref()?;
        Some(SessionSnapshot {
            started_at: session.start_time,
            elapsed_ms: now
                .signed_duration_since(session.start_time)
                .num_milliseconds(),
            distance_km: round_km(session.accumulated_distance_km),
            track_points: session.track_points.len(),
            on_break: session.is_on_break(),
            resting: session.is_resting(),
            break_ms: total_ms(&session.breaks, now),
            rest_ms: total_ms(&session.rests, now),
            fuel_litres: session.fuel_events.iter().map(|e| e.amount_litres).sum(),
            fuel_cost: session.fuel_events.iter().map(|e| e.cost).sum(),
        })
    }

    pub fn end_session(&mut self, options: EndOptions) -> Result<LogEntry, SessionError> {
        self.end_session_at(options, Utc::now())
    }

    /// Ends the session and materializes its log entry.
    pub fn end_session_at(
        &mut self,
        options: EndOptions,
        now: DateTime<Utc>,
    ) -> Result<LogEntry, SessionError> {
        let entry = self.closing_entry(options, now)?;
        self.close_session();
        Ok(entry)
    }

    /// Builds the log entry the session would end with at `now`, leaving
    /// the session running.
    ///
    /// Open intervals count up to `now`. Driving time is not clamped and can
    /// go negative if breaks and rests overlap.
    pub fn closing_entry(
        &self,
        options: EndOptions,
        now: DateTime<Utc>,
    ) -> Result<LogEntry, SessionError> {
        let session = self.session.as_ref().ok_or(SessionError::NotActive)?;

        let elapsed_ms = now
            .signed_duration_since(session.start_time)
            .num_milliseconds();
        let break_ms = total_ms(&session.breaks, now);
        let rest_ms = total_ms(&session.rests, now);
        let driving_ms = elapsed_ms - break_ms - rest_ms;

        let departure = session.start_coord.lat_lng();
        let arrival = options
            .end_coord
            .unwrap_or(*session.last_point())
            .lat_lng();

        let note = compose_note(&NoteInputs {
            user_note: &options.note,
            breaks: &session.breaks,
            rests: &session.rests,
            fuel_events: &session.fuel_events,
            now,
        });

        let entry = LogEntry {
            date: local_date(session.start_time),
            departure_name: non_empty(options.departure_name).unwrap_or_else(|| maps_link(departure)),
            arrival_name: non_empty(options.arrival_name).unwrap_or_else(|| maps_link(arrival)),
            departure_time: session.start_time,
            arrival_time: now,
            driving_minutes: ms_to_minutes(driving_ms),
            break_minutes: ms_to_minutes(break_ms),
            distance_km: round_km(session.accumulated_distance_km),
            fuel_litres: session.fuel_events.iter().map(|e| e.amount_litres).sum(),
            fuel_cost: session.fuel_events.iter().map(|e| e.cost).sum(),
            departure_lat: departure.lat,
            departure_lng: departure.lng,
            arrival_lat: arrival.lat,
            arrival_lng: arrival.lng,
            note,
        };
        Ok(entry)
    }

    /// Drops the running session and stops its location stream.
    ///
    /// Returns whether a session was running.
    pub fn close_session(&mut self) -> bool {
        let Some(mut session) = self.session.take() else {
            return false;
        };
        session.subscription.cancel();
        tracing::info!(
            track_points = session.track_points.len(),
            distance_km = session.accumulated_distance_km,
            "session ended"
        );
        true
    }
}

fn non_empty(name: Option<String>) -> Option<String> {
    name.map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
}
