//! Core record types with validation.

use std::fmt;

use chrono::{DateTime, Local, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::geo::LatLng;

/// Validation errors for user-supplied input.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    /// Fuel amount must be a positive number of litres.
    #[error("fuel amount must be greater than zero, got {value}")]
    NonPositiveFuel { value: f64 },

    /// A coordinate was out of range or not a number.
    #[error("invalid coordinate ({lat}, {lng})")]
    InvalidCoordinate { lat: f64, lng: f64 },

    /// The provided value was empty.
    #[error("{field} cannot be empty")]
    Empty { field: &'static str },
}

/// The two kinds of pause a driver can log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntervalKind {
    Break,
    Rest,
}

impl IntervalKind {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Break => "break",
            Self::Rest => "rest",
        }
    }

    /// Capitalized label used in generated notes.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Break => "Break",
            Self::Rest => "Rest",
        }
    }
}

impl fmt::Display for IntervalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A start/optional-end span used for breaks and rests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interval {
    pub start: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_coord: Option<LatLng>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_coord: Option<LatLng>,
}

impl Interval {
    pub const fn open(start: DateTime<Utc>, start_coord: Option<LatLng>) -> Self {
        Self {
            start,
            end: None,
            start_coord,
            end_coord: None,
        }
    }

    pub const fn is_open(&self) -> bool {
        self.end.is_none()
    }

    /// Length of the interval, measuring an open interval up to `now`.
    pub fn duration_ms(&self, now: DateTime<Utc>) -> i64 {
        let end = self.end.unwrap_or(now);
        end.signed_duration_since(self.start).num_milliseconds()
    }
}

/// Total length of a list of intervals in milliseconds.
pub fn total_ms(intervals: &[Interval], now: DateTime<Utc>) -> i64 {
    intervals.iter().map(|interval| interval.duration_ms(now)).sum()
}

/// A refuelling stop. Never mutated after it is appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FuelEvent {
    pub time: DateTime<Utc>,
    pub amount_litres: f64,
    pub cost: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coord: Option<LatLng>,
}

impl FuelEvent {
    /// Builds a fuel event, rejecting non-positive amounts and clamping cost.
    pub fn new(
        time: DateTime<Utc>,
        amount_litres: f64,
        cost: Option<f64>,
        coord: Option<LatLng>,
    ) -> Result<Self, ValidationError> {
        let amount_litres = Self::check_amount(amount_litres)?;
        let cost = match cost {
            Some(value) if value.is_finite() && value > 0.0 => value,
            _ => 0.0,
        };
        Ok(Self {
            time,
            amount_litres,
            cost,
            coord,
        })
    }

    /// Accepts finite amounts above zero.
    pub fn check_amount(amount_litres: f64) -> Result<f64, ValidationError> {
        if amount_litres.is_finite() && amount_litres > 0.0 {
            Ok(amount_litres)
        } else {
            Err(ValidationError::NonPositiveFuel {
                value: amount_litres,
            })
        }
    }
}

/// Identity assigned to a log by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LogId(i64);

impl LogId {
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for LogId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The content of a driving log, before or after it is stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub date: NaiveDate,
    pub departure_name: String,
    pub arrival_name: String,
    pub departure_time: DateTime<Utc>,
    pub arrival_time: DateTime<Utc>,
    pub driving_minutes: i64,
    pub break_minutes: i64,
    pub distance_km: f64,
    pub fuel_litres: f64,
    pub fuel_cost: f64,
    pub departure_lat: f64,
    pub departure_lng: f64,
    pub arrival_lat: f64,
    pub arrival_lng: f64,
    pub note: String,
}

/// A stored log with its identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub id: LogId,
    #[serde(flatten)]
    pub entry: LogEntry,
}

/// Calendar date of an instant in the local time zone.
pub fn local_date(instant: DateTime<Utc>) -> NaiveDate {
    instant.with_timezone(&Local).date_naive()
}

/// Rounds a distance to metre precision (three decimals of a kilometre).
pub fn round_km(km: f64) -> f64 {
    (km * 1000.0).round() / 1000.0
}

/// Converts milliseconds to whole minutes, rounding to nearest.
pub fn ms_to_minutes(ms: i64) -> i64 {
    let minutes = ms / 60_000;
    let remainder = ms % 60_000;
    if remainder >= 30_000 {
        minutes + 1
    } else if remainder <= -30_000 {
        minutes - 1
    } else {
        minutes
    }
}
