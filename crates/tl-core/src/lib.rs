//! Core domain logic for the transport log.
//!
//! This crate contains the fundamental types and logic for:
//! - Geometry: haversine distance and the track-point noise filter
//! - Sessions: the driving session state machine and note composition
//! - Contracts for the persistent store and the location stream

pub mod geo;
pub mod location;
mod note;
pub mod session;
pub mod store;
pub mod types;

pub use geo::{Coordinate, LatLng, distance_km, maps_link};
pub use location::{LocationError, LocationSource, NoLocation, Subscription, fix_or_fallback};
pub use note::{NOTE_SEPARATOR, NoteInputs, compose_note};
pub use session::{EndOptions, Session, SessionEngine, SessionError, SessionSnapshot, Toggle};
pub use store::LogStore;
pub use types::{
    FuelEvent, Interval, IntervalKind, LogEntry, LogId, LogRecord, ValidationError, local_date,
};
