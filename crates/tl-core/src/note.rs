//! Composition of the free-text note attached to a finished log.

use chrono::{DateTime, SecondsFormat, Utc};

use crate::geo::LatLng;
use crate::types::{FuelEvent, Interval, IntervalKind, ms_to_minutes, total_ms};

/// Separator between the user's note and each generated line.
pub const NOTE_SEPARATOR: &str = " | ";

/// Everything a note summarises.
#[derive(Debug, Clone, Copy)]
pub struct NoteInputs<'a> {
    pub user_note: &'a str,
    pub breaks: &'a [Interval],
    pub rests: &'a [Interval],
    pub fuel_events: &'a [FuelEvent],
    pub now: DateTime<Utc>,
}

/// Joins the user's note with one line per interval and fuel stop.
pub fn compose_note(inputs: &NoteInputs<'_>) -> String {
    let mut parts = Vec::new();
    let user_note = inputs.user_note.trim();
    if !user_note.is_empty() {
        parts.push(user_note.to_string());
    }
    parts.extend(
        inputs
            .breaks
            .iter()
            .map(|interval| interval_line(IntervalKind::Break, interval)),
    );
    parts.extend(
        inputs
            .rests
            .iter()
            .map(|interval| interval_line(IntervalKind::Rest, interval)),
    );
    parts.extend(inputs.fuel_events.iter().map(fuel_line));

    let rest_minutes = ms_to_minutes(total_ms(inputs.rests, inputs.now));
    if rest_minutes > 0 {
        parts.push(format!("Total rest: {rest_minutes} min"));
    }
    parts.join(NOTE_SEPARATOR)
}

fn interval_line(kind: IntervalKind, interval: &Interval) -> String {
    let start = with_coord(&format_instant(interval.start), interval.start_coord);
    let end = interval.end.map_or_else(
        || "open".to_string(),
        |end| with_coord(&format_instant(end), interval.end_coord),
    );
    format!("{} {start} -> {end}", kind.label())
}

fn fuel_line(event: &FuelEvent) -> String {
    let at = with_coord(&format_instant(event.time), event.coord);
    format!(
        "Fuel {at} {} L, cost {}",
        trim_number(event.amount_litres),
        trim_number(event.cost)
    )
}

fn with_coord(instant: &str, coord: Option<LatLng>) -> String {
    match coord {
        Some(position) => format!("{instant} ({:.5}, {:.5})", position.lat, position.lng),
        None => instant.to_string(),
    }
}

fn format_instant(instant: DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Prints `10.5` as `10.5` and `3000.0` as `3000`.
fn trim_number(value: f64) -> String {
    let rendered = format!("{value:.3}");
    let rendered = rendered.trim_end_matches('0').trim_end_matches('.');
    rendered.to_string()
}
