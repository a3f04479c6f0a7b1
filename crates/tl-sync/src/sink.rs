//! Remote log sink and its wire format.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use tl_core::LogRecord;

/// Default request timeout for sink posts.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Transport errors. Always retryable.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The endpoint URL was empty.
    #[error("invalid endpoint: {reason}")]
    InvalidEndpoint { reason: &'static str },
    /// Failed to build HTTP client.
    #[error("failed to build HTTP client: {0}")]
    ClientBuild(#[source] reqwest::Error),
    /// HTTP request failed.
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    /// The sink answered with a non-success status.
    #[error("sink returned status {status}: {body}")]
    Status { status: u16, body: String },
    /// The sink answered without `"ok": true`.
    #[error("sink did not acknowledge the record")]
    NotAcknowledged,
    /// The response body was not JSON.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// Destination for finished logs.
#[async_trait]
pub trait RemoteSink: Send + Sync {
    /// Delivers one record. Succeeds only on an acknowledged delivery.
    async fn post_record(&self, record: &LogRecord) -> Result<(), TransportError>;
}

/// JSON body posted to the sink.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WireRecord<'a> {
    pub date: String,
    pub departure_name: &'a str,
    pub arrival_name: &'a str,
    pub departure_time: String,
    pub arrival_time: String,
    pub driving_minutes: i64,
    pub break_minutes: i64,
    pub distance_km: f64,
    pub fuel_litres: f64,
    pub fuel_cost: f64,
    pub departure_lat: f64,
    pub departure_lng: f64,
    pub arrival_lat: f64,
    pub arrival_lng: f64,
    pub note: &'a str,
}

impl<'a> From<&'a LogRecord> for WireRecord<'a> {
    fn from(record: &'a LogRecord) -> Self {
        let entry = &record.entry;
        Self {
            date: format_date(entry.date),
            departure_name: &entry.departure_name,
            arrival_name: &entry.arrival_name,
            departure_time: format_time(entry.departure_time),
            arrival_time: format_time(entry.arrival_time),
            driving_minutes: entry.driving_minutes,
            break_minutes: entry.break_minutes,
            distance_km: entry.distance_km,
            fuel_litres: entry.fuel_litres,
            fuel_cost: entry.fuel_cost,
            departure_lat: entry.departure_lat,
            departure_lng: entry.departure_lng,
            arrival_lat: entry.arrival_lat,
            arrival_lng: entry.arrival_lng,
            note: &entry.note,
        }
    }
}

fn format_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

fn format_time(instant: DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Whether a sink response body acknowledges the delivery.
pub fn is_acknowledged(body: &Value) -> bool {
    body.get("ok") == Some(&Value::Bool(true))
}

/// Posts records as JSON to a web app endpoint (e.g., a spreadsheet script).
///
/// # Thread Safety
///
/// The sink is safe to share across threads. Clones of the inner client
/// share the HTTP connection pool.
pub struct HttpSink {
    http: reqwest::Client,
    endpoint: String,
}

impl fmt::Debug for HttpSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpSink")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

impl HttpSink {
    /// Creates a sink posting to `endpoint`.
    pub fn new(endpoint: impl Into<String>) -> Result<Self, TransportError> {
        let endpoint = endpoint.into();
        if endpoint.trim().is_empty() {
            return Err(TransportError::InvalidEndpoint {
                reason: "endpoint cannot be empty",
            });
        }

        let http = reqwest::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(TransportError::ClientBuild)?;

        Ok(Self { http, endpoint })
    }
}

#[async_trait]
impl RemoteSink for HttpSink {
    async fn post_record(&self, record: &LogRecord) -> Result<(), TransportError> {
        let response = self
            .http
            .post(&self.endpoint)
            .json(&WireRecord::from(record))
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let payload: Value = serde_json::from_str(&body)
            .map_err(|err| TransportError::InvalidResponse(err.to_string()))?;
        if is_acknowledged(&payload) {
            Ok(())
        } else {
            Err(TransportError::NotAcknowledged)
        }
    }
}
