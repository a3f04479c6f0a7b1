//! Natural-language parsing of driving logs.
//!
//! Turns free text such as "left the depot at 8, reached Yokohama port at
//! 10:30, 15 minute break, 102 km, filled 40 L for 6800" into a structured
//! log using an OpenAI chat completion in JSON mode.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use thiserror::Error;

use tl_core::types::round_km;
use tl_core::{LogEntry, local_date};

/// Default request timeout for API calls.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);
const OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";
const PARSE_TEMPERATURE: f32 = 0.0;

/// Default chat model for parsing.
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// LLM client errors.
#[derive(Debug, Error)]
pub enum LlmError {
    /// No API key is configured.
    #[error("natural-language parsing needs OPENAI_API_KEY to be configured")]
    MissingApiKey,
    /// The provided API key was invalid.
    #[error("invalid API key: {reason}")]
    InvalidApiKey { reason: &'static str },
    /// Failed to build HTTP client.
    #[error("failed to build HTTP client: {0}")]
    ClientBuild(#[source] reqwest::Error),
    /// HTTP request failed.
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    /// API returned an error response.
    #[error("API error: {message}")]
    Api { message: String },
    /// Failed to parse response.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// OpenAI API client.
///
/// # Thread Safety
///
/// The client is safe to clone and share across threads. Each clone shares
/// the underlying HTTP connection pool.
#[derive(Clone)]
pub struct Client {
    http: reqwest::Client,
    api_key: String,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("api_key", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

impl Client {
    /// Creates a new client with the given API key.
    ///
    /// # Errors
    ///
    /// Returns an error if the API key is empty or whitespace-only, or if
    /// the HTTP client fails to build.
    pub fn new(api_key: impl Into<String>) -> Result<Self, LlmError> {
        let api_key = api_key.into();

        // Validate API key
        if api_key.is_empty() {
            return Err(LlmError::InvalidApiKey {
                reason: "API key cannot be empty",
            });
        }
        if api_key.trim().is_empty() {
            return Err(LlmError::InvalidApiKey {
                reason: "API key cannot be whitespace-only",
            });
        }

        // Build HTTP client with timeout
        let http = reqwest::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(LlmError::ClientBuild)?;

        Ok(Self { http, api_key })
    }

    /// Creates a client from an optional configured key.
    pub fn from_config(api_key: Option<&str>) -> Result<Self, LlmError> {
        match api_key {
            Some(key) => Self::new(key),
            None => Err(LlmError::MissingApiKey),
        }
    }

    /// Parses free text into a structured log.
    pub async fn parse_log(&self, model: &str, text: &str) -> Result<ParsedLog, LlmError> {
        let request = ChatRequest {
            model: model.to_string(),
            temperature: PARSE_TEMPERATURE,
            response_format: ResponseFormat {
                kind: "json_object",
            },
            messages: vec![
                Message {
                    role: "system",
                    content: build_system_prompt(Local::now()),
                },
                Message {
                    role: "user",
                    content: text.to_string(),
                },
            ],
        };

        let response = self
            .http
            .post(OPENAI_API_URL)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(parse_api_error(&body).unwrap_or_else(|| LlmError::Api {
                message: format!("status {status}: {body}"),
            }));
        }

        let payload: ChatResponse = serde_json::from_str(&body)
            .map_err(|err| LlmError::InvalidResponse(err.to_string()))?;
        let content = extract_content(payload)?;
        parse_log_json(&content)
    }
}

/// A log as understood from free text. Absent fields are empty or zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ParsedLog {
    #[serde(deserialize_with = "lenient_string")]
    pub departure_name: String,
    #[serde(deserialize_with = "lenient_string")]
    pub arrival_name: String,
    #[serde(deserialize_with = "lenient_string")]
    pub departure_time: String,
    #[serde(deserialize_with = "lenient_string")]
    pub arrival_time: String,
    #[serde(deserialize_with = "lenient_minutes")]
    pub driving_minutes: i64,
    #[serde(deserialize_with = "lenient_minutes")]
    pub break_minutes: i64,
    #[serde(deserialize_with = "lenient_number")]
    pub distance_km: f64,
    #[serde(deserialize_with = "lenient_number")]
    pub fuel_litres: f64,
    #[serde(deserialize_with = "lenient_number")]
    pub fuel_cost: f64,
    #[serde(deserialize_with = "lenient_string")]
    pub note: String,
}

impl ParsedLog {
    /// Converts the parse into a storable entry.
    ///
    /// Missing or unreadable times fall back to `now`; coordinates are zero.
    pub fn into_entry(self, now: DateTime<Utc>) -> LogEntry {
        let departure_time = parse_time(&self.departure_time).unwrap_or(now);
        let arrival_time = parse_time(&self.arrival_time).unwrap_or(now);
        LogEntry {
            date: local_date(departure_time),
            departure_name: self.departure_name,
            arrival_name: self.arrival_name,
            departure_time,
            arrival_time,
            driving_minutes: self.driving_minutes.max(0),
            break_minutes: self.break_minutes.max(0),
            distance_km: round_km(self.distance_km.max(0.0)),
            fuel_litres: self.fuel_litres.max(0.0),
            fuel_cost: self.fuel_cost.max(0.0),
            departure_lat: 0.0,
            departure_lng: 0.0,
            arrival_lat: 0.0,
            arrival_lng: 0.0,
            note: self.note,
        }
    }
}

/// Accepts RFC 3339, or a zone-less local date-time.
fn parse_time(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
        .and_then(|naive| Local.from_local_datetime(&naive).earliest())
        .map(|local| local.with_timezone(&Utc))
}

fn lenient_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => String::new(),
    })
}

fn lenient_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    let number = match Value::deserialize(deserializer)? {
        Value::Number(n) => n.as_f64().unwrap_or_default(),
        Value::String(s) => s.trim().parse().unwrap_or_default(),
        _ => 0.0,
    };
    Ok(if number.is_finite() { number } else { 0.0 })
}

#[expect(
    clippy::cast_possible_truncation,
    reason = "minute counts are far below i64::MAX"
)]
fn lenient_minutes<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    lenient_number(deserializer).map(|minutes| minutes.round() as i64)
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    temperature: f32,
    response_format: ResponseFormat,
    messages: Vec<Message>,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Serialize)]
struct Message {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

fn extract_content(response: ChatResponse) -> Result<String, LlmError> {
    response
        .choices
        .into_iter()
        .find_map(|choice| choice.message.content)
        .filter(|content| !content.trim().is_empty())
        .ok_or_else(|| LlmError::InvalidResponse("missing message content".to_string()))
}

fn parse_api_error(body: &str) -> Option<LlmError> {
    #[derive(Deserialize)]
    struct ErrorPayload {
        error: ErrorDetails,
    }

    #[derive(Deserialize)]
    struct ErrorDetails {
        message: String,
    }

    serde_json::from_str::<ErrorPayload>(body)
        .ok()
        .map(|payload| LlmError::Api {
            message: payload.error.message,
        })
}

fn build_system_prompt(now: DateTime<Local>) -> String {
    let lines = [
        "You are a logbook assistant for a truck or van driver.".to_string(),
        "Extract one driving log from the user's text.".to_string(),
        "Return strict JSON with exactly these keys:".to_string(),
        "{\"departureName\":\"\",\"arrivalName\":\"\",\"departureTime\":\"\",\"arrivalTime\":\"\",\"drivingMinutes\":0,\"breakMinutes\":0,\"distanceKm\":0,\"fuelLitres\":0,\"fuelCost\":0,\"note\":\"\"}".to_string(),
        "Rules:".to_string(),
        "- Times are ISO 8601 date-times with offset; use today's date when only a time is given.".to_string(),
        "- Leave unknown text fields empty and unknown numbers at 0.".to_string(),
        "- Put anything that does not fit another field into note.".to_string(),
        String::new(),
        format!("now: {}", now.to_rfc3339()),
    ];
    lines.join("\n")
}

fn parse_log_json(text: &str) -> Result<ParsedLog, LlmError> {
    serde_json::from_str(text).map_err(|err| LlmError::InvalidResponse(err.to_string()))
}
