//! GPS feed replayed from a JSONL file.
//!
//! Each line is `{"lat": .., "lng": .., "timestamp": ..}` with an optional
//! millisecond timestamp. Lines that do not parse are skipped.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use tokio::sync::{mpsc, watch};

use tl_core::{Coordinate, LatLng, LocationError, LocationSource, Subscription};

const CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Deserialize)]
struct FeedLine {
    lat: f64,
    lng: f64,
    timestamp: Option<i64>,
}

/// Plays back recorded positions, one every `interval`.
///
/// Until the first point is emitted, the current fix is the first point of
/// the file. Afterwards it is the last point emitted.
#[derive(Debug)]
pub struct ReplayFeed {
    points: Vec<FeedPoint>,
    interval: Duration,
    latest: watch::Sender<Option<Coordinate>>,
    started: bool,
}

#[derive(Debug, Clone, Copy)]
struct FeedPoint {
    position: LatLng,
    timestamp: Option<i64>,
}

impl FeedPoint {
    fn stamp(self) -> Coordinate {
        let timestamp = self
            .timestamp
            .unwrap_or_else(|| Utc::now().timestamp_millis());
        Coordinate::at(self.position, timestamp)
    }
}

impl ReplayFeed {
    /// Reads a feed file.
    pub async fn open(path: &Path, interval: Duration) -> Result<Self> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read GPS feed {}", path.display()))?;
        Ok(Self::parse(&contents, interval))
    }

    pub fn parse(contents: &str, interval: Duration) -> Self {
        let points = contents
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .filter_map(|(index, line)| match parse_line(line) {
                Ok(point) => Some(point),
                Err(err) => {
                    tracing::warn!(line = index + 1, %err, "skipping GPS line");
                    None
                }
            })
            .collect::<Vec<_>>();
        tracing::debug!(points = points.len(), "loaded GPS feed");
        let (latest, _) = watch::channel(None);
        Self {
            points,
            interval,
            latest,
            started: false,
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

fn parse_line(line: &str) -> Result<FeedPoint> {
    let raw: FeedLine = serde_json::from_str(line)?;
    let position = LatLng::new(raw.lat, raw.lng).validate()?;
    Ok(FeedPoint {
        position,
        timestamp: raw.timestamp,
    })
}

#[async_trait]
impl LocationSource for ReplayFeed {
    async fn current_fix(&mut self) -> Result<Coordinate, LocationError> {
        if let Some(latest) = *self.latest.borrow() {
            return Ok(latest);
        }
        self.points
            .first()
            .map(|point| point.stamp())
            .ok_or_else(|| LocationError::Unavailable {
                reason: "GPS feed has no points".to_string(),
            })
    }

    fn subscribe(&mut self) -> Result<Subscription, LocationError> {
        if self.started {
            return Err(LocationError::Unavailable {
                reason: "GPS feed already replayed".to_string(),
            });
        }
        self.started = true;

        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let points = self.points.clone();
        let latest = self.latest.clone();
        let interval = self.interval;
        let producer = tokio::spawn(async move {
            for point in points {
                tokio::time::sleep(interval).await;
                let coord = point.stamp();
                latest.send_replace(Some(coord));
                if tx.send(coord).await.is_err() {
                    break;
                }
            }
            tracing::debug!("GPS feed exhausted");
        });
        Ok(Subscription::new(rx, producer))
    }
}
