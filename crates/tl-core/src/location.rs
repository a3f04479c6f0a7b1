//! Location stream contract.
//!
//! A [`LocationSource`] answers one-shot fix requests and hands out a
//! long-lived [`Subscription`] that delivers coordinates until it is
//! cancelled. Cancelling is idempotent.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::geo::{Coordinate, LatLng};

/// Location errors. Always recoverable.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LocationError {
    /// The source has no position to offer.
    #[error("location unavailable: {reason}")]
    Unavailable { reason: String },
    /// No fix arrived within the allowed time.
    #[error("no location fix within {0:?}")]
    Timeout(Duration),
}

/// A provider of position fixes.
#[async_trait]
pub trait LocationSource: Send {
    /// Requests a single current fix.
    async fn current_fix(&mut self) -> Result<Coordinate, LocationError>;

    /// Opens a continuous stream of fixes.
    fn subscribe(&mut self) -> Result<Subscription, LocationError>;
}

/// Handle to an open location stream.
#[derive(Debug)]
pub struct Subscription {
    receiver: Option<mpsc::Receiver<Coordinate>>,
    producer: Option<JoinHandle<()>>,
}

impl Subscription {
    /// Wraps a receiver fed by a spawned producer task.
    pub const fn new(receiver: mpsc::Receiver<Coordinate>, producer: JoinHandle<()>) -> Self {
        Self {
            receiver: Some(receiver),
            producer: Some(producer),
        }
    }

    /// Wraps a receiver whose sender is owned elsewhere.
    pub const fn from_receiver(receiver: mpsc::Receiver<Coordinate>) -> Self {
        Self {
            receiver: Some(receiver),
            producer: None,
        }
    }

    /// A subscription that never yields anything.
    pub const fn detached() -> Self {
        Self {
            receiver: None,
            producer: None,
        }
    }

    /// Waits for the next coordinate.
    ///
    /// Returns `None` once the stream is cancelled or exhausted.
    pub async fn next(&mut self) -> Option<Coordinate> {
        let receiver = self.receiver.as_mut()?;
        let next = receiver.recv().await;
        if next.is_none() {
            self.receiver = None;
        }
        next
    }

    pub const fn is_active(&self) -> bool {
        self.receiver.is_some()
    }

    /// Stops the stream. Safe to call more than once.
    pub fn cancel(&mut self) {
        if let Some(producer) = self.producer.take() {
            producer.abort();
        }
        if let Some(mut receiver) = self.receiver.take() {
            receiver.close();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Requests a fix with a deadline, substituting `fallback` on failure.
///
/// Returns `None` only when the source failed and no fallback was given.
pub async fn fix_or_fallback(
    source: &mut dyn LocationSource,
    timeout: Duration,
    fallback: Option<LatLng>,
    now_ms: i64,
) -> Option<Coordinate> {
    let result = match tokio::time::timeout(timeout, source.current_fix()).await {
        Ok(result) => result,
        Err(_) => Err(LocationError::Timeout(timeout)),
    };
    match result {
        Ok(coord) => Some(coord),
        Err(err) => {
            if let Some(position) = fallback {
                tracing::info!(%err, "using manual coordinate");
                Some(Coordinate::at(position, now_ms))
            } else {
                tracing::warn!(%err, "continuing without a coordinate");
                None
            }
        }
    }
}

/// A source with no receiver, used when no GPS is attached.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoLocation;

#[async_trait]
impl LocationSource for NoLocation {
    async fn current_fix(&mut self) -> Result<Coordinate, LocationError> {
        Err(LocationError::Unavailable {
            reason: "no location source configured".to_string(),
        })
    }

    fn subscribe(&mut self) -> Result<Subscription, LocationError> {
        Ok(Subscription::detached())
    }
}
