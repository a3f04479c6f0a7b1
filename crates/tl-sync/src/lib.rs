//! Outbox synchronization for the transport log.
//!
//! Finished logs are queued in the local store and delivered to a remote
//! sink (an HTTP endpoint, usually a spreadsheet-backed web app) when the
//! device is online. Delivery is ordered and strictly sequential.

mod outbox;
mod sink;

pub use outbox::{Connectivity, SyncError, SyncReport, SyncSkip, Synchronizer};
pub use sink::{HttpSink, RemoteSink, TransportError, WireRecord, is_acknowledged};
