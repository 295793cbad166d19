//! Log forwarding - the seam between the capture pipeline and the remote sink.
//!
//! Tailers only ever see the [`LogForwarder`] trait: `log` enqueues without
//! blocking and may be called from several tasks at once, `flush` resolves once
//! every entry enqueued before it has been delivered (or delivery failed).
//!
//! [`CloudLogger`] is the Google Cloud Logging implementation.

pub mod auth;
pub mod cloud_logging;
pub mod error;
pub mod models;

pub use cloud_logging::CloudLogger;
pub use error::ForwarderError;
pub use models::{LogEntry, ResourceDescriptor, Severity};

use std::future::Future;

/// Accepts structured entries and delivers them to a logging sink.
pub trait LogForwarder: Send + Sync {
    /// Queue an entry for delivery. Never blocks on network I/O.
    fn log(&self, entry: LogEntry);

    /// Block until all previously queued entries are durably delivered.
    fn flush(&self) -> impl Future<Output = Result<(), ForwarderError>> + Send;
}

