// Registration only fails on duplicate names, which these statics rule out.
#![allow(clippy::unwrap_used)]

// External crates
use prometheus::{
    Encoder, Histogram, IntCounter, IntCounterVec, IntGauge, TextEncoder, register_histogram,
    register_int_counter, register_int_counter_vec, register_int_gauge,
};

use anyhow::{Context, Result};
use lazy_static::lazy_static;
use std::path::Path;
use std::time::Instant;

/// Helper to observe histogram duration
pub fn observe_duration(hist: &Histogram, start: Instant) {
    let elapsed = start.elapsed().as_secs_f64();
    hist.observe(elapsed);
}

lazy_static! {
    // ======== Capture Metrics ========

    /// Lines read from the child, by stream
    pub static ref LINES_FORWARDED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "cloudpipe_lines_forwarded_total",
        "Lines read from the child process and handed to the forwarder",
        &["stream"]
    ).unwrap();

    /// Bytes of line content read from the child, by stream (terminators excluded)
    pub static ref LINE_BYTES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "cloudpipe_line_bytes_total",
        "Bytes of line content read from the child process",
        &["stream"]
    ).unwrap();

    /// Read errors that ended a tailer early
    pub static ref STREAM_READ_ERRORS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "cloudpipe_stream_read_errors_total",
        "Read errors that ended the capture of a child output stream",
        &["stream"]
    ).unwrap();

    // ======== Forwarder Metrics ========

    /// Entries accepted by the logging endpoint
    pub static ref ENTRIES_WRITTEN_TOTAL: IntCounter = register_int_counter!(
        "cloudpipe_entries_written_total",
        "Log entries accepted by the logging endpoint"
    ).unwrap();

    /// entries:write calls by outcome (success, retry, failure)
    pub static ref WRITE_REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "cloudpipe_write_requests_total",
        "entries:write requests by outcome",
        &["outcome"]
    ).unwrap();

    // ======== Lifecycle Metrics ========

    /// Time spent in the final flush
    pub static ref FLUSH_DURATION_SECONDS: Histogram = register_histogram!(
        "cloudpipe_flush_duration_seconds",
        "Duration of the flush performed after the child's output was drained",
        vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0]
    ).unwrap();

    /// Exit code of the child (128 + signal number when a signal terminated it)
    pub static ref CHILD_EXIT_CODE: IntGauge = register_int_gauge!(
        "cloudpipe_child_exit_code",
        "Exit code of the supervised child process"
    ).unwrap();
}

/// Write the default registry in Prometheus text format to `path`, through a
/// temporary file so a collector never reads a half-written file.
pub fn write_textfile(path: &Path) -> Result<()> {
    let mut buffer = Vec::new();
    TextEncoder::new()
        .encode(&prometheus::gather(), &mut buffer)
        .context("Failed to encode metrics")?;

    let tmp = path.with_extension("prom.tmp");
    std::fs::write(&tmp, &buffer)
        .with_context(|| format!("Failed to write metrics to {:?}", tmp))?;
    std::fs::rename(&tmp, path)
        .with_context(|| format!("Failed to move metrics file into place at {:?}", path))?;

    tracing::debug!(metrics_textfile = %path.display(), "Metrics written");
    Ok(())
}
