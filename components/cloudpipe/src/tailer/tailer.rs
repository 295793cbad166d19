// Local crates
use crate::forwarder::{LogForwarder, models::LogEntry};
use crate::metrics::metrics::{LINE_BYTES_TOTAL, LINES_FORWARDED_TOTAL, STREAM_READ_ERRORS_TOTAL};
use crate::tailer::{
    models::{OutputStream, TailerEnd, TailerReport},
    reader::line_reader,
};

// External crates
use futures::StreamExt;
use std::sync::Arc;
use tokio::io::AsyncRead;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

/// A `Tailer` drains one output stream of the child and turns every line into
/// exactly one `LogEntry` carrying the stream's severity.
///
/// ```text
/// pipe bytes -> LineReader -> line -> LogEntry -> LogForwarder::log
/// ```
///
/// It only enqueues; delivery is up to the forwarder.
#[derive(Debug)]
pub struct Tailer<F> {
    stream: OutputStream,
    forwarder: Arc<F>,
    max_line_bytes: usize,
}

impl<F: LogForwarder> Tailer<F> {
    pub fn new(stream: OutputStream, forwarder: Arc<F>, max_line_bytes: usize) -> Self {
        Self {
            stream,
            forwarder,
            max_line_bytes,
        }
    }

    /// Read `reader` until end-of-stream, a read error, or `stop` being
    /// cancelled. A read error is logged here and goes no further.
    #[instrument(
        name = "cloudpipe_tailer::run",
        target = "tailer::tailer",
        skip_all,
        fields(stream = %self.stream),
        level = "debug"
    )]
    pub async fn run<R>(self, reader: R, stop: CancellationToken) -> TailerReport
    where
        R: AsyncRead,
    {
        let stream = self.stream.as_str();
        let severity = self.stream.severity();
        let mut report = TailerReport::new(self.stream);

        let lines = line_reader(reader, self.max_line_bytes, stop.clone().cancelled_owned());
        tokio::pin!(lines);

        while let Some(next) = lines.next().await {
            match next {
                Ok(line) => {
                    report.lines += 1;
                    report.bytes += line.len() as u64;
                    LINES_FORWARDED_TOTAL.with_label_values(&[stream]).inc();
                    LINE_BYTES_TOTAL.with_label_values(&[stream]).inc_by(line.len() as u64);

                    self.forwarder.log(LogEntry::from_line(severity, &line));
                }
                Err(e) => {
                    STREAM_READ_ERRORS_TOTAL.with_label_values(&[stream]).inc();
                    tracing::warn!(
                        error = %e,
                        lines = report.lines,
                        "Failed to read child output stream, ending capture of this stream"
                    );
                    report.end = TailerEnd::ReadError;
                    break;
                }
            }
        }

        if report.end == TailerEnd::Eof && lines.get_ref().is_stopped() {
            report.end = TailerEnd::Stopped;
        }

        tracing::debug!(
            lines = report.lines,
            bytes = report.bytes,
            end = ?report.end,
            "Tailer finished"
        );
        report
    }
}
