//! CloudLogger - responsibility and behavior
//!
//! The CloudLogger takes individual `LogEntry`s from the tailers and delivers
//! them to Google Cloud Logging through the `entries:write` REST method.
//!
//! Key responsibilities:
//! - Expose a non-blocking `log(entry)` API that any number of tailers may call
//! concurrently.
//! - Own a background worker that batches entries (by count or by delay) and
//! writes each batch with retry, exponential backoff and jitter.
//! - Provide `flush()`, which resolves once everything enqueued before it has
//! been written, and reports any write failure that happened since the last flush.
//!
//! Ordering notes:
//! - Entries and control commands travel through one channel, so a flush can
//! never overtake an entry enqueued before it.
//! - The channel is unbounded; the tailers never block and never drop entries.
//! Memory is bounded by how fast the sink accepts writes.

// Local crates
use crate::forwarder::{
    LogForwarder,
    auth::TokenSource,
    error::ForwarderError,
    models::{LogEntry, MonitoredResource, ResourceDescriptor, WireEntry, WriteEntriesRequest, log_name},
};
use crate::helpers::load_config::ForwarderConfig;
use crate::metrics::metrics::{ENTRIES_WRITTEN_TOTAL, WRITE_REQUESTS_TOTAL};

// External crates
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at, sleep};
use tracing::instrument;

type Reply = oneshot::Sender<Result<(), ForwarderError>>;

/// Messages understood by the background worker.
#[derive(Debug)]
enum Command {
    Entry(LogEntry),
    Flush(Reply),
    Close(Reply),
}

/// CloudLogger
///
/// Handle to a background worker writing entries to Cloud Logging. Constructed
/// once per run and shared (behind an `Arc`) by the supervisor and both tailers.
#[derive(Debug)]
pub struct CloudLogger {
    sender: mpsc::UnboundedSender<Command>,
    worker_handle: Mutex<Option<JoinHandle<()>>>,
}

impl CloudLogger {
    /// Create the HTTP client and spawn the worker. Must be called from within a
    /// tokio runtime.
    #[instrument(
        name = "cloudpipe_forwarder::create",
        target = "forwarder::cloud_logging",
        skip_all,
        level = "debug"
    )]
    pub fn new(config: &ForwarderConfig, resource: &ResourceDescriptor) -> Result<Self, ForwarderError> {
        let writer = EntryWriter::new(config, resource)?;
        let (tx, rx) = mpsc::unbounded_channel();

        tracing::debug!(
            endpoint = %config.endpoint,
            log_name = %writer.log_name,
            batch_size = config.batch_size,
            "Spawning Cloud Logging worker task"
        );
        let batch = Batch::new(writer.envelope_bytes(), config.batch_size, config.batch_bytes);
        let handle = tokio::spawn(run_worker(writer, rx, batch, config.batch_delay()));

        Ok(Self {
            sender: tx,
            worker_handle: Mutex::new(Some(handle)),
        })
    }

    /// Flush everything still queued and stop the worker. Calling it again is a no-op.
    #[instrument(
        name = "cloudpipe_forwarder::close",
        target = "forwarder::cloud_logging",
        skip_all,
        level = "debug"
    )]
    pub async fn close(&self) -> Result<(), ForwarderError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let result = match self.sender.send(Command::Close(reply_tx)) {
            Ok(()) => reply_rx.await.unwrap_or(Err(ForwarderError::Closed)),
            Err(_) => Ok(()),
        };

        if let Some(handle) = self.worker_handle.lock().await.take() {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Cloud Logging worker task panicked");
            }
        }

        tracing::debug!("Cloud Logging worker stopped");
        result
    }

    async fn request(&self, make: impl FnOnce(Reply) -> Command) -> Result<(), ForwarderError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.sender
            .send(make(reply_tx))
            .map_err(|_| ForwarderError::Closed)?;
        reply_rx.await.unwrap_or(Err(ForwarderError::Closed))
    }
}

impl LogForwarder for CloudLogger {
    fn log(&self, entry: LogEntry) {
        if self.sender.send(Command::Entry(entry)).is_err() {
            tracing::warn!("Entry logged after the forwarder was closed, dropping it");
        }
    }

    fn flush(&self) -> impl Future<Output = Result<(), ForwarderError>> + Send {
        self.request(Command::Flush)
    }
}

/// Entries waiting to be written, with the size of the request body they
/// would produce.
#[derive(Debug)]
struct Batch {
    entries: Vec<LogEntry>,
    bytes: usize,
    envelope_bytes: usize,
    max_entries: usize,
    max_bytes: usize,
}

impl Batch {
    fn new(envelope_bytes: usize, max_entries: usize, max_bytes: usize) -> Self {
        Self {
            entries: Vec::with_capacity(max_entries.min(1024)),
            bytes: envelope_bytes,
            envelope_bytes,
            max_entries,
            max_bytes,
        }
    }

    fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether adding an entry of `size` bytes would push a non-empty batch
    /// past the byte limit. An oversized entry still goes out on its own.
    fn would_overflow(&self, size: usize) -> bool {
        !self.entries.is_empty() && self.bytes + size > self.max_bytes
    }

    fn push(&mut self, entry: LogEntry, size: usize) {
        self.entries.push(entry);
        self.bytes += size;
    }

    fn is_full(&self) -> bool {
        self.entries.len() >= self.max_entries || self.bytes >= self.max_bytes
    }

    fn clear(&mut self) {
        self.entries.clear();
        self.bytes = self.envelope_bytes;
    }
}

/// Serialized size of one entry inside `entries`, separator included.
fn entry_bytes(entry: &LogEntry) -> usize {
    serde_json::to_vec(&WireEntry::from(entry)).map_or(entry.payload.len(), |json| json.len()) + 1
}

/// Background worker loop (owns the pending batch).
///
/// - An entry is appended to the batch; a batch that reached `batch_size`
/// entries or `batch_bytes` bytes is written immediately, and an entry that
/// would overflow the byte limit first sends the batch before it.
/// - The batch-delay ticker writes whatever is pending.
/// - `Flush` writes what is pending and replies with the first error seen since
/// the previous flush, if any.
/// - `Close` (or every handle being dropped) does a final write and exits.
#[instrument(
    name = "cloudpipe_forwarder::run_worker",
    target = "forwarder::cloud_logging",
    skip_all,
    level = "debug"
)]
async fn run_worker(
    writer: EntryWriter,
    mut rx: mpsc::UnboundedReceiver<Command>,
    mut pending: Batch,
    batch_delay: Duration,
) {
    let mut deferred: Option<ForwarderError> = None;
    let mut ticker = interval_at(Instant::now() + batch_delay, batch_delay);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            cmd = rx.recv() => match cmd {
                Some(Command::Entry(entry)) => {
                    let size = entry_bytes(&entry);
                    if pending.would_overflow(size) {
                        writer.write_pending(&mut pending, &mut deferred).await;
                    }
                    pending.push(entry, size);
                    if pending.is_full() {
                        writer.write_pending(&mut pending, &mut deferred).await;
                    }
                }
                Some(Command::Flush(reply)) => {
                    writer.write_pending(&mut pending, &mut deferred).await;
                    let _ = reply.send(deferred.take().map_or(Ok(()), Err));
                }
                Some(Command::Close(reply)) => {
                    writer.write_pending(&mut pending, &mut deferred).await;
                    let _ = reply.send(deferred.take().map_or(Ok(()), Err));
                    break;
                }
                None => {
                    writer.write_pending(&mut pending, &mut deferred).await;
                    if let Some(e) = deferred.take() {
                        tracing::error!(error = %e, "Entries lost, every forwarder handle was dropped after a failed write");
                    }
                    break;
                }
            },

            _ = ticker.tick() => {
                if !pending.is_empty() {
                    writer.write_pending(&mut pending, &mut deferred).await;
                }
            }
        }
    }

    tracing::debug!("Cloud Logging worker loop exited");
}

/// Retry policy for a single write request.
#[derive(Debug, Clone)]
struct RetryPolicy {
    max_retries: u32,
    initial_delay: Duration,
    max_delay: Duration,
    backoff_factor: f64,
    jitter: f64,
}

impl RetryPolicy {
    fn next_delay(&self, delay: Duration) -> Duration {
        Duration::from_millis(
            (delay.as_millis() as f64 * self.backoff_factor).min(self.max_delay.as_millis() as f64) as u64,
        )
    }

    /// Randomize the sleep so concurrent runs do not retry in lockstep.
    fn jittered(&self, delay: Duration) -> Duration {
        if self.jitter <= 0.0 {
            return delay;
        }
        let factor: f64 = rand::rng().random_range(1.0 - self.jitter..1.0 + self.jitter);
        delay.mul_f64(factor)
    }
}

/// Performs the actual `entries:write` calls.
#[derive(Debug)]
struct EntryWriter {
    client: reqwest::Client,
    url: String,
    log_name: String,
    resource: MonitoredResource,
    tokens: TokenSource,
    retry: RetryPolicy,
}

impl EntryWriter {
    fn new(config: &ForwarderConfig, resource: &ResourceDescriptor) -> Result<Self, ForwarderError> {
        let base = reqwest::Url::parse(&config.endpoint)
            .map_err(|_| ForwarderError::InvalidEndpoint(config.endpoint.clone()))?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(ForwarderError::InvalidEndpoint(config.endpoint.clone()));
        }

        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(ForwarderError::ClientBuild)?;
        let tokens = TokenSource::from_config(config, client.clone())?;

        Ok(Self {
            client,
            url: format!("{}/v2/entries:write", config.endpoint.trim_end_matches('/')),
            log_name: log_name(&resource.project_id, &config.log_id),
            resource: resource.to_monitored_resource(),
            tokens,
            retry: RetryPolicy {
                max_retries: config.max_retries,
                initial_delay: Duration::from_millis(config.initial_retry_delay_ms),
                max_delay: Duration::from_millis(config.max_retry_delay_ms),
                backoff_factor: config.backoff_factor,
                jitter: config.retry_jitter,
            },
        })
    }

    /// Write and clear the pending batch; a failure is kept in `deferred` (the
    /// first one wins) for the next flush to report.
    async fn write_pending(&self, pending: &mut Batch, deferred: &mut Option<ForwarderError>) {
        if pending.is_empty() {
            return;
        }

        if let Err(e) = self.write_with_retry(&pending.entries).await {
            tracing::error!(
                error = %e,
                entries = pending.entries.len(),
                "Failed to write log entries to Cloud Logging"
            );
            deferred.get_or_insert(e);
        }
        pending.clear();
    }

    /// Write one batch, retrying transport errors, throttling and server errors
    /// with exponential backoff + jitter.
    #[instrument(
        name = "cloudpipe_forwarder::write",
        target = "forwarder::cloud_logging",
        skip_all,
        fields(entries = batch.len()),
        level = "debug"
    )]
    async fn write_with_retry(&self, batch: &[LogEntry]) -> Result<(), ForwarderError> {
        let mut attempts = 0;
        let mut delay = self.retry.initial_delay;

        loop {
            attempts += 1;
            match self.write_once(batch).await {
                Ok(()) => {
                    WRITE_REQUESTS_TOTAL.with_label_values(&["success"]).inc();
                    ENTRIES_WRITTEN_TOTAL.inc_by(batch.len() as u64);
                    tracing::debug!(attempts, "Log entries written");
                    return Ok(());
                }
                Err(e) if e.is_retryable() && attempts <= self.retry.max_retries => {
                    WRITE_REQUESTS_TOTAL.with_label_values(&["retry"]).inc();
                    let sleep_duration = self.retry.jittered(delay);
                    tracing::warn!(
                        error = %e,
                        sleep_duration = ?sleep_duration,
                        "Write attempt {attempts} failed, retrying"
                    );
                    sleep(sleep_duration).await;
                    delay = self.retry.next_delay(delay);
                }
                Err(e) => {
                    WRITE_REQUESTS_TOTAL.with_label_values(&["failure"]).inc();
                    return Err(e);
                }
            }
        }
    }

    /// Size of a request body carrying no entries.
    fn envelope_bytes(&self) -> usize {
        let empty = WriteEntriesRequest {
            log_name: &self.log_name,
            resource: &self.resource,
            entries: Vec::new(),
            partial_success: false,
        };
        serde_json::to_vec(&empty).map_or(0, |json| json.len())
    }

    async fn write_once(&self, batch: &[LogEntry]) -> Result<(), ForwarderError> {
        let body = WriteEntriesRequest {
            log_name: &self.log_name,
            resource: &self.resource,
            entries: batch.iter().map(WireEntry::from).collect(),
            partial_success: false,
        };

        let mut request = self.client.post(&self.url).json(&body);
        if let Some(token) = self.tokens.token().await? {
            request = request.bearer_auth(token);
        }

        let resp = request.send().await.map_err(ForwarderError::Transport)?;
        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }

        let body = resp.text().await.unwrap_or_default();
        Err(ForwarderError::Rejected {
            status: status.as_u16(),
            body,
        })
    }
}
