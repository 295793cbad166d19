#![allow(dead_code)]

use cloudpipe::forwarder::{ForwarderError, LogEntry, LogForwarder, Severity};
use cloudpipe::supervisor::{CommandSpec, Supervisor, SupervisorConfig};
use std::future::Future;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// In-memory forwarder recording every entry and every flush call.
#[derive(Debug, Default)]
pub struct RecordingForwarder {
    entries: Mutex<Vec<LogEntry>>,
    flushes: AtomicUsize,
    entries_at_flush: Mutex<Vec<usize>>,
    fail_flush: bool,
}

impl RecordingForwarder {
    pub fn failing() -> Self {
        Self {
            fail_flush: true,
            ..Self::default()
        }
    }

    pub fn entries(&self) -> Vec<(Severity, String)> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .map(|e| (e.severity, e.payload.clone()))
            .collect()
    }

    pub fn payloads(&self, severity: Severity) -> Vec<String> {
        self.entries()
            .into_iter()
            .filter(|(s, _)| *s == severity)
            .map(|(_, p)| p)
            .collect()
    }

    pub fn flushes(&self) -> usize {
        self.flushes.load(Ordering::SeqCst)
    }

    /// Number of entries already logged at each flush call.
    pub fn entries_at_flush(&self) -> Vec<usize> {
        self.entries_at_flush.lock().unwrap().clone()
    }
}

impl LogForwarder for RecordingForwarder {
    fn log(&self, entry: LogEntry) {
        self.entries.lock().unwrap().push(entry);
    }

    fn flush(&self) -> impl Future<Output = Result<(), ForwarderError>> + Send {
        self.flushes.fetch_add(1, Ordering::SeqCst);
        let logged = self.entries.lock().unwrap().len();
        self.entries_at_flush.lock().unwrap().push(logged);
        let fail = self.fail_flush;
        async move {
            if fail {
                Err(ForwarderError::Rejected {
                    status: 403,
                    body: "permission denied".to_string(),
                })
            } else {
                Ok(())
            }
        }
    }
}

pub fn sh(script: &str) -> CommandSpec {
    CommandSpec::from_argv(vec!["sh".into(), "-c".into(), script.into()]).unwrap()
}

pub fn test_config() -> SupervisorConfig {
    SupervisorConfig {
        max_line_bytes: 64 * 1024,
        timeout: None,
        drain_grace: Duration::from_millis(200),
    }
}

pub fn supervisor(fwd: &Arc<RecordingForwarder>) -> Supervisor<RecordingForwarder> {
    Supervisor::new(fwd.clone(), test_config(), CancellationToken::new())
}
