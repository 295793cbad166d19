// Local crates
use crate::forwarder::ForwarderError;
use crate::tailer::OutputStream;

// External crates
use std::fmt;
use std::io;
use std::process::ExitStatus;

/// Stage of a run that failed. Every `RunError` belongs to exactly one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    ClientInit,
    Spawn,
    Start,
    Flush,
    Wait,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FailureKind::ClientInit => "client-init",
            FailureKind::Spawn => "spawn",
            FailureKind::Start => "start",
            FailureKind::Flush => "flush",
            FailureKind::Wait => "wait",
        })
    }
}

/// Terminal error of a run. The first failing stage short-circuits the run.
///
/// Stream read errors are deliberately absent: they only shorten a tailer's
/// line sequence and never fail the run.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("failed to construct logging client")]
    ClientInit(#[source] ForwarderError),
    #[error("failed to obtain {stream} handle of child process")]
    Spawn { stream: OutputStream },
    #[error("failed to start `{program}`")]
    Start {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to flush log entries")]
    Flush(#[source] ForwarderError),
    #[error("child process `{program}` {}", describe_status(*status))]
    Wait { program: String, status: ExitStatus },
    #[error("failed to wait for child process `{program}`")]
    WaitIo {
        program: String,
        #[source]
        source: io::Error,
    },
}

impl RunError {
    pub const fn kind(&self) -> FailureKind {
        match self {
            RunError::ClientInit(_) => FailureKind::ClientInit,
            RunError::Spawn { .. } => FailureKind::Spawn,
            RunError::Start { .. } => FailureKind::Start,
            RunError::Flush(_) => FailureKind::Flush,
            RunError::Wait { .. } | RunError::WaitIo { .. } => FailureKind::Wait,
        }
    }

    /// Exit code cloudpipe itself should terminate with. A failed child's own
    /// code is passed through; a signal becomes `128 + signal`.
    pub fn exit_code(&self) -> u8 {
        match self {
            RunError::Wait { status, .. } => status_exit_code(*status),
            _ => 1,
        }
    }
}

/// Map a non-successful exit status onto a non-zero process exit code.
pub fn status_exit_code(status: ExitStatus) -> u8 {
    if let Some(code) = status.code() {
        return u8::try_from(code).ok().filter(|c| *c != 0).unwrap_or(1);
    }
    signal_of(status)
        .and_then(|sig| u8::try_from(128 + sig).ok())
        .unwrap_or(1)
}

#[cfg(unix)]
fn signal_of(status: ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn signal_of(_status: ExitStatus) -> Option<i32> {
    None
}

fn describe_status(status: ExitStatus) -> String {
    match (status.code(), signal_of(status)) {
        (Some(code), _) => format!("exited with status {code}"),
        (None, Some(sig)) => format!("was terminated by signal {sig}"),
        (None, None) => format!("failed: {status}"),
    }
}
