// Local crates
use crate::forwarder::models::Severity;

// External crates
use std::fmt;

/// One of the two output streams of the supervised child. Each stream maps to
/// a fixed severity:
///
/// ```text
/// stdout -> INFO
/// stderr -> ERROR
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

impl OutputStream {
    pub const fn severity(self) -> Severity {
        match self {
            OutputStream::Stdout => Severity::Info,
            OutputStream::Stderr => Severity::Error,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            OutputStream::Stdout => "stdout",
            OutputStream::Stderr => "stderr",
        }
    }
}

impl fmt::Display for OutputStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a `Tailer` stopped reading its stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TailerEnd {
    /// The child (and everything sharing the pipe) closed the stream.
    Eof,
    /// A read failed; the lines read before it were still forwarded.
    ReadError,
    /// The supervisor stopped the reader after a cancellation.
    Stopped,
    /// The tailer task panicked or was aborted.
    Aborted,
}

/// What a `Tailer` did before it completed. Returned through its task handle,
/// which doubles as the tailer's completion signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TailerReport {
    pub stream: OutputStream,
    pub lines: u64,
    pub bytes: u64,
    pub end: TailerEnd,
}

impl TailerReport {
    pub const fn new(stream: OutputStream) -> Self {
        Self {
            stream,
            lines: 0,
            bytes: 0,
            end: TailerEnd::Eof,
        }
    }
}
