// Local crates
use crate::helpers::load_config::{CaptureConfig, ProcessConfig};
use crate::supervisor::error::FailureKind;
use crate::tailer::TailerReport;

// External crates
use std::fmt;
use std::process::ExitStatus;
use std::time::Duration;

/// Lifecycle of a single run:
///
/// ```text
/// Created -> Spawned -> Running -> Draining -> Flushing -> Waiting -> Succeeded
///    \__________\__________\__________\___________\__________\_____-> Failed(kind)
/// ```
///
/// There is no way back; a run is never retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Created,
    Spawned,
    Running,
    Draining,
    Flushing,
    Waiting,
    Succeeded,
    Failed(FailureKind),
}

impl RunState {
    pub const fn is_terminal(self) -> bool {
        matches!(self, RunState::Succeeded | RunState::Failed(_))
    }

    /// Whether `next` directly follows `self`.
    pub const fn can_advance_to(self, next: RunState) -> bool {
        use RunState::{Created, Draining, Failed, Flushing, Running, Spawned, Succeeded, Waiting};
        match (self, next) {
            (from, Failed(_)) => !from.is_terminal(),
            (Created, Spawned)
            | (Spawned, Running)
            | (Running, Draining)
            | (Draining, Flushing)
            | (Flushing, Waiting)
            | (Waiting, Succeeded) => true,
            _ => false,
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::Created => f.write_str("created"),
            RunState::Spawned => f.write_str("spawned"),
            RunState::Running => f.write_str("running"),
            RunState::Draining => f.write_str("draining"),
            RunState::Flushing => f.write_str("flushing"),
            RunState::Waiting => f.write_str("waiting"),
            RunState::Succeeded => f.write_str("succeeded"),
            RunState::Failed(kind) => write!(f, "failed({kind})"),
        }
    }
}

/// The child to run: program plus arguments, taken verbatim from the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandSpec {
    /// Split an argv-style vector; `None` when it is empty.
    pub fn from_argv(argv: Vec<String>) -> Option<Self> {
        let mut argv = argv.into_iter();
        let program = argv.next()?;
        Some(Self {
            program,
            args: argv.collect(),
        })
    }
}

/// Knobs of the supervisor.
#[derive(Debug, Clone, PartialEq)]
pub struct SupervisorConfig {
    pub max_line_bytes: usize,
    /// Kill the child after this long; `None` lets it run indefinitely.
    pub timeout: Option<Duration>,
    /// After the child was killed, how long the tailers may keep draining
    /// before their readers are stopped.
    pub drain_grace: Duration,
}

impl SupervisorConfig {
    pub fn from_config(capture: &CaptureConfig, process: &ProcessConfig) -> Self {
        Self {
            max_line_bytes: capture.max_line_bytes,
            timeout: process.timeout_secs.map(Duration::from_secs),
            drain_grace: Duration::from_millis(process.drain_grace_ms),
        }
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self::from_config(&CaptureConfig::default(), &ProcessConfig::default())
    }
}

/// Outcome of a successful run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub status: ExitStatus,
    pub stdout: TailerReport,
    pub stderr: TailerReport,
    pub elapsed: Duration,
}
