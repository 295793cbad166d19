// Local crates
use crate::forwarder::LogForwarder;
use crate::metrics::metrics::{CHILD_EXIT_CODE, FLUSH_DURATION_SECONDS, observe_duration};
use crate::supervisor::{
    error::{RunError, status_exit_code},
    models::{CommandSpec, RunState, RunSummary, SupervisorConfig},
};
use crate::tailer::{OutputStream, Tailer, TailerEnd, TailerReport};

// External crates
use std::process::Stdio;
use std::sync::Arc;
use std::time::Instant;
use tokio::process::{Child, Command};
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::instrument;

/// Runs one child process and forwards everything it prints.
///
/// ```text
///            +--> Tailer(stdout, INFO)  --+
/// spawn ---> |                            |--> join --> flush --> wait
///            +--> Tailer(stderr, ERROR) --+
/// ```
///
/// Flush never starts before both tailers completed, and the child is never
/// waited on before the flush completed.
#[derive(Debug)]
pub struct Supervisor<F> {
    forwarder: Arc<F>,
    config: SupervisorConfig,
    cancel: CancellationToken,
}

impl<F> Supervisor<F>
where
    F: LogForwarder + 'static,
{
    /// `cancel` interrupts draining: the child is killed and the run
    /// continues with flush and wait.
    pub fn new(forwarder: Arc<F>, config: SupervisorConfig, cancel: CancellationToken) -> Self {
        Self {
            forwarder,
            config,
            cancel,
        }
    }

    #[instrument(
        name = "cloudpipe_supervisor::run",
        target = "supervisor::supervisor",
        skip_all,
        fields(program = %command.program),
        level = "info"
    )]
    pub async fn run(&self, command: &CommandSpec) -> Result<RunSummary, RunError> {
        let started = Instant::now();
        let mut lifecycle = Lifecycle::new();

        // Pipes are created and the executable launched by the same call, so
        // a launch failure surfaces before any stream handle exists.
        let mut child = Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| {
                lifecycle.fail(RunError::Start {
                    program: command.program.clone(),
                    source,
                })
            })?;

        let stdout = child.stdout.take().ok_or_else(|| {
            lifecycle.fail(RunError::Spawn {
                stream: OutputStream::Stdout,
            })
        })?;
        let stderr = child.stderr.take().ok_or_else(|| {
            lifecycle.fail(RunError::Spawn {
                stream: OutputStream::Stderr,
            })
        })?;
        lifecycle.advance(RunState::Spawned);

        let tailer_stop = CancellationToken::new();
        let stdout_task = tokio::spawn(
            Tailer::new(OutputStream::Stdout, self.forwarder.clone(), self.config.max_line_bytes)
                .run(stdout, tailer_stop.clone()),
        );
        let stderr_task = tokio::spawn(
            Tailer::new(OutputStream::Stderr, self.forwarder.clone(), self.config.max_line_bytes)
                .run(stderr, tailer_stop.clone()),
        );
        lifecycle.advance(RunState::Running);
        tracing::info!(pid = child.id(), args = ?command.args, "Child process started");

        lifecycle.advance(RunState::Draining);
        let (stdout, stderr) = self
            .drain(&mut child, stdout_task, stderr_task, tailer_stop)
            .await;

        lifecycle.advance(RunState::Flushing);
        let flush_started = Instant::now();
        let flushed = self.forwarder.flush().await;
        observe_duration(&FLUSH_DURATION_SECONDS, flush_started);
        flushed.map_err(|e| lifecycle.fail(RunError::Flush(e)))?;

        lifecycle.advance(RunState::Waiting);
        let status = child.wait().await.map_err(|source| {
            lifecycle.fail(RunError::WaitIo {
                program: command.program.clone(),
                source,
            })
        })?;

        let exit_code = match status.code() {
            Some(code) => i64::from(code),
            None => i64::from(status_exit_code(status)),
        };
        CHILD_EXIT_CODE.set(exit_code);

        if !status.success() {
            return Err(lifecycle.fail(RunError::Wait {
                program: command.program.clone(),
                status,
            }));
        }

        lifecycle.advance(RunState::Succeeded);
        let summary = RunSummary {
            status,
            stdout,
            stderr,
            elapsed: started.elapsed(),
        };
        tracing::info!(
            stdout_lines = summary.stdout.lines,
            stderr_lines = summary.stderr.lines,
            elapsed_ms = summary.elapsed.as_millis() as u64,
            "Run succeeded"
        );
        Ok(summary)
    }

    /// Join both tailers. On cancellation or timeout the child is killed
    /// first; tailers still reading after the grace period are stopped.
    async fn drain(
        &self,
        child: &mut Child,
        mut stdout: JoinHandle<TailerReport>,
        mut stderr: JoinHandle<TailerReport>,
        tailer_stop: CancellationToken,
    ) -> (TailerReport, TailerReport) {
        // A deadline too far out to represent means no deadline.
        let deadline = self
            .config
            .timeout
            .and_then(|timeout| tokio::time::Instant::now().checked_add(timeout));

        let tailers = async { tokio::join!(&mut stdout, &mut stderr) };
        tokio::pin!(tailers);

        let reason = tokio::select! {
            biased;
            (out, err) = &mut tailers => return joined(out, err),
            _ = self.cancel.cancelled() => "cancelled",
            _ = sleep_until(deadline) => "timed out",
        };

        tracing::warn!(reason, pid = child.id(), "Run interrupted, killing child process");
        if let Err(e) = child.start_kill() {
            tracing::warn!(error = %e, "Failed to kill child process");
        }

        let (out, err) = match tokio::time::timeout(self.config.drain_grace, &mut tailers).await {
            Ok(joined) => joined,
            Err(_) => {
                tracing::warn!(
                    grace_ms = self.config.drain_grace.as_millis() as u64,
                    "Child output still open after grace period, stopping tailers"
                );
                tailer_stop.cancel();
                tailers.await
            }
        };
        joined(out, err)
    }
}

fn joined(
    out: Result<TailerReport, JoinError>,
    err: Result<TailerReport, JoinError>,
) -> (TailerReport, TailerReport) {
    (
        report_or_aborted(OutputStream::Stdout, out),
        report_or_aborted(OutputStream::Stderr, err),
    )
}

fn report_or_aborted(stream: OutputStream, result: Result<TailerReport, JoinError>) -> TailerReport {
    result.unwrap_or_else(|e| {
        tracing::error!(%stream, error = %e, "Tailer task did not complete");
        TailerReport {
            end: TailerEnd::Aborted,
            ..TailerReport::new(stream)
        }
    })
}

async fn sleep_until(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Tracks the run's position in the `RunState` machine.
#[derive(Debug)]
struct Lifecycle {
    state: RunState,
}

impl Lifecycle {
    fn new() -> Self {
        Self {
            state: RunState::Created,
        }
    }

    fn advance(&mut self, next: RunState) {
        debug_assert!(
            self.state.can_advance_to(next),
            "illegal run state transition {} -> {}",
            self.state,
            next
        );
        tracing::debug!(from = %self.state, to = %next, "Run state transition");
        self.state = next;
    }

    fn fail(&mut self, err: RunError) -> RunError {
        self.advance(RunState::Failed(err.kind()));
        err
    }
}
