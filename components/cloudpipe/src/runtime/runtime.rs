// Local crates
use crate::{
    forwarder::{CloudLogger, LogForwarder, ResourceDescriptor},
    helpers::{load_config::Config, shutdown::Shutdown},
    metrics::metrics::write_textfile,
    supervisor::{CommandSpec, RunError, RunSummary, Supervisor, SupervisorConfig},
};

// External crates
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::instrument;

/// Build the Cloud Logging client, supervise `command` and release the client.
///
/// The client is closed on every path once it was built, and the metrics
/// textfile (if configured) is written whether or not the run succeeded. A
/// failed run comes back as a `RunError` wrapped in context.
#[instrument(
    name = "cloudpipe_runtime::run",
    target = "runtime::runtime",
    skip_all,
    fields(project_id = %resource.project_id, log_id = %config.forwarder.log_id),
    level = "info"
)]
pub async fn run_cloudpipe(
    config: &Config,
    resource: &ResourceDescriptor,
    command: &CommandSpec,
    shutdown: &Shutdown,
) -> Result<RunSummary> {
    let logger = CloudLogger::new(&config.forwarder, resource)
        .map_err(RunError::ClientInit)
        .with_context(|| format!("cannot forward logs to {}", config.forwarder.endpoint))?;
    let logger = Arc::new(logger);

    let outcome = run_with_forwarder(config, logger.clone(), command, shutdown).await;

    if let Err(e) = logger.close().await {
        tracing::warn!(error = %e, "Failed to close Cloud Logging client");
    }
    outcome
}

/// Everything after the client exists. Generic so any `LogForwarder` can be
/// plugged in.
pub async fn run_with_forwarder<F>(
    config: &Config,
    forwarder: Arc<F>,
    command: &CommandSpec,
    shutdown: &Shutdown,
) -> Result<RunSummary>
where
    F: LogForwarder + 'static,
{
    let supervisor = Supervisor::new(
        forwarder,
        SupervisorConfig::from_config(&config.capture, &config.process),
        shutdown.token(),
    );
    let outcome = supervisor.run(command).await;

    if let Some(path) = &config.metrics.textfile {
        match write_textfile(path) {
            Ok(()) => tracing::debug!(path = %path.display(), "Metrics textfile written"),
            Err(e) => tracing::warn!(error = %e, "Failed to write metrics textfile"),
        }
    }

    outcome.with_context(|| format!("run of `{}` failed", command.program))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::forwarder::{ForwarderError, LogEntry};
    use crate::supervisor::FailureKind;
    use std::future::Future;
    use std::sync::Mutex;

    #[derive(Debug, Default)]
    struct CountingForwarder {
        entries: Mutex<usize>,
    }

    impl LogForwarder for CountingForwarder {
        fn log(&self, _entry: LogEntry) {
            *self.entries.lock().unwrap() += 1;
        }

        fn flush(&self) -> impl Future<Output = Result<(), ForwarderError>> + Send {
            async { Ok(()) }
        }
    }

    fn sh(script: &str) -> CommandSpec {
        CommandSpec::from_argv(vec!["sh".into(), "-c".into(), script.into()]).unwrap()
    }

    #[tokio::test]
    async fn writes_metrics_textfile_after_a_failed_run() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cloudpipe.prom");
        let mut config = Config::default();
        config.metrics.textfile = Some(path.clone());

        let fwd = Arc::new(CountingForwarder::default());
        let err = run_with_forwarder(&config, fwd.clone(), &sh("echo done; exit 4"), &Shutdown::new())
            .await
            .unwrap_err();

        let run_error = err.downcast_ref::<RunError>().unwrap();
        assert_eq!(run_error.kind(), FailureKind::Wait);
        assert_eq!(run_error.exit_code(), 4);
        assert!(format!("{err:#}").contains("run of `sh` failed"));

        assert_eq!(*fwd.entries.lock().unwrap(), 1);
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("cloudpipe_child_exit_code"));
    }

    #[tokio::test]
    async fn invalid_endpoint_is_a_client_init_failure() {
        let mut config = Config::default();
        config.forwarder.endpoint = "ftp://logging.example".to_string();
        config.forwarder.auth_mode = crate::helpers::load_config::AuthMode::Anonymous;

        let err = run_cloudpipe(&config, &ResourceDescriptor::default(), &sh("true"), &Shutdown::new())
            .await
            .unwrap_err();

        assert_eq!(err.downcast_ref::<RunError>().unwrap().kind(), FailureKind::ClientInit);
    }
}
