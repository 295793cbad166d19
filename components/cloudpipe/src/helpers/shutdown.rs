// External crates
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

/// Run-wide shutdown signal, built on a `CancellationToken`.
///
/// - The supervisor holds a clone of `token()` and reacts to it while draining.
/// - `trigger()` fires it by hand; `spawn_signal_listener()` fires it on
///   SIGINT or SIGTERM.
/// - Cancelling is idempotent and every clone observes it.
#[derive(Debug, Clone, Default)]
pub struct Shutdown {
    token: CancellationToken,
}

impl Shutdown {
    #[instrument(
        name = "cloudpipe_shutdown::new",
        target = "helpers::shutdown",
        level = "trace"
    )]
    pub fn new() -> Self {
        tracing::trace!("Creating run shutdown token");
        Self {
            token: CancellationToken::new(),
        }
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    #[instrument(
        name = "cloudpipe_shutdown::trigger",
        target = "helpers::shutdown",
        skip_all,
        level = "trace"
    )]
    pub fn trigger(&self) {
        tracing::trace!("Shutdown triggered");
        self.token.cancel();
    }

    /// Trigger on the first SIGINT (Ctrl+C) or SIGTERM. The listener ends
    /// once the token is cancelled by any other path too.
    pub fn spawn_signal_listener(&self) -> JoinHandle<()> {
        let shutdown = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown.token.cancelled() => {}
                signal = wait_for_signal() => {
                    tracing::warn!(signal, "Received termination signal, stopping child process");
                    shutdown.trigger();
                }
            }
        })
    }
}

#[cfg(unix)]
async fn wait_for_signal() -> &'static str {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to install SIGTERM handler, listening for Ctrl+C only");
            return ctrl_c().await;
        }
    };

    tokio::select! {
        name = ctrl_c() => name,
        _ = sigterm.recv() => "SIGTERM",
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> &'static str {
    ctrl_c().await
}

async fn ctrl_c() -> &'static str {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
    "SIGINT"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn trigger_reaches_every_clone() {
        let shutdown = Shutdown::new();
        let token = shutdown.token();
        let other = shutdown.clone();

        assert!(!token.is_cancelled());
        other.trigger();
        other.trigger();

        assert!(token.is_cancelled());
        assert!(shutdown.token().is_cancelled());
    }

    #[tokio::test]
    async fn signal_listener_exits_after_trigger() {
        let shutdown = Shutdown::new();
        let listener = shutdown.spawn_signal_listener();

        shutdown.trigger();
        tokio::time::timeout(std::time::Duration::from_secs(1), listener)
            .await
            .unwrap()
            .unwrap();
    }
}
