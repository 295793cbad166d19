// Local crates
use crate::helpers::load_config::DiagnosticsConfig;

// External crates
use anyhow::{Context, Result};
use std::panic;
use tracing::error;
use tracing_appender::{non_blocking::WorkerGuard, rolling};
use tracing_error::ErrorLayer;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*, registry::Registry};

const LOG_FILE_PREFIX: &str = "cloudpipe.log";

/// Install the global subscriber. Diagnostics go to stderr, or to a daily
/// rolling file when `log_dir` is set. Keep the returned guard alive until
/// exit or buffered lines are lost.
pub fn init_tracing(cfg: &DiagnosticsConfig) -> Result<WorkerGuard> {
    let (writer, guard) = match &cfg.log_dir {
        Some(dir) => tracing_appender::non_blocking(rolling::daily(dir, LOG_FILE_PREFIX)),
        None => tracing_appender::non_blocking(std::io::stderr()),
    };

    // RUST_LOG wins over the configured level.
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&cfg.level)
            .with_context(|| format!("invalid diagnostics level `{}`", cfg.level))?,
    };

    let fmt_layer = (!cfg.json).then(|| {
        fmt::layer()
            .with_ansi(cfg.log_dir.is_none())
            .with_writer(writer.clone())
            .with_target(false)
            .with_timer(fmt::time::UtcTime::rfc_3339())
    });

    let json_layer = cfg.json.then(|| {
        fmt::layer()
            .json()
            .with_writer(writer.clone())
            .with_file(true)
            .with_line_number(true)
            .with_thread_ids(true)
            .with_target(false)
            .with_timer(fmt::time::UtcTime::rfc_3339())
    });

    Registry::default()
        .with(filter)
        .with(fmt_layer)
        .with(json_layer)
        .with(ErrorLayer::default())
        .try_init()
        .context("failed to set global tracing subscriber")?;

    Ok(guard)
}

pub fn init_panic_handler() {
    panic::set_hook(Box::new(|panic_info| {
        let payload = panic_info.payload();
        let msg = payload
            .downcast_ref::<&str>()
            .copied()
            .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
            .unwrap_or("Unknown panic");

        let location = panic_info
            .location()
            .map(|l| format!("{}:{}", l.file(), l.line()))
            .unwrap_or_else(|| "unknown location".to_string());

        error!(
            message = %msg,
            location = %location,
            "cloudpipe panicked"
        );
    }));
}
