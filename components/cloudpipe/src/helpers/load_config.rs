// External crates
use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::instrument;

/// Prefix of environment variables overriding configuration values, e.g.
/// `CLOUDPIPE_FORWARDER__ACCESS_TOKEN`.
pub const ENV_PREFIX: &str = "CLOUDPIPE";

/// Largest `entries:write` request body Cloud Logging accepts.
pub const MAX_REQUEST_BYTES: usize = 10_000_000;

/// Upper bound for `process.timeout_secs` (one year).
pub const MAX_TIMEOUT_SECS: u64 = 365 * 24 * 60 * 60;

#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct Config {
    pub forwarder: ForwarderConfig,
    pub capture: CaptureConfig,
    pub process: ProcessConfig,
    pub diagnostics: DiagnosticsConfig,
    pub metrics: MetricsConfig,
}

impl Config {
    /// Load configuration from built-in defaults, the optional TOML file and
    /// `CLOUDPIPE_*` environment variables, in increasing precedence.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with_env(path, environment())
    }

    /// Same as [`Config::load`] with an explicit environment source.
    #[instrument(
        name = "config_loader",
        target = "helpers::load_config",
        level = "trace",
        skip_all
    )]
    pub fn load_with_env(path: Option<&Path>, env: config::Environment) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path_ref) = path {
            tracing::trace!(
                configuration_file_path = %path_ref.display(),
                "Loading cloudpipe configuration file"
            );
            builder = builder.add_source(
                config::File::from(path_ref)
                    .format(config::FileFormat::Toml)
                    .required(true),
            );
        }

        let settings = builder
            .add_source(env)
            .build()
            .with_context(|| match path {
                Some(p) => format!("Failed to read config file at {:?}", p),
                None => "Failed to read configuration from environment".to_string(),
            })?;

        let cfg: Config = settings
            .try_deserialize()
            .context("Failed to deserialize configuration")?;
        cfg.validate()?;

        tracing::trace!("cloudpipe configuration loaded successfully");
        Ok(cfg)
    }

    /// Reject values the runtime cannot work with.
    pub fn validate(&self) -> Result<()> {
        let fwd = &self.forwarder;
        if fwd.batch_size == 0 {
            bail!("forwarder.batch_size must be at least 1");
        }
        if !(1024..=MAX_REQUEST_BYTES).contains(&fwd.batch_bytes) {
            bail!(
                "forwarder.batch_bytes must be between 1024 and {MAX_REQUEST_BYTES}, got {}",
                fwd.batch_bytes
            );
        }
        if fwd.batch_delay_ms == 0 {
            bail!("forwarder.batch_delay_ms must be at least 1");
        }
        if fwd.request_timeout_ms == 0 {
            bail!("forwarder.request_timeout_ms must be at least 1");
        }
        if fwd.log_id.is_empty() {
            bail!("forwarder.log_id must not be empty");
        }
        if fwd.backoff_factor < 1.0 {
            bail!("forwarder.backoff_factor must be >= 1.0, got {}", fwd.backoff_factor);
        }
        if !(0.0..1.0).contains(&fwd.retry_jitter) {
            bail!("forwarder.retry_jitter must be in [0, 1), got {}", fwd.retry_jitter);
        }
        if fwd.auth_mode == AuthMode::StaticToken && fwd.access_token.is_none() {
            bail!("forwarder.auth_mode = \"static-token\" requires forwarder.access_token");
        }
        if self.capture.max_line_bytes == 0 {
            bail!("capture.max_line_bytes must be at least 1");
        }
        if let Some(secs) = self.process.timeout_secs {
            if secs == 0 || secs > MAX_TIMEOUT_SECS {
                bail!("process.timeout_secs must be between 1 and {MAX_TIMEOUT_SECS}, got {secs}");
            }
        }
        Ok(())
    }
}

fn environment() -> config::Environment {
    config::Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
}

/// How the forwarder authenticates against the logging endpoint.
#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum AuthMode {
    /// OAuth token from the GCE/GKE metadata server.
    #[default]
    MetadataServer,
    /// `forwarder.access_token` sent as a bearer token.
    StaticToken,
    /// No `Authorization` header, for emulators.
    Anonymous,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct ForwarderConfig {
    pub endpoint: String,
    pub log_id: String,
    pub auth_mode: AuthMode,
    pub access_token: Option<String>,
    pub metadata_host: String,
    pub batch_size: usize,
    /// Upper bound for the size of one request body.
    pub batch_bytes: usize,
    pub batch_delay_ms: u64,
    pub request_timeout_ms: u64,
    pub max_retries: u32,
    pub initial_retry_delay_ms: u64,
    pub max_retry_delay_ms: u64,
    pub backoff_factor: f64,
    pub retry_jitter: f64,
}

impl Default for ForwarderConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://logging.googleapis.com".to_string(),
            log_id: "cloudpipe".to_string(),
            auth_mode: AuthMode::default(),
            access_token: None,
            metadata_host: "http://metadata.google.internal".to_string(),
            batch_size: 500,
            batch_bytes: 8 * 1024 * 1024,
            batch_delay_ms: 1000,
            request_timeout_ms: 30_000,
            max_retries: 5,
            initial_retry_delay_ms: 200,
            max_retry_delay_ms: 10_000,
            backoff_factor: 2.0,
            retry_jitter: 0.2,
        }
    }
}

impl ForwarderConfig {
    /// Never zero, a zero ticker period panics.
    pub fn batch_delay(&self) -> Duration {
        Duration::from_millis(self.batch_delay_ms.max(1))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct CaptureConfig {
    /// Lines longer than this are forwarded as several entries.
    pub max_line_bytes: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            max_line_bytes: 64 * 1024,
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct ProcessConfig {
    pub timeout_secs: Option<u64>,
    pub drain_grace_ms: u64,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            timeout_secs: None,
            drain_grace_ms: 5000,
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct DiagnosticsConfig {
    pub level: String,
    pub json: bool,
    pub log_dir: Option<PathBuf>,
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            log_dir: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct MetricsConfig {
    /// Write the metrics registry here in Prometheus text format after the run.
    pub textfile: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn env(vars: &[(&str, &str)]) -> config::Environment {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        environment().source(Some(map))
    }

    #[test]
    fn defaults_without_file_or_env() {
        let cfg = Config::load_with_env(None, env(&[])).unwrap();
        assert_eq!(cfg, Config::default());
        assert_eq!(cfg.forwarder.endpoint, "https://logging.googleapis.com");
        assert_eq!(cfg.forwarder.log_id, "cloudpipe");
        assert_eq!(cfg.capture.max_line_bytes, 65536);
    }

    #[test]
    fn file_values_override_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[forwarder]
endpoint = "http://localhost:8085"
auth_mode = "anonymous"
batch_size = 10

[process]
timeout_secs = 30

[diagnostics]
json = true
"#
        )
        .unwrap();

        let cfg = Config::load_with_env(Some(file.path()), env(&[])).unwrap();
        assert_eq!(cfg.forwarder.endpoint, "http://localhost:8085");
        assert_eq!(cfg.forwarder.auth_mode, AuthMode::Anonymous);
        assert_eq!(cfg.forwarder.batch_size, 10);
        assert_eq!(cfg.forwarder.log_id, "cloudpipe");
        assert_eq!(cfg.process.timeout_secs, Some(30));
        assert!(cfg.diagnostics.json);
    }

    #[test]
    fn environment_overrides_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[forwarder]\nbatch_size = 10").unwrap();

        let cfg = Config::load_with_env(
            Some(file.path()),
            env(&[
                ("CLOUDPIPE_FORWARDER__BATCH_SIZE", "25"),
                ("CLOUDPIPE_FORWARDER__AUTH_MODE", "static-token"),
                ("CLOUDPIPE_FORWARDER__ACCESS_TOKEN", "ya29.token"),
            ]),
        )
        .unwrap();
        assert_eq!(cfg.forwarder.batch_size, 25);
        assert_eq!(cfg.forwarder.auth_mode, AuthMode::StaticToken);
        assert_eq!(cfg.forwarder.access_token.as_deref(), Some("ya29.token"));
    }

    #[test]
    fn missing_file_is_an_error() {
        let err = Config::load_with_env(Some(Path::new("/nonexistent/cloudpipe.toml")), env(&[]))
            .unwrap_err();
        assert!(format!("{err:#}").contains("Failed to read config file"));
    }

    #[test]
    fn invalid_values_are_rejected() {
        let mut cfg = Config::default();
        cfg.forwarder.batch_size = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = Config::default();
        cfg.forwarder.retry_jitter = 1.5;
        assert!(cfg.validate().is_err());

        let mut cfg = Config::default();
        cfg.forwarder.auth_mode = AuthMode::StaticToken;
        assert!(cfg.validate().is_err());

        let mut cfg = Config::default();
        cfg.capture.max_line_bytes = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = Config::default();
        cfg.forwarder.batch_delay_ms = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = Config::default();
        cfg.forwarder.request_timeout_ms = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = Config::default();
        cfg.forwarder.batch_bytes = MAX_REQUEST_BYTES + 1;
        assert!(cfg.validate().is_err());

        let mut cfg = Config::default();
        cfg.process.timeout_secs = Some(u64::MAX);
        assert!(cfg.validate().is_err());

        let mut cfg = Config::default();
        cfg.process.timeout_secs = Some(0);
        assert!(cfg.validate().is_err());

        let mut cfg = Config::default();
        cfg.process.timeout_secs = Some(MAX_TIMEOUT_SECS);
        assert!(cfg.validate().is_ok());
    }
}
