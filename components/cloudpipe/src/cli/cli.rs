use crate::{
    forwarder::ResourceDescriptor,
    helpers::{load_config::Config, shutdown::Shutdown},
    instrumentation,
    runtime,
    supervisor::{CommandSpec, RunError},
};
use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(
    name = "cloudpipe",
    about = "Run a command and forward its output to Google Cloud Logging",
    long_about = "cloudpipe runs a command, turns every line it writes to stdout (INFO) or \
                  stderr (ERROR) into a Cloud Logging entry attached to a generic_task \
                  resource, and exits with the command's status once every entry was delivered.",
    version,
    term_width = 100,
    after_help = "\
    EXAMPLES:
        cloudpipe -p my-project -l us-central1 -j nightly -- ./backup.sh --full
        cloudpipe -p my-project -c /etc/cloudpipe.toml -- python3 -u train.py"
)]
pub struct Cli {
    /// Project the log entries are written to
    #[arg(short = 'p', long)]
    pub project_id: String,

    /// Location label of the generic_task resource
    #[arg(short = 'l', long, default_value = "")]
    pub location: String,

    /// Namespace label of the generic_task resource
    #[arg(short = 'n', long, default_value = "")]
    pub namespace: String,

    /// Job label of the generic_task resource
    #[arg(short = 'j', long, default_value = "")]
    pub job: String,

    /// Task id label of the generic_task resource
    #[arg(short = 't', long, default_value = "")]
    pub task_id: String,

    /// Optional TOML configuration file
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,

    /// Command to run, followed by its arguments
    #[arg(
        required = true,
        num_args = 1..,
        trailing_var_arg = true,
        allow_hyphen_values = true,
        value_name = "COMMAND"
    )]
    pub command: Vec<String>,
}

impl Cli {
    pub fn resource(&self) -> ResourceDescriptor {
        ResourceDescriptor {
            project_id: self.project_id.clone(),
            location: self.location.clone(),
            namespace: self.namespace.clone(),
            job: self.job.clone(),
            task_id: self.task_id.clone(),
        }
    }

    pub fn command_spec(&self) -> Option<CommandSpec> {
        CommandSpec::from_argv(self.command.clone())
    }
}

/// Entry function for CLI
pub async fn run() -> ExitCode {
    let cli = Cli::parse();

    match execute(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("cloudpipe: {err:#}");
            ExitCode::from(exit_code(&err))
        }
    }
}

async fn execute(cli: Cli) -> Result<()> {
    let config = Config::load(cli.config.as_deref())?;
    let command = cli
        .command_spec()
        .context("no command given to run")?;

    // Held until the run is over so buffered diagnostics reach their writer.
    let _guard = instrumentation::tracing::init_tracing(&config.diagnostics)?;
    instrumentation::tracing::init_panic_handler();

    let shutdown = Shutdown::new();
    let listener = shutdown.spawn_signal_listener();

    let outcome = runtime::runtime::run_cloudpipe(&config, &cli.resource(), &command, &shutdown).await;

    shutdown.trigger();
    let _ = listener.await;

    outcome.map(|_| ())
}

/// The child's own status for a failed child, 1 for everything else.
fn exit_code(err: &anyhow::Error) -> u8 {
    err.downcast_ref::<RunError>()
        .map_or(1, RunError::exit_code)
}
