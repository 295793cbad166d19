use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    // Main entrypoint simply delegates control to the CLI layer, which loads
    // configuration, sets up diagnostics and supervises the child.
    cloudpipe::cli::cli::run().await
}
