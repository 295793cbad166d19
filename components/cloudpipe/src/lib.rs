//! cloudpipe runs a command and forwards every line it writes to stdout or
//! stderr to Google Cloud Logging, then exits with the command's status.

pub mod cli;
pub mod forwarder;
pub mod helpers;
pub mod instrumentation;
pub mod metrics;
pub mod runtime;
pub mod supervisor;
pub mod tailer;
