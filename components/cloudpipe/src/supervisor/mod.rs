//! Process supervision: start the child, drain both of its output streams,
//! flush the forwarder, then collect the exit status.

pub mod error;
pub mod models;
#[allow(clippy::module_inception)]
pub mod supervisor;

pub use error::{FailureKind, RunError};
pub use models::{CommandSpec, RunState, RunSummary, SupervisorConfig};
pub use supervisor::Supervisor;
