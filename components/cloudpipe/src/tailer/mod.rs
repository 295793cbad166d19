//! Capture of the child's output streams.
//!
//! One `Tailer` per stream, each fed by a `LineReader`:
//!
//! ```text
//! ChildStdout -> LineReader -> Tailer(INFO)  -\
//!                                               >-> LogForwarder
//! ChildStderr -> LineReader -> Tailer(ERROR) -/
//! ```

pub mod async_read;
pub mod models;
pub mod reader;
#[allow(clippy::module_inception)]
pub mod tailer;

pub use models::{OutputStream, TailerEnd, TailerReport};
pub use tailer::Tailer;
