//! Diagnostics for cloudpipe itself. These never reach the forwarder.

pub mod tracing;
