//! Process-wide Prometheus collectors for a cloudpipe run.

#[allow(clippy::module_inception)]
pub mod metrics;
