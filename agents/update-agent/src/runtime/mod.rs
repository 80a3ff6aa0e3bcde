//! Runtime module
//!
//! Abstraction over the tool that actually brings the workload down and up,
//! plus a Docker probe used for startup checks and status output.

pub mod adapter;
pub mod compose;
pub mod docker;
