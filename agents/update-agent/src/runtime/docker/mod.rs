//! Docker Runtime Module
//!
//! Read-only view of the Docker daemon through bollard.

pub mod adapter;

pub use adapter::DockerAdapter;
