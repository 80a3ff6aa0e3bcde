//! Workload module
//!
//! The workload is described by a single compose file. This module parses the
//! image reference of its first service and rewrites it in place.

pub mod reference;
pub mod store;

pub use reference::WorkloadReference;
pub use store::ComposeStore;
