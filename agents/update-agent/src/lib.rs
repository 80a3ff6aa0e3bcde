//! Update Agent Library
//!
//! This crate provides the core functionality for the per-host update agent:
//! reading and rewriting the workload's compose file, stopping and starting
//! the workload, announcing its version and serving update commands over the
//! message bus.

pub mod agent;
pub mod cli;
pub mod connection;
pub mod error;
pub mod runtime;
pub mod workload;

#[cfg(test)]
pub(crate) mod testing;

// Re-exports for convenience
pub use agent::handler::CommandHandler;
pub use agent::reporter::VersionReporter;
pub use agent::runner::{Agent, AgentSettings};
pub use cli::config::Config;
pub use connection::bus::MessageBus;
pub use connection::protocol::{CommandRequest, UpdateCommand, UpdateResult, VersionAnnouncement};
pub use connection::transport::{RedisBus, RpcListener};
pub use error::{AgentError, AgentResult};
pub use runtime::adapter::{Outcome, WorkloadRuntime};
pub use runtime::compose::ComposeRuntime;
pub use runtime::docker::adapter::DockerAdapter;
pub use workload::{ComposeStore, WorkloadReference};
