//! Agent error taxonomy
//!
//! Every failure a command can hit maps onto one of these variants. The
//! `Display` text is what the controller sees in `UpdateResult.message`.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the configuration store, workload controller and
/// command handler
#[derive(Debug, Error)]
pub enum AgentError {
    /// No compose file exists in the workload directory
    #[error("Compose file not found in {}", .0.display())]
    ConfigNotFound(PathBuf),

    /// The compose file could not be read or has no usable service entry
    #[error("Invalid compose file {}: {reason}", .path.display())]
    ConfigMalformed { path: PathBuf, reason: String },

    /// The image string is not `repository/name:tag`
    #[error("Invalid image format '{0}': expected repository/name:tag")]
    ImageFormatInvalid(String),

    /// Writing the rewritten compose file failed
    #[error("Failed to write {}: {source}", .path.display())]
    ConfigWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The runtime could not bring the workload down; carries its diagnostic
    #[error("{0}")]
    WorkloadStopFailed(String),

    /// The runtime could not bring the workload up; carries its diagnostic
    #[error("{0}")]
    WorkloadStartFailed(String),

    /// The request was rejected before any side effect
    #[error("{0}")]
    ValidationFailed(String),

    /// The request named a command this agent does not understand
    #[error("Unknown command")]
    UnknownCommand(String),

    /// The message bus could not be reached
    #[error("Message bus unavailable: {0}")]
    TransportUnavailable(String),

    /// An outgoing message could not be serialized
    #[error("Failed to encode message: {0}")]
    EncodeFailed(#[from] serde_json::Error),
}

impl AgentError {
    /// Short machine-readable code used in log fields
    pub fn code(&self) -> &'static str {
        match self {
            AgentError::ConfigNotFound(_) => "CONFIG_NOT_FOUND",
            AgentError::ConfigMalformed { .. } => "CONFIG_MALFORMED",
            AgentError::ImageFormatInvalid(_) => "IMAGE_FORMAT_INVALID",
            AgentError::ConfigWriteFailed { .. } => "CONFIG_WRITE_FAILED",
            AgentError::WorkloadStopFailed(_) => "STOP_FAILED",
            AgentError::WorkloadStartFailed(_) => "START_FAILED",
            AgentError::ValidationFailed(_) => "VALIDATION_FAILED",
            AgentError::UnknownCommand(_) => "UNKNOWN_COMMAND",
            AgentError::TransportUnavailable(_) => "TRANSPORT_UNAVAILABLE",
            AgentError::EncodeFailed(_) => "ENCODE_FAILED",
        }
    }
}

pub type AgentResult<T> = std::result::Result<T, AgentError>;
