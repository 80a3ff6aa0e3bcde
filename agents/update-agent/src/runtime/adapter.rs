//! Workload Runtime Trait
//!
//! Defines the stop/start capability the command handler drives.

use async_trait::async_trait;
use std::path::Path;

/// Result of a single runtime invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub ok: bool,
    /// Runtime output on success, its error output verbatim on failure
    pub diagnostic: String,
}

impl Outcome {
    pub fn success(diagnostic: impl Into<String>) -> Self {
        Self {
            ok: true,
            diagnostic: diagnostic.into(),
        }
    }

    pub fn failure(diagnostic: impl Into<String>) -> Self {
        Self {
            ok: false,
            diagnostic: diagnostic.into(),
        }
    }
}

/// Workload runtime trait - brings the workload of a directory down or up.
///
/// Each call is a single attempt; callers get the outcome as-is.
#[async_trait]
pub trait WorkloadRuntime: Send + Sync {
    /// Get the runtime type name
    fn runtime_type(&self) -> &str;

    /// Bring the workload described in `directory` down
    async fn stop(&self, directory: &Path) -> Outcome;

    /// Bring the workload described in `directory` up, detached
    async fn start(&self, directory: &Path) -> Outcome;
}
