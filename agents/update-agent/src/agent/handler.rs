//! Command Handler
//!
//! Drives one update or stop command through the compose store and the
//! workload runtime, strictly in order, and turns the result into the RPC
//! response. Every failure short-circuits with the failing step's own
//! diagnostic; nothing is retried or rolled back.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::agent::state::{CommandPhase, PhaseTracker};
use crate::connection::protocol::{CommandRequest, UpdateCommand, UpdateResult};
use crate::error::{AgentError, AgentResult};
use crate::runtime::adapter::WorkloadRuntime;
use crate::workload::reference::WorkloadReference;
use crate::workload::store::ComposeStore;

/// What came out of handling one command
#[derive(Debug, Clone)]
pub struct CommandReport {
    /// Response for the caller
    pub result: UpdateResult,
    /// Phases visited, starting with `Idle`
    pub phases: Vec<CommandPhase>,
    /// Directory the command targeted, once known
    pub directory: Option<PathBuf>,
    /// New workload reference when an update fully completed
    pub updated: Option<WorkloadReference>,
}

impl CommandReport {
    /// Report for a request that never made it past decoding
    pub fn rejected(error: AgentError) -> Self {
        let mut tracker = PhaseTracker::new("invalid");
        tracker.fail(error.code());
        Self {
            result: UpdateResult::from(&error),
            phases: tracker.path(),
            directory: None,
            updated: None,
        }
    }

    pub fn final_phase(&self) -> CommandPhase {
        self.phases.last().copied().unwrap_or(CommandPhase::Idle)
    }
}

/// Command handler for stop and update requests
pub struct CommandHandler<R: WorkloadRuntime> {
    store: ComposeStore,
    runtime: Arc<R>,
    default_directory: PathBuf,
}

impl<R: WorkloadRuntime> CommandHandler<R> {
    /// Create a new command handler
    pub fn new(store: ComposeStore, runtime: Arc<R>, default_directory: PathBuf) -> Self {
        Self {
            store,
            runtime,
            default_directory,
        }
    }

    /// Validate and execute a request as it came off the wire
    pub async fn handle(&self, request: CommandRequest) -> CommandReport {
        let label = request.command.clone();
        match request.into_command(&self.default_directory) {
            Ok(command) => self.execute(command).await,
            Err(e) => {
                warn!(command = %label, code = e.code(), error = %e, "Command rejected");
                CommandReport::rejected(e)
            }
        }
    }

    /// Execute a validated command
    pub async fn execute(&self, command: UpdateCommand) -> CommandReport {
        let mut tracker = PhaseTracker::new(command.name());
        let directory = command.directory().to_path_buf();

        info!(
            command = command.name(),
            directory = %directory.display(),
            runtime = self.runtime.runtime_type(),
            "Processing command"
        );

        let outcome = match &command {
            UpdateCommand::Stop { directory } => self
                .stop(directory, &mut tracker)
                .await
                .map(|message| (message, None)),
            UpdateCommand::UpdateVersion {
                directory,
                new_version,
            } => self
                .update_version(directory, new_version, &mut tracker)
                .await
                .map(|reference| {
                    let message = format!(
                        "Updated {} to version {}",
                        reference.application_name, reference.version_tag
                    );
                    (message, Some(reference))
                }),
        };

        let (result, updated) = match outcome {
            Ok((message, updated)) => {
                tracker.transition_to(CommandPhase::Done, None);
                info!(command = command.name(), message = %message, "Command succeeded");
                (UpdateResult::succeeded(message), updated)
            }
            Err(e) => {
                tracker.fail(e.code());
                error!(
                    command = command.name(),
                    code = e.code(),
                    error = %e,
                    "Command failed"
                );
                (UpdateResult::from(&e), None)
            }
        };

        CommandReport {
            result,
            phases: tracker.path(),
            directory: Some(directory),
            updated,
        }
    }

    async fn stop(&self, directory: &Path, tracker: &mut PhaseTracker) -> AgentResult<String> {
        tracker.transition_to(CommandPhase::Restarting, Some("stop only".to_string()));

        let outcome = self.runtime.stop(directory).await;
        if !outcome.ok {
            return Err(AgentError::WorkloadStopFailed(outcome.diagnostic));
        }

        Ok(format!("Workload stopped in {}", directory.display()))
    }

    async fn update_version(
        &self,
        directory: &Path,
        new_version: &str,
        tracker: &mut PhaseTracker,
    ) -> AgentResult<WorkloadReference> {
        tracker.transition_to(CommandPhase::Validating, None);
        let current = self.store.load(directory)?;
        let updated = current.with_version(new_version)?;

        tracker.transition_to(
            CommandPhase::Mutating,
            Some(format!("{} -> {}", current.version_tag, updated.version_tag)),
        );
        self.store.rewrite(directory, &updated)?;

        // From here on the compose file already names the new version
        tracker.transition_to(CommandPhase::Restarting, None);
        let stopped = self.runtime.stop(directory).await;
        if !stopped.ok {
            return Err(AgentError::WorkloadStopFailed(stopped.diagnostic));
        }

        let started = self.runtime.start(directory).await;
        if !started.ok {
            return Err(AgentError::WorkloadStartFailed(started.diagnostic));
        }

        Ok(updated)
    }
}
