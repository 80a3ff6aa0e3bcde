//! Command State Machine
//!
//! Tracks the phase a single command is in. Every command starts at `Idle`
//! and ends in `Done` or `Failed`; nothing carries over between commands.

use chrono::{DateTime, Utc};

/// Phases a command moves through
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandPhase {
    /// Request received, nothing done yet
    Idle,
    /// Reading the current workload reference
    Validating,
    /// Rewriting the compose file
    Mutating,
    /// Stopping and/or starting the workload
    Restarting,
    /// Finished successfully
    Done,
    /// Stopped at the step that failed
    Failed,
}

impl std::fmt::Display for CommandPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommandPhase::Idle => write!(f, "Idle"),
            CommandPhase::Validating => write!(f, "Validating"),
            CommandPhase::Mutating => write!(f, "Mutating"),
            CommandPhase::Restarting => write!(f, "Restarting"),
            CommandPhase::Done => write!(f, "Done"),
            CommandPhase::Failed => write!(f, "Failed"),
        }
    }
}

impl CommandPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, CommandPhase::Done | CommandPhase::Failed)
    }
}

/// Phase transition information
#[derive(Debug, Clone)]
pub struct PhaseTransition {
    pub from: CommandPhase,
    pub to: CommandPhase,
    pub timestamp: DateTime<Utc>,
    pub reason: Option<String>,
}

/// Phase tracker for one command
#[derive(Debug)]
pub struct PhaseTracker {
    command: &'static str,
    current: CommandPhase,
    transitions: Vec<PhaseTransition>,
}

impl PhaseTracker {
    /// Start tracking `command` in `Idle`
    pub fn new(command: &'static str) -> Self {
        Self {
            command,
            current: CommandPhase::Idle,
            transitions: Vec::new(),
        }
    }

    /// Get the current phase
    pub fn current(&self) -> CommandPhase {
        self.current
    }

    /// Transition to a new phase
    pub fn transition_to(&mut self, to: CommandPhase, reason: Option<String>) -> bool {
        if !Self::is_valid_transition(self.current, to) {
            tracing::warn!(
                command = self.command,
                from = %self.current,
                to = %to,
                "Rejected command phase transition"
            );
            return false;
        }

        let from = self.current;
        self.current = to;

        tracing::info!(
            command = self.command,
            from = %from,
            to = %to,
            reason = reason.as_deref().unwrap_or(""),
            "Command phase transition"
        );

        self.transitions.push(PhaseTransition {
            from,
            to,
            timestamp: Utc::now(),
            reason,
        });

        true
    }

    /// Mark the command failed
    pub fn fail(&mut self, reason: &str) {
        self.transition_to(CommandPhase::Failed, Some(reason.to_string()));
    }

    /// Check if a phase transition is valid
    fn is_valid_transition(from: CommandPhase, to: CommandPhase) -> bool {
        if from.is_terminal() {
            return false;
        }

        matches!(
            (from, to),
            // From Idle
            (CommandPhase::Idle, CommandPhase::Validating) |
            (CommandPhase::Idle, CommandPhase::Restarting) |
            (CommandPhase::Idle, CommandPhase::Failed) |
            // From Validating
            (CommandPhase::Validating, CommandPhase::Mutating) |
            (CommandPhase::Validating, CommandPhase::Failed) |
            // From Mutating
            (CommandPhase::Mutating, CommandPhase::Restarting) |
            (CommandPhase::Mutating, CommandPhase::Failed) |
            // From Restarting
            (CommandPhase::Restarting, CommandPhase::Done) |
            (CommandPhase::Restarting, CommandPhase::Failed)
        )
    }

    /// Phases visited so far, starting with `Idle`
    pub fn path(&self) -> Vec<CommandPhase> {
        std::iter::once(CommandPhase::Idle)
            .chain(self.transitions.iter().map(|t| t.to))
            .collect()
    }

    /// Recorded transitions, oldest first
    pub fn transitions(&self) -> &[PhaseTransition] {
        &self.transitions
    }
}
