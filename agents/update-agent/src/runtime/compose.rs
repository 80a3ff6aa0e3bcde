//! Compose Runtime
//!
//! Implementation of WorkloadRuntime that shells out to the compose CLI
//! (`docker-compose` or `docker compose`) against the workload's compose file.

use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::runtime::adapter::{Outcome, WorkloadRuntime};
use crate::workload::store::ComposeStore;

/// Compose CLI runtime
pub struct ComposeRuntime {
    /// Program and leading arguments, e.g. `["docker", "compose"]`
    command: Vec<String>,
    store: ComposeStore,
}

impl ComposeRuntime {
    /// Create a runtime invoking `command` with the compose file `store` resolves
    pub fn new(command: Vec<String>, store: ComposeStore) -> Self {
        Self { command, store }
    }

    /// Run `<command> -f <compose file> <args...>` inside `directory`
    async fn run(&self, directory: &Path, args: &[&str]) -> Outcome {
        let Some((program, leading)) = self.command.split_first() else {
            return Outcome::failure("No compose command configured");
        };

        // The child runs inside `directory`, so a relative path would resolve twice
        let compose_file = match self.store.locate(directory) {
            Ok(path) => match path.canonicalize() {
                Ok(path) => path,
                Err(e) => {
                    return Outcome::failure(format!(
                        "Failed to resolve {}: {}",
                        path.display(),
                        e
                    ))
                }
            },
            Err(e) => return Outcome::failure(e.to_string()),
        };

        info!(
            program = %program,
            file = %compose_file.display(),
            args = ?args,
            "Running compose command"
        );

        let output = Command::new(program)
            .args(leading)
            .arg("-f")
            .arg(&compose_file)
            .args(args)
            .current_dir(directory)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await;

        let output = match output {
            Ok(output) => output,
            Err(e) => {
                warn!(program = %program, error = %e, "Failed to spawn compose command");
                return Outcome::failure(format!("Failed to run {}: {}", program, e));
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();

        if output.status.success() {
            debug!(stdout = %stdout, stderr = %stderr, "Compose command succeeded");
            // compose reports progress on stderr
            let diagnostic = if stderr.is_empty() { stdout } else { stderr };
            Outcome::success(diagnostic)
        } else if stderr.is_empty() {
            Outcome::failure(format!("{} exited with {}", program, output.status))
        } else {
            Outcome::failure(stderr)
        }
    }
}

#[async_trait]
impl WorkloadRuntime for ComposeRuntime {
    fn runtime_type(&self) -> &str {
        "compose"
    }

    async fn stop(&self, directory: &Path) -> Outcome {
        self.run(directory, &["down"]).await
    }

    async fn start(&self, directory: &Path) -> Outcome {
        self.run(directory, &["up", "-d"]).await
    }
}

/// Default compose project name for a workload directory: the directory's
/// base name, lowercased, keeping only characters compose accepts.
pub fn project_name(directory: &Path) -> String {
    let resolved = directory
        .canonicalize()
        .unwrap_or_else(|_| directory.to_path_buf());

    resolved
        .file_name()
        .map(|name| name.to_string_lossy().to_lowercase())
        .unwrap_or_default()
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '-' || *c == '_')
        .collect()
}
