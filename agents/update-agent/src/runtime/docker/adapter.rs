//! Docker Adapter
//!
//! Read-only access to the Docker daemon using the bollard library. The agent
//! never drives containers through this adapter; it only checks that the
//! daemon answers and lists the containers belonging to the compose project.

use anyhow::{Context, Result};
use bollard::container::ListContainersOptions;
use bollard::models::ContainerSummary;
use bollard::Docker;
use std::collections::HashMap;
use tracing::debug;

/// Label compose puts on every container it creates
const COMPOSE_PROJECT_LABEL: &str = "com.docker.compose.project";

/// Container information returned by the daemon
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerInfo {
    pub name: String,
    pub image: String,
    pub status: ContainerStatus,
}

/// Container status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerStatus {
    Created,
    Running,
    Paused,
    Restarting,
    Exited,
    Dead,
    Unknown,
}

impl std::fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContainerStatus::Created => write!(f, "created"),
            ContainerStatus::Running => write!(f, "running"),
            ContainerStatus::Paused => write!(f, "paused"),
            ContainerStatus::Restarting => write!(f, "restarting"),
            ContainerStatus::Exited => write!(f, "exited"),
            ContainerStatus::Dead => write!(f, "dead"),
            ContainerStatus::Unknown => write!(f, "unknown"),
        }
    }
}

/// Docker daemon adapter
pub struct DockerAdapter {
    client: Docker,
}

impl DockerAdapter {
    /// Create a new Docker adapter connecting to the default socket
    pub fn new() -> Result<Self> {
        let client = Docker::connect_with_socket_defaults()
            .context("Failed to connect to Docker socket")?;

        Ok(Self { client })
    }

    /// Create a new Docker adapter with a custom socket path
    pub fn with_socket(socket_path: &str) -> Result<Self> {
        let client = Docker::connect_with_socket(socket_path, 120, bollard::API_DEFAULT_VERSION)
            .context("Failed to connect to Docker socket")?;

        Ok(Self { client })
    }

    /// Connect to `socket_path` if given, otherwise to the default socket
    pub fn connect(socket_path: Option<&str>) -> Result<Self> {
        match socket_path {
            Some(path) => Self::with_socket(path),
            None => Self::new(),
        }
    }

    /// Get runtime version information
    pub async fn version(&self) -> Result<String> {
        let version = self
            .client
            .version()
            .await
            .context("Failed to query Docker version")?;

        Ok(format!(
            "Docker {} (API {})",
            version.version.unwrap_or_default(),
            version.api_version.unwrap_or_default()
        ))
    }

    /// List every container, running or not, of a compose project
    pub async fn project_containers(&self, project: &str) -> Result<Vec<ContainerInfo>> {
        let mut filters = HashMap::new();
        filters.insert(
            "label".to_string(),
            vec![format!("{}={}", COMPOSE_PROJECT_LABEL, project)],
        );

        let options = ListContainersOptions::<String> {
            all: true,
            filters,
            ..Default::default()
        };

        let containers = self
            .client
            .list_containers(Some(options))
            .await
            .context("Failed to list containers")?;
        debug!(project = %project, count = containers.len(), "Listed project containers");

        Ok(containers.into_iter().map(Self::container_info).collect())
    }

    fn container_info(container: ContainerSummary) -> ContainerInfo {
        ContainerInfo {
            name: container
                .names
                .and_then(|n| n.first().cloned())
                .unwrap_or_default()
                .trim_start_matches('/')
                .to_string(),
            image: container.image.unwrap_or_default(),
            status: Self::parse_status(container.state.as_deref()),
        }
    }

    /// Convert bollard container state to our ContainerStatus
    fn parse_status(state: Option<&str>) -> ContainerStatus {
        match state {
            Some("created") => ContainerStatus::Created,
            Some("running") => ContainerStatus::Running,
            Some("paused") => ContainerStatus::Paused,
            Some("restarting") => ContainerStatus::Restarting,
            Some("exited") => ContainerStatus::Exited,
            Some("dead") => ContainerStatus::Dead,
            _ => ContainerStatus::Unknown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_status() {
        assert_eq!(DockerAdapter::parse_status(Some("running")), ContainerStatus::Running);
        assert_eq!(DockerAdapter::parse_status(Some("exited")), ContainerStatus::Exited);
        assert_eq!(DockerAdapter::parse_status(Some("removing")), ContainerStatus::Unknown);
        assert_eq!(DockerAdapter::parse_status(None), ContainerStatus::Unknown);
    }

    #[test]
    fn test_container_info_from_summary() {
        let summary = ContainerSummary {
            id: Some("4f2a9c".to_string()),
            names: Some(vec!["/app1-app1-1".to_string()]),
            image: Some("myrepo/app1:2.1.0".to_string()),
            state: Some("running".to_string()),
            ..Default::default()
        };

        assert_eq!(
            DockerAdapter::container_info(summary),
            ContainerInfo {
                name: "app1-app1-1".to_string(),
                image: "myrepo/app1:2.1.0".to_string(),
                status: ContainerStatus::Running,
            }
        );
        assert_eq!(
            DockerAdapter::container_info(ContainerSummary::default()).status,
            ContainerStatus::Unknown
        );
    }

    #[test]
    fn test_status_display() {
        assert_eq!(ContainerStatus::Restarting.to_string(), "restarting");
    }
}
