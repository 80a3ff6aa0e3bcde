//! Compose Store
//!
//! Reads the image of the first service declared in the workload's compose
//! file and rewrites it in place. The rewrite is a surgical text edit of the
//! image value: comments, key order, quoting and every other service stay
//! byte-for-byte as they were. The new content goes to a temporary file in
//! the same directory which is then renamed over the original.

use serde_yaml::Value;
use std::fs;
use std::io::{self, Write};
use std::ops::Range;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::error::{AgentError, AgentResult};
use crate::workload::reference::WorkloadReference;

/// File names probed, in order, when no explicit compose file is configured
pub const COMPOSE_FILE_NAMES: [&str; 4] = [
    "docker-compose.yml",
    "docker-compose.yaml",
    "compose.yml",
    "compose.yaml",
];

/// Adapter over the compose file of one workload directory
#[derive(Debug, Clone, Default)]
pub struct ComposeStore {
    file_name: Option<String>,
}

impl ComposeStore {
    /// Probe the well-known compose file names
    pub fn new() -> Self {
        Self { file_name: None }
    }

    /// Always use `file_name` inside the workload directory
    pub fn with_file_name(file_name: impl Into<String>) -> Self {
        Self {
            file_name: Some(file_name.into()),
        }
    }

    /// Resolve the compose file inside `directory`
    pub fn locate(&self, directory: &Path) -> AgentResult<PathBuf> {
        if let Some(name) = &self.file_name {
            let path = directory.join(name);
            return if path.is_file() {
                Ok(path)
            } else {
                Err(AgentError::ConfigNotFound(path))
            };
        }

        COMPOSE_FILE_NAMES
            .iter()
            .map(|name| directory.join(name))
            .find(|path| path.is_file())
            .ok_or_else(|| AgentError::ConfigNotFound(directory.join(COMPOSE_FILE_NAMES[0])))
    }

    /// Read the workload reference from the first declared service
    pub fn load(&self, directory: &Path) -> AgentResult<WorkloadReference> {
        let path = self.locate(directory)?;
        debug!(path = %path.display(), "Reading compose file");

        let content = read(&path)?;
        let (_, image) = first_service_image(&path, &content)?;
        WorkloadReference::parse(&image)
    }

    /// Write `reference` back into the first service's `image` field
    pub fn rewrite(&self, directory: &Path, reference: &WorkloadReference) -> AgentResult<()> {
        let path = self.locate(directory)?;
        let content = read(&path)?;
        let (service, current) = first_service_image(&path, &content)?;

        let image = reference.image();
        let span = image_value_span(&content, &service).ok_or_else(|| {
            malformed(
                &path,
                format!("cannot locate the image field of service '{}'", service),
            )
        })?;

        let mut updated = String::with_capacity(content.len() + image.len());
        updated.push_str(&content[..span.start]);
        updated.push_str(&image);
        updated.push_str(&content[span.end..]);

        // The edit must land on the exact field the parser reads
        let (_, written) = first_service_image(&path, &updated)?;
        if written != image {
            return Err(malformed(
                &path,
                format!("image field of service '{}' is not a plain scalar", service),
            ));
        }

        write_atomically(&path, &updated)?;

        info!(
            path = %path.display(),
            service = %service,
            from = %current,
            to = %image,
            "Compose file rewritten"
        );

        Ok(())
    }
}

fn read(path: &Path) -> AgentResult<String> {
    fs::read_to_string(path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => AgentError::ConfigNotFound(path.to_path_buf()),
        _ => malformed(path, e.to_string()),
    })
}

fn malformed(path: &Path, reason: impl Into<String>) -> AgentError {
    AgentError::ConfigMalformed {
        path: path.to_path_buf(),
        reason: reason.into(),
    }
}

/// Name and image string of the first entry under `services`
fn first_service_image(path: &Path, content: &str) -> AgentResult<(String, String)> {
    let document: Value =
        serde_yaml::from_str(content).map_err(|e| malformed(path, e.to_string()))?;

    let services = document
        .get("services")
        .and_then(Value::as_mapping)
        .ok_or_else(|| malformed(path, "missing 'services' mapping"))?;

    let (name, service) = services
        .iter()
        .next()
        .ok_or_else(|| malformed(path, "no services declared"))?;

    let name = name
        .as_str()
        .ok_or_else(|| malformed(path, "service name is not a string"))?;

    let image = service
        .get("image")
        .and_then(Value::as_str)
        .ok_or_else(|| malformed(path, format!("service '{}' has no image", name)))?;

    Ok((name.to_string(), image.to_string()))
}

/// Byte range of the image value (without quotes) of `service`, which must be
/// the first key under the top-level `services` block.
fn image_value_span(content: &str, service: &str) -> Option<Range<usize>> {
    let mut offset = 0;
    let mut in_services = false;
    let mut service_indent: Option<usize> = None;
    let mut property_indent: Option<usize> = None;

    for line in content.split_inclusive('\n') {
        let line_start = offset;
        offset += line.len();

        let body = line.trim_end_matches(['\n', '\r']);
        let trimmed = body.trim_start();
        if trimmed.is_empty() || trimmed.starts_with('#') || trimmed == "---" {
            continue;
        }
        let indent = body.len() - trimmed.len();

        if indent == 0 {
            if service_indent.is_some() {
                return None;
            }
            in_services = key_of(trimmed) == Some("services");
            continue;
        }
        if !in_services {
            continue;
        }

        let Some(service_level) = service_indent else {
            if key_of(trimmed) != Some(service) {
                return None;
            }
            service_indent = Some(indent);
            continue;
        };

        if indent <= service_level {
            // reached the next service without finding an image
            return None;
        }
        let property_level = *property_indent.get_or_insert(indent);
        if indent != property_level {
            continue;
        }

        if let Some(rest) = trimmed.strip_prefix("image:") {
            let value_start = line_start + indent + "image:".len();
            return scalar_span(rest).map(|r| value_start + r.start..value_start + r.end);
        }
    }

    None
}

/// Key of a `key: value` line, with surrounding quotes removed
fn key_of(line: &str) -> Option<&str> {
    let (key, _) = line.split_once(':')?;
    Some(key.trim().trim_matches(|c| c == '"' || c == '\''))
}

/// Range of the scalar in `rest` (the text after `image:`), relative to `rest`
fn scalar_span(rest: &str) -> Option<Range<usize>> {
    let value = rest.trim_start();
    let lead = rest.len() - value.len();

    let span = match value.chars().next()? {
        quote @ ('"' | '\'') => {
            let close = value[1..].find(quote)?;
            1..1 + close
        }
        _ => {
            let end = value.find(" #").unwrap_or(value.len());
            0..value[..end].trim_end().len()
        }
    };

    if span.is_empty() {
        return None;
    }
    Some(lead + span.start..lead + span.end)
}

fn write_atomically(path: &Path, content: &str) -> AgentResult<()> {
    let failed = |source: io::Error| AgentError::ConfigWriteFailed {
        path: path.to_path_buf(),
        source,
    };

    let directory = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));

    let mut file = NamedTempFile::new_in(directory).map_err(failed)?;
    file.write_all(content.as_bytes()).map_err(failed)?;
    file.as_file().sync_all().map_err(failed)?;

    if let Ok(metadata) = fs::metadata(path) {
        file.as_file()
            .set_permissions(metadata.permissions())
            .map_err(failed)?;
    }

    file.persist(path).map_err(|e| failed(e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const COMPOSE: &str = r#"# production stack
version: "3.8"

services:
  app1:
    # pinned by the update agent
    image: "myrepo/app1:2.1.0"
    build:
      context: .
      image: ignored/nested:0.0.1
    ports:
      - "8080:8080"
    environment:
      - MODE=prod
  redis:
    image: redis:7-alpine

volumes:
  data: {}
"#;

    fn workload_dir(content: &str) -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("docker-compose.yml"), content).unwrap();
        dir
    }

    #[test]
    fn test_load_first_service() {
        let dir = workload_dir(COMPOSE);
        let reference = ComposeStore::new().load(dir.path()).unwrap();
        assert_eq!(reference.repository, "myrepo");
        assert_eq!(reference.application_name, "app1");
        assert_eq!(reference.version_tag, "2.1.0");
    }

    #[test]
    fn test_load_missing_file() {
        let dir = TempDir::new().unwrap();
        let err = ComposeStore::new().load(dir.path()).unwrap_err();
        assert!(matches!(err, AgentError::ConfigNotFound(_)));
    }

    #[test]
    fn test_load_invalid_yaml() {
        let dir = workload_dir("services: [unclosed");
        let err = ComposeStore::new().load(dir.path()).unwrap_err();
        assert!(matches!(err, AgentError::ConfigMalformed { .. }));
    }

    #[test]
    fn test_load_without_services() {
        for content in ["version: '3'\n", "services: {}\n", "services:\n  app: {}\n"] {
            let dir = workload_dir(content);
            let err = ComposeStore::new().load(dir.path()).unwrap_err();
            assert!(
                matches!(err, AgentError::ConfigMalformed { .. }),
                "{:?} should be malformed",
                content
            );
        }
    }

    #[test]
    fn test_load_bad_image() {
        let dir = workload_dir("services:\n  app:\n    image: nginx:latest\n");
        let err = ComposeStore::new().load(dir.path()).unwrap_err();
        assert!(matches!(err, AgentError::ImageFormatInvalid(_)));
    }

    #[test]
    fn test_locate_probes_known_names() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("compose.yaml"),
            "services:\n  web:\n    image: acme/web:1\n",
        )
        .unwrap();

        let store = ComposeStore::new();
        assert_eq!(store.locate(dir.path()).unwrap(), dir.path().join("compose.yaml"));
        assert_eq!(store.load(dir.path()).unwrap().application_name, "web");
    }

    #[test]
    fn test_explicit_file_name() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("stack.yml"),
            "services:\n  web:\n    image: acme/web:1\n",
        )
        .unwrap();

        assert!(ComposeStore::new().load(dir.path()).is_err());
        let store = ComposeStore::with_file_name("stack.yml");
        assert_eq!(store.load(dir.path()).unwrap().version_tag, "1");
    }

    #[test]
    fn test_rewrite_touches_only_the_image_value() {
        let dir = workload_dir(COMPOSE);
        let store = ComposeStore::new();
        let reference = store.load(dir.path()).unwrap().with_version("2.2.0").unwrap();

        store.rewrite(dir.path(), &reference).unwrap();

        let written = fs::read_to_string(dir.path().join("docker-compose.yml")).unwrap();
        assert_eq!(written, COMPOSE.replace("myrepo/app1:2.1.0", "myrepo/app1:2.2.0"));
        assert_eq!(store.load(dir.path()).unwrap().version_tag, "2.2.0");
    }

    #[test]
    fn test_rewrite_plain_and_single_quoted_values() {
        let plain = "services:\n  api:\n    restart: always\n    image: acme/api:1.0 # current\n";
        let dir = workload_dir(plain);
        let store = ComposeStore::new();
        let reference = WorkloadReference::parse("acme/api:1.1").unwrap();
        store.rewrite(dir.path(), &reference).unwrap();
        let written = fs::read_to_string(dir.path().join("docker-compose.yml")).unwrap();
        assert_eq!(written, plain.replace("acme/api:1.0", "acme/api:1.1"));

        let quoted = "services:\n    'api':\n        image: 'acme/api:1.0'\n";
        let dir = workload_dir(quoted);
        store.rewrite(dir.path(), &reference).unwrap();
        let written = fs::read_to_string(dir.path().join("docker-compose.yml")).unwrap();
        assert_eq!(written, quoted.replace("acme/api:1.0", "acme/api:1.1"));
    }

    #[test]
    fn test_rewrite_rejects_flow_style() {
        let content = "services: {api: {image: acme/api:1.0}}\n";
        let dir = workload_dir(content);
        let store = ComposeStore::new();
        let reference = WorkloadReference::parse("acme/api:1.1").unwrap();

        let err = store.rewrite(dir.path(), &reference).unwrap_err();
        assert!(matches!(err, AgentError::ConfigMalformed { .. }));
        let untouched = fs::read_to_string(dir.path().join("docker-compose.yml")).unwrap();
        assert_eq!(untouched, content);
    }

    #[test]
    fn test_rewrite_leaves_no_temporary_files() {
        let dir = workload_dir(COMPOSE);
        let store = ComposeStore::new();
        let reference = WorkloadReference::parse("myrepo/app1:3.0.0").unwrap();
        store.rewrite(dir.path(), &reference).unwrap();

        let entries: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn test_rewrite_keeps_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = workload_dir(COMPOSE);
        let path = dir.path().join("docker-compose.yml");
        fs::set_permissions(&path, fs::Permissions::from_mode(0o640)).unwrap();

        let reference = WorkloadReference::parse("myrepo/app1:3.0.0").unwrap();
        ComposeStore::new().rewrite(dir.path(), &reference).unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o640);
    }
}
