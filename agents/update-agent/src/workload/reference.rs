//! Workload Reference
//!
//! Splits a container image string `repository/name:tag` into its parts and
//! joins it back. `parse` and `image` round-trip exactly.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{AgentError, AgentResult};

/// Identifies the managed workload by its image
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkloadReference {
    /// Registry/namespace prefix, everything before the last `/`
    pub repository: String,
    /// Logical application name, also the agent's public identity
    pub application_name: String,
    /// Opaque version tag
    pub version_tag: String,
}

impl WorkloadReference {
    /// Parse an image string of the form `repository/name:tag`.
    ///
    /// The repository may itself contain `/` and a registry port
    /// (`registry:5000/team/app:1.0`); the tag is whatever follows the last
    /// `:` that comes after the last `/`.
    pub fn parse(image: &str) -> AgentResult<Self> {
        let invalid = || AgentError::ImageFormatInvalid(image.to_string());

        if image.chars().any(is_forbidden_char) {
            return Err(invalid());
        }

        let (path, tag) = image.rsplit_once(':').ok_or_else(invalid)?;
        if tag.contains('/') {
            // the only colon belongs to a registry port
            return Err(invalid());
        }
        let (repository, application_name) = path.rsplit_once('/').ok_or_else(invalid)?;

        if repository.is_empty() || application_name.is_empty() || tag.is_empty() {
            return Err(invalid());
        }

        Ok(Self {
            repository: repository.to_string(),
            application_name: application_name.to_string(),
            version_tag: tag.to_string(),
        })
    }

    /// Rebuild the image string
    pub fn image(&self) -> String {
        format!(
            "{}/{}:{}",
            self.repository, self.application_name, self.version_tag
        )
    }

    /// Same workload with a different version tag.
    ///
    /// Rejects tags that would not survive a round-trip through `parse`.
    pub fn with_version(&self, version_tag: &str) -> AgentResult<Self> {
        if !is_valid_tag(version_tag) {
            return Err(AgentError::ValidationFailed(format!(
                "Invalid version tag '{}'",
                version_tag
            )));
        }

        Ok(Self {
            version_tag: version_tag.to_string(),
            ..self.clone()
        })
    }
}

impl fmt::Display for WorkloadReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.image())
    }
}

impl FromStr for WorkloadReference {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Characters that never appear in an image string we manage. Digests (`@`)
/// are out, as is anything that would need quoting in YAML.
fn is_forbidden_char(c: char) -> bool {
    c.is_whitespace() || c.is_control() || matches!(c, '@' | '#' | '"' | '\'')
}

/// Whether `tag` can stand as the version part of an image string
pub fn is_valid_tag(tag: &str) -> bool {
    !tag.is_empty() && !tag.chars().any(|c| is_forbidden_char(c) || c == '/' || c == ':')
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn arb_image() -> impl Strategy<Value = String> {
        (
            "[a-z0-9]{1,8}(\\.[a-z]{2,4})?(:[0-9]{2,5})?(/[a-z0-9_-]{1,8}){0,2}",
            "[a-z0-9][a-z0-9_.-]{0,15}",
            "[A-Za-z0-9_][A-Za-z0-9_.-]{0,20}",
        )
            .prop_map(|(repository, name, tag)| format!("{}/{}:{}", repository, name, tag))
    }

    proptest! {
        /// serialize(parse(s)) == s for every well-formed image
        #[test]
        fn prop_image_roundtrip(image in arb_image()) {
            let reference = WorkloadReference::parse(&image).expect("well-formed image");
            prop_assert_eq!(reference.image(), image);
        }

        /// a valid new tag is exactly what ends up after the last colon
        #[test]
        fn prop_with_version_roundtrip(image in arb_image(), tag in "[A-Za-z0-9_][A-Za-z0-9_.-]{0,20}") {
            let reference = WorkloadReference::parse(&image).expect("well-formed image");
            let updated = reference.with_version(&tag).expect("valid tag");
            let reparsed = WorkloadReference::parse(&updated.image()).expect("reparse");
            prop_assert_eq!(reparsed, updated);
        }
    }
}
