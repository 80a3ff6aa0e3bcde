//! Message Protocol
//!
//! Defines the messages exchanged with the controller over the bus: the
//! version announcement, the update command request and its response, and
//! the envelope RPC calls travel in.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{AgentError, AgentResult};
use crate::workload::reference::WorkloadReference;

/// Published on the version channel to report the running workload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionAnnouncement {
    pub appname: String,
    pub version_number: String,
    /// Reserved; always empty for now
    pub dependencies: BTreeMap<String, String>,
}

impl VersionAnnouncement {
    pub fn from_reference(reference: &WorkloadReference) -> Self {
        Self {
            appname: reference.application_name.clone(),
            version_number: reference.version_tag.clone(),
            dependencies: BTreeMap::new(),
        }
    }

    /// Serialize the message to JSON
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// RPC request as it arrives on the wire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandRequest {
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_version: Option<String>,
}

/// Validated command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateCommand {
    /// Bring the workload down
    Stop { directory: PathBuf },
    /// Rewrite the image tag and restart the workload
    UpdateVersion {
        directory: PathBuf,
        new_version: String,
    },
}

impl UpdateCommand {
    pub fn name(&self) -> &'static str {
        match self {
            UpdateCommand::Stop { .. } => "down",
            UpdateCommand::UpdateVersion { .. } => "update_version",
        }
    }

    pub fn directory(&self) -> &Path {
        match self {
            UpdateCommand::Stop { directory } | UpdateCommand::UpdateVersion { directory, .. } => {
                directory
            }
        }
    }
}

impl CommandRequest {
    /// Validate the request. A missing `directory` targets `default_directory`.
    pub fn into_command(self, default_directory: &Path) -> AgentResult<UpdateCommand> {
        let directory = self
            .directory
            .filter(|d| !d.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| default_directory.to_path_buf());

        match self.command.as_str() {
            "down" => Ok(UpdateCommand::Stop { directory }),
            "update_version" => {
                let new_version = self
                    .new_version
                    .map(|v| v.trim().to_string())
                    .filter(|v| !v.is_empty())
                    .ok_or_else(|| {
                        AgentError::ValidationFailed(
                            "new_version is required for update_version".to_string(),
                        )
                    })?;
                Ok(UpdateCommand::UpdateVersion {
                    directory,
                    new_version,
                })
            }
            other => Err(AgentError::UnknownCommand(other.to_string())),
        }
    }
}

/// RPC response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateResult {
    pub success: bool,
    pub message: String,
}

impl UpdateResult {
    pub fn succeeded(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

impl From<&AgentError> for UpdateResult {
    fn from(error: &AgentError) -> Self {
        Self::failed(error.to_string())
    }
}

/// Envelope header
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvelopeHeader {
    /// List the caller waits on for the response
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    /// Unix seconds
    #[serde(default)]
    pub timestamp: i64,
}

impl EnvelopeHeader {
    pub fn now() -> Self {
        Self {
            reply_to: None,
            timestamp: Utc::now().timestamp(),
        }
    }
}

/// `{"header": {...}, "data": ...}` wrapper around RPC payloads
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<T> {
    #[serde(default)]
    pub header: EnvelopeHeader,
    pub data: T,
}

/// Encode a response for the caller's reply list
pub fn encode_reply(result: &UpdateResult) -> serde_json::Result<String> {
    serde_json::to_string(&Envelope {
        header: EnvelopeHeader::now(),
        data: result,
    })
}

/// One RPC call taken off the bus
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcCall {
    /// Where to send the response; `None` means fire-and-forget
    pub reply_to: Option<String>,
    /// The decoded request, or why it could not be decoded
    pub request: Result<CommandRequest, String>,
}

impl RpcCall {
    /// Decode a raw bus payload. Both enveloped and bare requests are accepted.
    pub fn decode(raw: &str) -> Self {
        let value: Value = match serde_json::from_str(raw) {
            Ok(value) => value,
            Err(e) => {
                return Self {
                    reply_to: None,
                    request: Err(e.to_string()),
                }
            }
        };

        let (reply_to, data) = match value {
            Value::Object(mut map) if map.contains_key("data") => {
                let header = map
                    .remove("header")
                    .and_then(|h| serde_json::from_value::<EnvelopeHeader>(h).ok())
                    .unwrap_or_default();
                (header.reply_to, map.remove("data").unwrap_or(Value::Null))
            }
            other => (None, other),
        };

        Self {
            reply_to,
            request: serde_json::from_value(data).map_err(|e| e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_announcement_wire_format() {
        let reference = WorkloadReference::parse("myrepo/app1:2.1.0").unwrap();
        let json = VersionAnnouncement::from_reference(&reference).to_json().unwrap();
        assert_eq!(
            json,
            r#"{"appname":"app1","version_number":"2.1.0","dependencies":{}}"#
        );
    }

    #[test]
    fn test_update_request_into_command() {
        let request: CommandRequest = serde_json::from_str(
            r#"{"command":"update_version","directory":"/srv/app","new_version":"2.2.0"}"#,
        )
        .unwrap();

        let command = request.into_command(Path::new(".")).unwrap();
        assert_eq!(
            command,
            UpdateCommand::UpdateVersion {
                directory: PathBuf::from("/srv/app"),
                new_version: "2.2.0".to_string(),
            }
        );
        assert_eq!(command.name(), "update_version");
    }

    #[test]
    fn test_stop_ignores_new_version_and_defaults_directory() {
        let request: CommandRequest =
            serde_json::from_str(r#"{"command":"down","new_version":"9.9"}"#).unwrap();

        let command = request.into_command(Path::new("/srv/default")).unwrap();
        assert_eq!(
            command,
            UpdateCommand::Stop {
                directory: PathBuf::from("/srv/default"),
            }
        );
    }

    #[test]
    fn test_update_without_version_is_rejected() {
        for body in [
            r#"{"command":"update_version","directory":"."}"#,
            r#"{"command":"update_version","directory":".","new_version":null}"#,
            r#"{"command":"update_version","directory":".","new_version":"  "}"#,
        ] {
            let request: CommandRequest = serde_json::from_str(body).unwrap();
            assert!(matches!(
                request.into_command(Path::new(".")),
                Err(AgentError::ValidationFailed(_))
            ));
        }
    }

    #[test]
    fn test_unknown_command() {
        let request: CommandRequest = serde_json::from_str(r#"{"command":"frobnicate"}"#).unwrap();
        let err = request.into_command(Path::new(".")).unwrap_err();
        assert!(matches!(err, AgentError::UnknownCommand(ref c) if c == "frobnicate"));
        assert_eq!(UpdateResult::from(&err), UpdateResult::failed("Unknown command"));
    }

    #[test]
    fn test_decode_enveloped_call() {
        let call = RpcCall::decode(
            r#"{"header":{"reply_to":"rpc-reply-42","timestamp":1700000000},
                "data":{"command":"down","directory":"."}}"#,
        );
        assert_eq!(call.reply_to.as_deref(), Some("rpc-reply-42"));
        assert_eq!(call.request.unwrap().command, "down");
    }

    #[test]
    fn test_decode_bare_and_broken_calls() {
        let call = RpcCall::decode(r#"{"command":"down"}"#);
        assert_eq!(call.reply_to, None);
        assert!(call.request.is_ok());

        let call = RpcCall::decode("not json");
        assert!(call.request.is_err());

        let call = RpcCall::decode(r#"{"header":{"reply_to":"r1"},"data":{"directory":"."}}"#);
        assert_eq!(call.reply_to.as_deref(), Some("r1"));
        assert!(call.request.is_err());
    }

    #[test]
    fn test_reply_envelope() {
        let json = encode_reply(&UpdateResult::succeeded("ok")).unwrap();
        let envelope: Envelope<UpdateResult> = serde_json::from_str(&json).unwrap();
        assert_eq!(envelope.data, UpdateResult::succeeded("ok"));
        assert!(envelope.header.timestamp > 0);
        assert!(!json.contains("reply_to"));
    }
}
