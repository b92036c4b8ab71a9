//! Wire format shared by the server session and the client receiver.
//!
//! Server frames are JSON objects with a `type` discriminator. Frames that do
//! not decode as such are read as legacy plain text, where `COMPILE_DONE`
//! ends the job.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Legacy completion sentinel.
pub const COMPILE_DONE: &str = "COMPILE_DONE";
/// Legacy frame sent when the credential is rejected.
pub const AUTH_FAILED: &str = "AUTH_FAILED";
/// Legacy frame sent when the requested preset does not exist.
pub const PRESET_NOT_FOUND: &str = "ERROR: preset not found";

pub const KIND_INFO: &str = "info";
pub const KIND_ERROR: &str = "error";
pub const KIND_STEP_DONE: &str = "step_done";
pub const KIND_DONE: &str = "done";
pub const KIND_ARTIFACT: &str = "bsp";

/// Kinds the client interprets itself. Output frames are tagged with the
/// program key, so no program may use one of these.
pub const RESERVED_KINDS: [&str; 5] = [
    KIND_INFO,
    KIND_ERROR,
    KIND_STEP_DONE,
    KIND_DONE,
    KIND_ARTIFACT,
];

pub fn is_reserved_kind(kind: &str) -> bool {
    RESERVED_KINDS.contains(&kind)
}

/// The single inbound message of a session.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompileRequest {
    /// Input path as visible to the worker. Ignored when `input_data` is set.
    #[serde(rename = "vmf", alias = "pipelineInput", default)]
    pub input_ref: String,

    #[serde(
        rename = "vmfName",
        alias = "inputName",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub input_name: Option<String>,

    #[serde(
        rename = "vmfData",
        alias = "inlineData",
        default,
        with = "base64_bytes",
        skip_serializing_if = "Option::is_none"
    )]
    pub input_data: Option<Vec<u8>>,

    #[serde(rename = "preset", alias = "pipelineName", default)]
    pub pipeline_name: String,

    #[serde(rename = "password", alias = "credential", default)]
    pub credential: String,
}

// Keeps credentials and upload bytes out of logs.
impl std::fmt::Debug for CompileRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompileRequest")
            .field("input_ref", &self.input_ref)
            .field("input_name", &self.input_name)
            .field(
                "input_data",
                &self.input_data.as_ref().map(|d| format!("<{} bytes>", d.len())),
            )
            .field("pipeline_name", &self.pipeline_name)
            .field("credential", &"<redacted>")
            .finish()
    }
}

impl CompileRequest {
    pub fn parse(text: &str) -> Result<Self> {
        serde_json::from_str(text)
            .map_err(|e| Error::validation_invalid_json(e, Some("parse compile request".to_string())))
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| {
            Error::internal_json(e.to_string(), Some("serialize compile request".to_string()))
        })
    }

    /// Inline upload, if one was sent and it is non-empty.
    pub fn upload(&self) -> Option<&[u8]> {
        self.input_data.as_deref().filter(|d| !d.is_empty())
    }
}

mod base64_bytes {
    use super::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(bytes) => serializer.serialize_str(&STANDARD.encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error> {
        let encoded = Option::<String>::deserialize(deserializer)?;
        encoded
            .map(|s| STANDARD.decode(s.as_bytes()).map_err(serde::de::Error::custom))
            .transpose()
    }
}

/// Outbound message from a session, in the order the peer observes them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerMessage {
    Info(String),
    Error(String),
    /// One captured output line, tagged with the step's program key.
    Output { program: String, line: String },
    StepDone { program: String },
    Artifact { name: String, data: Vec<u8> },
    Done,
    /// Plain-text frame for peers that predate typed messages.
    Legacy(String),
}

#[derive(Serialize)]
struct TypedFrame<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    message: &'a str,
}

#[derive(Serialize)]
struct ArtifactFrame<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    name: &'a str,
    data: String,
}

impl ServerMessage {
    pub fn info(message: impl Into<String>) -> Self {
        ServerMessage::Info(message.into())
    }

    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error(message.into())
    }

    /// Encode as the text frame sent over the socket.
    pub fn to_wire(&self) -> String {
        let typed = |kind: &str, message: &str| {
            serde_json::to_string(&TypedFrame { kind, message }).unwrap_or_default()
        };

        match self {
            ServerMessage::Info(m) => typed(KIND_INFO, m),
            ServerMessage::Error(m) => typed(KIND_ERROR, m),
            ServerMessage::Output { program, line } => typed(program, line),
            ServerMessage::StepDone { program } => typed(KIND_STEP_DONE, program),
            ServerMessage::Done => typed(KIND_DONE, ""),
            ServerMessage::Artifact { name, data } => serde_json::to_string(&ArtifactFrame {
                kind: KIND_ARTIFACT,
                name,
                data: STANDARD.encode(data),
            })
            .unwrap_or_default(),
            ServerMessage::Legacy(text) => text.clone(),
        }
    }
}

/// A server frame as seen by the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// Compiled artifact; `data` is still base64.
    Artifact { name: String, data: String },
    Typed { kind: String, message: String },
    Legacy(String),
}

#[derive(Deserialize)]
struct InboundFrame {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    data: Option<String>,
}

impl Inbound {
    /// Strict typed decode first, plain text otherwise.
    pub fn classify(text: &str) -> Self {
        match serde_json::from_str::<InboundFrame>(text) {
            Ok(frame) if !frame.kind.is_empty() => {
                if frame.kind == KIND_ARTIFACT {
                    Inbound::Artifact {
                        name: frame.name.unwrap_or_default(),
                        data: frame.data.unwrap_or_default(),
                    }
                } else {
                    Inbound::Typed {
                        kind: frame.kind,
                        message: frame.message.unwrap_or_default(),
                    }
                }
            }
            _ => Inbound::Legacy(text.to_string()),
        }
    }

    pub fn is_terminal(&self) -> bool {
        match self {
            Inbound::Typed { kind, .. } => kind == KIND_DONE,
            Inbound::Legacy(text) => text == COMPILE_DONE,
            Inbound::Artifact { .. } => false,
        }
    }
}

pub fn decode_payload(data: &str) -> Result<Vec<u8>> {
    STANDARD
        .decode(data.as_bytes())
        .map_err(|e| Error::validation_invalid_argument("data", format!("invalid base64 payload: {}", e), None))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_uses_wire_field_names() {
        let req = CompileRequest {
            input_ref: "maps/test.vmf".to_string(),
            input_name: Some("test.vmf".to_string()),
            input_data: Some(b"versioninfo".to_vec()),
            pipeline_name: "compile".to_string(),
            credential: "pw".to_string(),
        };

        let json: serde_json::Value = serde_json::from_str(&req.to_json().unwrap()).unwrap();

        assert_eq!(json["vmf"], "maps/test.vmf");
        assert_eq!(json["vmfName"], "test.vmf");
        assert_eq!(json["vmfData"], STANDARD.encode(b"versioninfo"));
        assert_eq!(json["preset"], "compile");
        assert_eq!(json["password"], "pw");
        assert_eq!(CompileRequest::parse(&req.to_json().unwrap()).unwrap(), req);
    }

    #[test]
    fn request_accepts_descriptive_aliases_and_defaults() {
        let req = CompileRequest::parse(
            r#"{"pipelineInput":"/maps/a.vmf","pipelineName":"fast","credential":"x"}"#,
        )
        .unwrap();

        assert_eq!(req.input_ref, "/maps/a.vmf");
        assert_eq!(req.pipeline_name, "fast");
        assert_eq!(req.credential, "x");
        assert!(req.upload().is_none());

        let empty = CompileRequest::parse("{}").unwrap();
        assert_eq!(empty, CompileRequest::default());
    }

    #[test]
    fn debug_redacts_secrets() {
        let req = CompileRequest {
            credential: "hunter2".to_string(),
            input_data: Some(vec![1, 2, 3]),
            ..Default::default()
        };
        let text = format!("{:?}", req);
        assert!(!text.contains("hunter2"));
        assert!(text.contains("<3 bytes>"));
    }

    #[test]
    fn server_frames_match_wire_shape() {
        assert_eq!(
            ServerMessage::info("Starting compile...").to_wire(),
            r#"{"type":"info","message":"Starting compile..."}"#
        );
        assert_eq!(
            ServerMessage::Output {
                program: "vbsp".to_string(),
                line: "Loading map".to_string()
            }
            .to_wire(),
            r#"{"type":"vbsp","message":"Loading map"}"#
        );
        assert_eq!(
            ServerMessage::StepDone {
                program: "vrad".to_string()
            }
            .to_wire(),
            r#"{"type":"step_done","message":"vrad"}"#
        );
        assert_eq!(ServerMessage::Done.to_wire(), r#"{"type":"done","message":""}"#);
        assert_eq!(
            ServerMessage::Artifact {
                name: "test.bsp".to_string(),
                data: b"VBSP".to_vec()
            }
            .to_wire(),
            r#"{"type":"bsp","name":"test.bsp","data":"VkJTUA=="}"#
        );
        assert_eq!(ServerMessage::Legacy(AUTH_FAILED.to_string()).to_wire(), "AUTH_FAILED");
    }

    #[test]
    fn classify_dispatches_on_shape() {
        assert_eq!(
            Inbound::classify(r#"{"type":"bsp","name":"a.bsp","data":"AA=="}"#),
            Inbound::Artifact {
                name: "a.bsp".to_string(),
                data: "AA==".to_string()
            }
        );
        assert_eq!(
            Inbound::classify(r#"{"type":"vbsp","message":"line"}"#),
            Inbound::Typed {
                kind: "vbsp".to_string(),
                message: "line".to_string()
            }
        );
        assert_eq!(
            Inbound::classify("ERROR: preset not found"),
            Inbound::Legacy("ERROR: preset not found".to_string())
        );
        assert_eq!(
            Inbound::classify(r#"{"message":"no type"}"#),
            Inbound::Legacy(r#"{"message":"no type"}"#.to_string())
        );
    }

    #[test]
    fn terminal_frames() {
        assert!(Inbound::classify(r#"{"type":"done","message":""}"#).is_terminal());
        assert!(Inbound::classify(r#"{"type":"done"}"#).is_terminal());
        assert!(Inbound::classify(COMPILE_DONE).is_terminal());
        assert!(!Inbound::classify(AUTH_FAILED).is_terminal());
        assert!(!Inbound::classify(r#"{"type":"step_done","message":"vbsp"}"#).is_terminal());
    }

    #[test]
    fn artifact_payload_survives_the_wire() {
        let original: Vec<u8> = (0..=255u8).cycle().take(4096).collect();
        let wire = ServerMessage::Artifact {
            name: "test.bsp".to_string(),
            data: original.clone(),
        }
        .to_wire();

        let Inbound::Artifact { name, data } = Inbound::classify(&wire) else {
            panic!("expected artifact frame");
        };

        assert_eq!(name, "test.bsp");
        assert_eq!(decode_payload(&data).unwrap(), original);
    }
}
