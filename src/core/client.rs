//! Peer side: submit a compile request and collect what the server sends back.

use std::path::{Path, PathBuf};

use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::Message;

use crate::defaults::{ARTIFACT_EXTENSION, MAX_MESSAGE_SIZE, PASSWORD_HEADER};
use crate::error::{Error, Result};
use crate::log_status;
use crate::presets::Preset;
use crate::protocol::{self, CompileRequest, Inbound, AUTH_FAILED, KIND_DONE, KIND_ERROR};
use crate::utils::io;

#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// `host:port`, no scheme.
    pub server: String,
    /// Plain HTTP for the admin API instead of HTTPS.
    pub use_http: bool,
    pub input: PathBuf,
    pub preset: String,
    pub password: String,
}

impl ClientOptions {
    pub fn ws_url(&self) -> String {
        format!("ws://{}", self.server)
    }

    pub fn presets_url(&self) -> String {
        let scheme = if self.use_http { "http" } else { "https" };
        format!("{}://{}/api/presets", scheme, self.server)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Finished,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CompileSummary {
    pub input: String,
    pub preset: String,
    /// Whether the server signalled completion.
    pub finished: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact_bytes: Option<usize>,
    pub messages: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

/// Dispatches server frames for one compile request.
pub struct Receiver {
    input: PathBuf,
    summary: CompileSummary,
}

impl Receiver {
    pub fn new(input: impl Into<PathBuf>, preset: impl Into<String>) -> Self {
        let input = input.into();
        let summary = CompileSummary {
            input: input.display().to_string(),
            preset: preset.into(),
            ..Default::default()
        };
        Self { input, summary }
    }

    pub fn summary(&self) -> &CompileSummary {
        &self.summary
    }

    pub fn into_summary(self) -> CompileSummary {
        self.summary
    }

    /// Handle one text frame. Failures are recorded and never stop the loop;
    /// only a completion frame does.
    pub fn handle(&mut self, text: &str) -> Flow {
        self.summary.messages += 1;

        match Inbound::classify(text) {
            Inbound::Artifact { name, data } => {
                if let Err(err) = self.save_artifact(&name, &data) {
                    log_status!("client", "Failed to save BSP: {}", err.reason());
                    tracing::error!(error = %err.reason(), "failed to save artifact");
                    self.summary.errors.push(err.reason());
                }
                Flow::Continue
            }
            Inbound::Typed { kind, message } => {
                log_status!("client", "[{}] {}", kind, message);
                tracing::info!(kind = %kind, message = %message, "received");

                if kind == KIND_ERROR {
                    self.summary.errors.push(message);
                } else if kind == KIND_DONE {
                    return self.finish();
                }
                Flow::Continue
            }
            Inbound::Legacy(text) => {
                log_status!("client", "{}", text);
                tracing::info!(message = %text, "received message");

                if text == protocol::COMPILE_DONE {
                    return self.finish();
                }
                if text == AUTH_FAILED || text.starts_with("ERROR:") {
                    self.summary.errors.push(text);
                }
                Flow::Continue
            }
        }
    }

    fn finish(&mut self) -> Flow {
        log_status!("client", "Compilation done");
        tracing::info!("compilation done");
        self.summary.finished = true;
        Flow::Finished
    }

    fn save_artifact(&mut self, name: &str, data: &str) -> Result<()> {
        tracing::info!(name = %name, "downloading compiled bsp");

        let bytes = protocol::decode_payload(data)?;
        let path = artifact_output_path(&self.input, name);
        io::write_bytes(&path, &bytes, &format!("write {}", path.display()))?;

        log_status!("client", "Downloaded {} ({} bytes)", path.display(), bytes.len());
        tracing::info!(path = %path.display(), bytes = bytes.len(), "downloaded compiled bsp");

        self.summary.artifact = Some(path.display().to_string());
        self.summary.artifact_bytes = Some(bytes.len());
        Ok(())
    }
}

/// Where a received artifact lands: beside the input, under the declared base
/// name or `<input stem>.bsp`.
pub fn artifact_output_path(input: &Path, declared: &str) -> PathBuf {
    let dir = input.parent().unwrap_or_else(|| Path::new(""));

    let name = Path::new(declared)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| {
            let stem = input
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_default();
            format!("{}.{}", stem, ARTIFACT_EXTENSION)
        });

    dir.join(name)
}

/// Upload the input inline, then listen until the server is done or hangs up.
pub async fn compile(opts: &ClientOptions) -> Result<CompileSummary> {
    let data = io::read_bytes(&opts.input, &format!("read {}", opts.input.display()))?;

    let request = CompileRequest {
        input_ref: opts.input.display().to_string(),
        input_name: opts
            .input
            .file_name()
            .map(|n| n.to_string_lossy().to_string()),
        input_data: Some(data),
        pipeline_name: opts.preset.clone(),
        credential: opts.password.clone(),
    };
    let payload = request.to_json()?;

    let url = opts.ws_url();
    let (mut socket, _) =
        tokio_tungstenite::connect_async_with_config(url.as_str(), Some(websocket_config()), false)
            .await
            .map_err(|e| Error::connection_closed(format!("connect {}: {}", url, e)))?;

    log_status!("client", "Uploading {}", opts.input.display());
    tracing::info!(path = %opts.input.display(), url = %url, "uploading vmf");

    socket
        .send(Message::Text(payload))
        .await
        .map_err(|e| Error::connection_closed(format!("send request: {}", e)))?;

    tracing::info!(
        bytes = request.input_data.as_ref().map_or(0, Vec::len),
        "uploaded vmf"
    );

    let mut receiver = Receiver::new(&opts.input, &opts.preset);

    while let Some(frame) = socket.next().await {
        let text = match frame {
            Ok(Message::Text(text)) => text,
            Ok(Message::Binary(bytes)) => String::from_utf8_lossy(&bytes).into_owned(),
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                tracing::error!(error = %e, "failed to read message");
                return Err(Error::connection_closed(format!("read: {}", e)));
            }
        };

        if receiver.handle(&text) == Flow::Finished {
            break;
        }
    }

    let _ = socket.close(None).await;

    let summary = receiver.into_summary();
    tracing::info!(finished = summary.finished, "client finished");
    Ok(summary)
}

/// Frame limits matching the server's, so a whole artifact fits in one message.
pub fn websocket_config() -> WebSocketConfig {
    WebSocketConfig {
        max_message_size: Some(MAX_MESSAGE_SIZE),
        max_frame_size: Some(MAX_MESSAGE_SIZE),
        ..Default::default()
    }
}

/// Create or replace a preset through the admin API.
pub async fn upload_preset(opts: &ClientOptions, file: &Path) -> Result<Preset> {
    let body = io::read_bytes(file, &format!("read {}", file.display()))?;
    let url = opts.presets_url();

    let response = reqwest::Client::new()
        .post(&url)
        .header(reqwest::header::CONTENT_TYPE, "application/json")
        .header(PASSWORD_HEADER, &opts.password)
        .body(body)
        .send()
        .await
        .map_err(|e| Error::internal_io(e.to_string(), Some(format!("POST {}", url))))?;

    let status = response.status();
    let text = response
        .text()
        .await
        .map_err(|e| Error::internal_io(e.to_string(), Some("read upload response".to_string())))?;

    if !status.is_success() {
        tracing::error!(status = status.as_u16(), body = %text.trim(), "upload failed");
        return Err(rejected_upload(status.as_u16(), text.trim()));
    }

    let preset: Preset = serde_json::from_str(&text).map_err(|e| {
        Error::internal_json(e.to_string(), Some("parse upload response".to_string()))
    })?;

    log_status!("client", "Preset '{}' uploaded", preset.name);
    tracing::info!(preset = %preset.name, "preset uploaded successfully");
    Ok(preset)
}

fn rejected_upload(status: u16, body: &str) -> Error {
    match status {
        401 => Error::unauthorized().with_hint("Check --password against the server config"),
        400 => Error::validation_invalid_argument("preset", body.to_string(), None),
        _ => Error::internal_unexpected(format!("upload failed with status {}: {}", status, body)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;

    #[test]
    fn artifact_lands_beside_input() {
        assert_eq!(
            artifact_output_path(Path::new("/maps/test.vmf"), "test.bsp"),
            PathBuf::from("/maps/test.bsp")
        );
        assert_eq!(
            artifact_output_path(Path::new("/maps/test.vmf"), ""),
            PathBuf::from("/maps/test.bsp")
        );
        assert_eq!(
            artifact_output_path(Path::new("test.vmf"), ""),
            PathBuf::from("test.bsp")
        );
        assert_eq!(
            artifact_output_path(Path::new("/maps/test.vmf"), "../../evil.bsp"),
            PathBuf::from("/maps/evil.bsp")
        );
    }

    #[test]
    fn urls_follow_scheme_flag() {
        let mut opts = ClientOptions {
            server: "build:8000".to_string(),
            use_http: false,
            input: PathBuf::from("map.vmf"),
            preset: "default".to_string(),
            password: String::new(),
        };
        assert_eq!(opts.ws_url(), "ws://build:8000");
        assert_eq!(opts.presets_url(), "https://build:8000/api/presets");
        opts.use_http = true;
        assert_eq!(opts.presets_url(), "http://build:8000/api/presets");
    }

    #[test]
    fn writes_artifact_byte_identical() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("test.vmf");
        let original: Vec<u8> = (0..=255u8).rev().cycle().take(1000).collect();
        let frame = format!(
            r#"{{"type":"bsp","name":"test.bsp","data":"{}"}}"#,
            STANDARD.encode(&original)
        );

        let mut receiver = Receiver::new(&input, "compile");
        assert_eq!(receiver.handle(&frame), Flow::Continue);

        let written = std::fs::read(dir.path().join("test.bsp")).unwrap();
        assert_eq!(written, original);
        assert_eq!(receiver.summary().artifact_bytes, Some(1000));
    }

    #[test]
    fn bad_payload_is_recorded_and_loop_continues() {
        let dir = tempfile::tempdir().unwrap();
        let mut receiver = Receiver::new(dir.path().join("a.vmf"), "p");

        let flow = receiver.handle(r#"{"type":"bsp","name":"a.bsp","data":"***"}"#);

        assert_eq!(flow, Flow::Continue);
        assert_eq!(receiver.summary().errors.len(), 1);
        assert!(!dir.path().join("a.bsp").exists());
    }

    #[test]
    fn done_and_legacy_sentinel_finish() {
        let mut typed = Receiver::new("a.vmf", "p");
        assert_eq!(typed.handle(r#"{"type":"vbsp","message":"x"}"#), Flow::Continue);
        assert_eq!(typed.handle(r#"{"type":"done","message":""}"#), Flow::Finished);
        assert!(typed.summary().finished);

        let mut legacy = Receiver::new("a.vmf", "p");
        assert_eq!(legacy.handle("compiling..."), Flow::Continue);
        assert_eq!(legacy.handle("COMPILE_DONE"), Flow::Finished);
        assert_eq!(legacy.into_summary().messages, 2);
    }

    #[test]
    fn server_errors_are_collected() {
        let mut receiver = Receiver::new("a.vmf", "p");
        receiver.handle("AUTH_FAILED");
        receiver.handle("ERROR: preset not found");
        receiver.handle(r#"{"type":"error","message":"failed to start: gone"}"#);

        let summary = receiver.into_summary();
        assert!(!summary.finished);
        assert_eq!(
            summary.errors,
            vec!["AUTH_FAILED", "ERROR: preset not found", "failed to start: gone"]
        );
    }

    #[test]
    fn upload_rejections_map_to_error_codes() {
        assert_eq!(rejected_upload(401, "unauthorized").code.as_str(), "auth.unauthorized");
        let bad = rejected_upload(400, "unknown program: vbsp");
        assert_eq!(bad.reason(), "unknown program: vbsp");
        assert_eq!(
            rejected_upload(500, "boom").code.as_str(),
            "internal.unexpected"
        );
    }
}
