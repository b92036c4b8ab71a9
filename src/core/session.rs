//! One connection, one build request.
//!
//! `AwaitingRequest -> Authenticating -> ResolvingPipeline -> [MaterializingUpload]
//! -> Running -> SendingArtifact -> Done`, leaving early on auth failure, unknown
//! preset, upload error, step failure or artifact read error.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tempfile::TempDir;

use crate::config::ServerConfig;
use crate::defaults::{DEFAULT_UPLOAD_NAME, UPLOAD_DIR_PREFIX};
use crate::error::{Error, Result};
use crate::outbound::{MessageSink, Outbound};
use crate::pipeline::{PipelineRunner, PipelineStepResult, RunContext};
use crate::platform::Host;
use crate::presets::PresetStore;
use crate::protocol::{CompileRequest, ServerMessage, AUTH_FAILED, PRESET_NOT_FOUND};
use crate::variables::VariableMap;

/// Process-wide state handed to every session.
#[derive(Debug)]
pub struct SessionContext {
    pub config: ServerConfig,
    pub presets: PresetStore,
    pub host: Host,
}

impl SessionContext {
    pub fn new(config: ServerConfig, presets: PresetStore) -> Self {
        Self {
            config,
            presets,
            host: Host::current(),
        }
    }
}

/// How a session ended, as far as the server is concerned.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum SessionOutcome {
    Done {
        #[serde(skip_serializing_if = "Option::is_none")]
        artifact: Option<String>,
        steps: Vec<PipelineStepResult>,
    },
    InvalidRequest,
    AuthFailed,
    PipelineNotFound,
    UploadError,
    StepFailed {
        steps: Vec<PipelineStepResult>,
    },
    ArtifactError,
}

/// Temporary upload location, removed when the session ends.
struct Upload {
    _dir: TempDir,
    path: PathBuf,
}

/// Run one session from its raw request frame.
///
/// Every failure the peer should hear about is sent before returning
/// `Ok(outcome)`. `Err` is reserved for a peer that went away mid-session.
pub async fn run<S: MessageSink>(
    ctx: &SessionContext,
    request_text: &str,
    outbound: &Outbound<S>,
) -> Result<SessionOutcome> {
    let request = match CompileRequest::parse(request_text) {
        Ok(request) => request,
        Err(err) => {
            tracing::warn!(error = %err.reason(), "invalid compile request");
            outbound
                .send(ServerMessage::error(format!("invalid request: {}", err.reason())))
                .await?;
            return Ok(SessionOutcome::InvalidRequest);
        }
    };

    tracing::info!(request = ?request, "received compile request");

    if let Err(err) = ctx.config.check_credential(&request.credential) {
        tracing::warn!(code = err.code.as_str(), "rejected compile request");
        outbound
            .send(ServerMessage::Legacy(AUTH_FAILED.to_string()))
            .await?;
        return Ok(SessionOutcome::AuthFailed);
    }

    // A clone: later preset updates do not touch this run.
    let preset = match ctx.presets.resolve(&request.pipeline_name) {
        Ok(preset) => preset,
        Err(err) => {
            tracing::warn!(
                preset = %request.pipeline_name,
                error = %err.reason(),
                "unknown preset"
            );
            outbound
                .send(ServerMessage::Legacy(PRESET_NOT_FOUND.to_string()))
                .await?;
            return Ok(SessionOutcome::PipelineNotFound);
        }
    };

    // Held until the function returns so the directory outlives the run.
    let upload = match request.upload() {
        None => None,
        Some(data) => {
            let name = request.input_name.as_deref();
            match materialize_upload(&ctx.config, name, data).await {
                Ok(upload) => {
                    outbound
                        .send(ServerMessage::info(format!(
                            "Received VMF upload: {}",
                            upload.path.display()
                        )))
                        .await?;
                    Some(upload)
                }
                Err(err) => {
                    tracing::error!(error = %err.reason(), "upload failed");
                    outbound.send(ServerMessage::error(err.reason())).await?;
                    return Ok(SessionOutcome::UploadError);
                }
            }
        }
    };

    let input = match &upload {
        Some(upload) => upload.path.clone(),
        None => PathBuf::from(&request.input_ref),
    };
    let vars = VariableMap::resolve(&input, &ctx.config);

    outbound.send(ServerMessage::info("Starting compile...")).await?;

    let result = PipelineRunner::new(
        RunContext {
            config: &ctx.config,
            vars: &vars,
            host: ctx.host,
        },
        outbound,
    )
    .run(&preset)
    .await?;

    if !result.completed() {
        return Ok(SessionOutcome::StepFailed {
            steps: result.steps,
        });
    }

    let mut artifact = None;
    if let Some(path) = vars.artifact_path() {
        match read_artifact(&path).await {
            Ok(message) => {
                if let ServerMessage::Artifact { name, data } = &message {
                    tracing::info!(name = %name, bytes = data.len(), "sending artifact");
                    artifact = Some(name.clone());
                }
                outbound.send(message).await?;
            }
            Err(err) => {
                tracing::error!(
                    path = %path.display(),
                    error = %err.reason(),
                    "artifact unavailable"
                );
                outbound.send(ServerMessage::error(err.reason())).await?;
                return Ok(SessionOutcome::ArtifactError);
            }
        }
    }

    outbound.send(ServerMessage::Done).await?;

    Ok(SessionOutcome::Done {
        artifact,
        steps: result.steps,
    })
}

/// Write inline input data into a fresh session-scoped directory.
async fn materialize_upload(
    config: &ServerConfig,
    declared_name: Option<&str>,
    data: &[u8],
) -> Result<Upload> {
    let name = upload_file_name(declared_name);

    let mut builder = tempfile::Builder::new();
    builder.prefix(UPLOAD_DIR_PREFIX);
    let dir = match crate::config::non_empty(&config.tmp_dir) {
        Some(root) => builder.tempdir_in(root),
        None => builder.tempdir(),
    }
    .map_err(|e| Error::internal_io(e.to_string(), Some("failed to create temp dir".to_string())))?;

    let path = dir.path().join(name);
    tokio::fs::write(&path, data).await.map_err(|e| {
        Error::internal_io(e.to_string(), Some("failed to write uploaded vmf".to_string()))
    })?;

    Ok(Upload { _dir: dir, path })
}

/// Base name only; anything unusable falls back to the default.
fn upload_file_name(declared: Option<&str>) -> String {
    declared
        .and_then(|n| Path::new(n).file_name())
        .map(|n| n.to_string_lossy().to_string())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| DEFAULT_UPLOAD_NAME.to_string())
}

async fn read_artifact(path: &Path) -> Result<ServerMessage> {
    let data = tokio::fs::read(path)
        .await
        .map_err(|e| Error::internal_io(e.to_string(), Some("failed to read bsp".to_string())))?;

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    Ok(ServerMessage::Artifact { name, data })
}
