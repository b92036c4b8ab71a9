use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ConfigInvalidJson,
    ConfigProgramNotConfigured,

    ValidationInvalidArgument,
    ValidationInvalidJson,

    AuthUnauthorized,

    PipelineNotFound,

    ProcessSpawnFailed,
    ProcessExitFailed,

    ProtocolConnectionClosed,

    InternalIoError,
    InternalJsonError,
    InternalUnexpected,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ConfigInvalidJson => "config.invalid_json",
            ErrorCode::ConfigProgramNotConfigured => "config.program_not_configured",

            ErrorCode::ValidationInvalidArgument => "validation.invalid_argument",
            ErrorCode::ValidationInvalidJson => "validation.invalid_json",

            ErrorCode::AuthUnauthorized => "auth.unauthorized",

            ErrorCode::PipelineNotFound => "pipeline.not_found",

            ErrorCode::ProcessSpawnFailed => "process.spawn_failed",
            ErrorCode::ProcessExitFailed => "process.exit_failed",

            ErrorCode::ProtocolConnectionClosed => "protocol.connection_closed",

            ErrorCode::InternalIoError => "internal.io_error",
            ErrorCode::InternalJsonError => "internal.json_error",
            ErrorCode::InternalUnexpected => "internal.unexpected",
        }
    }

    /// True for failures raised by an external tool rather than by the relay itself.
    pub fn is_process_error(&self) -> bool {
        matches!(
            self,
            ErrorCode::ProcessSpawnFailed | ErrorCode::ProcessExitFailed
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hint {
    pub message: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigInvalidJsonDetails {
    pub path: String,
    pub error: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvalidArgumentDetails {
    pub field: String,
    pub problem: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotFoundDetails {
    pub id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessFailedDetails {
    pub program: String,
    pub command: String,
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InternalIoErrorDetails {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InternalJsonErrorDetails {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Error {
    pub code: ErrorCode,
    pub message: String,
    pub details: Value,
    pub hints: Vec<Hint>,
}

pub type Result<T> = std::result::Result<T, Error>;

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for Error {}

fn to_details<T: Serialize>(details: T) -> Value {
    serde_json::to_value(details).unwrap_or_else(|_| Value::Object(serde_json::Map::new()))
}

impl Error {
    pub fn new(code: ErrorCode, message: impl Into<String>, details: Value) -> Self {
        Self {
            code,
            message: message.into(),
            details,
            hints: Vec::new(),
        }
    }

    /// Text handed to a remote peer: the message plus the underlying cause, if any.
    pub fn reason(&self) -> String {
        match self.details.get("error").and_then(Value::as_str) {
            Some(cause) if !cause.is_empty() && cause != self.message => {
                format!("{}: {}", self.message, cause)
            }
            _ => self.message.clone(),
        }
    }

    pub fn validation_invalid_argument(
        field: impl Into<String>,
        problem: impl Into<String>,
        id: Option<String>,
    ) -> Self {
        let problem = problem.into();
        let details = to_details(InvalidArgumentDetails {
            field: field.into(),
            problem: problem.clone(),
            id,
        });

        Self::new(ErrorCode::ValidationInvalidArgument, problem, details)
    }

    pub fn validation_invalid_json(err: serde_json::Error, context: Option<String>) -> Self {
        let details = serde_json::json!({
            "error": err.to_string(),
            "context": context,
        });

        Self::new(ErrorCode::ValidationInvalidJson, "Invalid JSON", details)
    }

    pub fn unauthorized() -> Self {
        Self::new(
            ErrorCode::AuthUnauthorized,
            "unauthorized",
            Value::Object(serde_json::Map::new()),
        )
    }

    pub fn pipeline_not_found(name: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::PipelineNotFound,
            "preset not found",
            to_details(NotFoundDetails { id: name.into() }),
        )
        .with_hint("GET /api/presets lists the presets known to the server")
    }

    pub fn program_not_configured(program: impl Into<String>) -> Self {
        let program = program.into();
        Self::new(
            ErrorCode::ConfigProgramNotConfigured,
            format!("program not configured: {}", program),
            to_details(NotFoundDetails { id: program }),
        )
    }

    pub fn process_spawn_failed(
        program: impl Into<String>,
        command: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        let details = to_details(ProcessFailedDetails {
            program: program.into(),
            command: command.into(),
            error: error.into(),
            exit_code: None,
        });

        Self::new(ErrorCode::ProcessSpawnFailed, "failed to start", details)
    }

    pub fn process_exit_failed(
        program: impl Into<String>,
        command: impl Into<String>,
        error: impl Into<String>,
        exit_code: Option<i32>,
    ) -> Self {
        let details = to_details(ProcessFailedDetails {
            program: program.into(),
            command: command.into(),
            error: error.into(),
            exit_code,
        });

        Self::new(
            ErrorCode::ProcessExitFailed,
            "process exited with error",
            details,
        )
    }

    pub fn connection_closed(context: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::ProtocolConnectionClosed,
            "connection closed",
            serde_json::json!({ "error": context.into() }),
        )
    }

    pub fn config_invalid_json(path: impl Into<String>, err: serde_json::Error) -> Self {
        let details = to_details(ConfigInvalidJsonDetails {
            path: path.into(),
            error: err.to_string(),
        });

        Self::new(
            ErrorCode::ConfigInvalidJson,
            "Invalid JSON in configuration",
            details,
        )
    }

    pub fn internal_io(error: impl Into<String>, context: Option<String>) -> Self {
        let message = context.clone().unwrap_or_else(|| "IO error".to_string());
        let details = to_details(InternalIoErrorDetails {
            error: error.into(),
            context,
        });

        Self::new(ErrorCode::InternalIoError, message, details)
    }

    pub fn internal_json(error: impl Into<String>, context: Option<String>) -> Self {
        let details = to_details(InternalJsonErrorDetails {
            error: error.into(),
            context,
        });

        Self::new(ErrorCode::InternalJsonError, "JSON error", details)
    }

    pub fn internal_unexpected(error: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::InternalUnexpected,
            "Unexpected error",
            serde_json::json!({ "error": error.into() }),
        )
    }

    pub fn with_hint(mut self, message: impl Into<String>) -> Self {
        self.hints.push(Hint {
            message: message.into(),
        });
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reason_appends_underlying_cause() {
        let err = Error::process_spawn_failed("vbsp", "/tools/vbsp", "No such file or directory");
        assert_eq!(err.reason(), "failed to start: No such file or directory");
        assert!(err.code.is_process_error());
    }

    #[test]
    fn reason_is_message_when_no_cause() {
        let err = Error::program_not_configured("vrad");
        assert_eq!(err.reason(), "program not configured: vrad");
        assert_eq!(err.code.as_str(), "config.program_not_configured");
    }

    #[test]
    fn internal_io_uses_context_as_message() {
        let err = Error::internal_io("permission denied", Some("failed to read bsp".to_string()));
        assert_eq!(err.reason(), "failed to read bsp: permission denied");
    }
}
