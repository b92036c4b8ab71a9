//! Built-in defaults shared by the server, the client and the CLI.

/// Default listen port for `maprelay server`.
pub const DEFAULT_PORT: u16 = 8000;

/// Default location of the server configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "server_config.json";

/// Default location of the preset store.
pub const DEFAULT_PRESETS_PATH: &str = "presets.json";

/// Default server address the client connects to (host:port, no scheme).
pub const DEFAULT_SERVER_ADDR: &str = "localhost:8000";

/// Default preset requested by the client.
pub const DEFAULT_PRESET: &str = "default";

/// Default build input path used by the client.
pub const DEFAULT_INPUT_PATH: &str = "map.vmf";

/// Compatibility wrapper used for Windows tools when no override is configured.
pub const DEFAULT_WRAPPER: &str = "wine";

/// File extension of the compiled artifact (without the dot).
pub const ARTIFACT_EXTENSION: &str = "bsp";

/// File name given to an inline upload that arrives without one.
pub const DEFAULT_UPLOAD_NAME: &str = "uploaded.vmf";

/// Prefix of the per-session temporary upload directory.
pub const UPLOAD_DIR_PREFIX: &str = "maprelay-";

/// Largest websocket frame or message either side accepts. Artifacts and
/// inline uploads travel as a single base64 text frame.
pub const MAX_MESSAGE_SIZE: usize = 1 << 30;

/// Header carrying the credential on administrative requests.
pub const PASSWORD_HEADER: &str = "X-Password";

/// Programs derived from `baseGamePath` when not configured explicitly.
pub fn default_programs() -> &'static [(&'static str, &'static str)] {
    &[
        ("vbsp", "/bin/win64/vbsp.exe"),
        ("vvis", "/bin/win64/vvisplusplus.exe"),
        ("vrad", "/bin/win64/vrad.exe"),
    ]
}
