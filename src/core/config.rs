use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::defaults;
use crate::error::{Error, Result};
use crate::utils::io;

/// Static server configuration, loaded once at startup and shared read-only.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    /// Shared credential. Empty disables authentication.
    #[serde(default)]
    pub password: String,

    /// Program registry: logical program key -> configured path.
    #[serde(default)]
    pub programs: BTreeMap<String, String>,

    /// Base installation path, e.g. `C:/Program Files/Steam/steamapps/common/garrysmod`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_game_path: Option<String>,

    /// Override for the compatibility wrapper binary.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wine_path: Option<String>,

    #[serde(rename = "gamedir", default, skip_serializing_if = "Option::is_none")]
    pub game_dir: Option<String>,

    #[serde(rename = "exedir", default, skip_serializing_if = "Option::is_none")]
    pub exe_dir: Option<String>,

    /// Accepted for compatibility; artifacts always land beside the input.
    #[serde(rename = "bspdir", default, skip_serializing_if = "Option::is_none")]
    pub bsp_dir: Option<String>,

    #[serde(rename = "tmp", default, skip_serializing_if = "Option::is_none")]
    pub tmp_dir: Option<String>,
}

/// Treat `Some("")` the same as `None`.
pub(crate) fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|s| !s.is_empty())
}

impl ServerConfig {
    pub fn base_game_path(&self) -> Option<&str> {
        non_empty(&self.base_game_path)
    }

    pub fn wrapper(&self) -> &str {
        non_empty(&self.wine_path).unwrap_or(defaults::DEFAULT_WRAPPER)
    }

    pub fn program(&self, key: &str) -> Option<&str> {
        self.programs.get(key).map(String::as_str)
    }

    pub fn has_program(&self, key: &str) -> bool {
        self.programs.contains_key(key)
    }

    /// Accepts anything when no credential is configured.
    pub fn check_credential(&self, provided: &str) -> Result<()> {
        if self.password.is_empty() || provided == self.password {
            Ok(())
        } else {
            Err(Error::unauthorized())
        }
    }

    /// Fill in the well-known tools under `baseGamePath` for keys not configured.
    pub fn derive_default_programs(&mut self) {
        let Some(base) = self.base_game_path() else {
            return;
        };
        let base = base.replace('\\', "/");

        for (key, rel) in defaults::default_programs() {
            let entry = self.programs.entry((*key).to_string()).or_default();
            if entry.is_empty() {
                *entry = format!("{}{}", base, rel);
            }
        }
    }
}

/// Read and parse a config file, deriving default programs.
pub fn read(path: &Path) -> Result<ServerConfig> {
    let content = io::read_file(path, &format!("read {}", path.display()))?;
    let mut config: ServerConfig = serde_json::from_str(&content)
        .map_err(|e| Error::config_invalid_json(path.display().to_string(), e))?;
    config.derive_default_programs();
    Ok(config)
}

pub fn write(path: &Path, config: &ServerConfig) -> Result<()> {
    let content = serde_json::to_string_pretty(config).map_err(|e| {
        Error::internal_json(e.to_string(), Some("serialize server config".to_string()))
    })?;
    io::write_file_atomic(path, &content, &format!("write {}", path.display()))
}

/// Load the config, writing a default one when the file is missing or invalid.
pub fn load_or_init(path: &Path) -> Result<ServerConfig> {
    match read(path) {
        Ok(config) => Ok(config),
        Err(err) => {
            tracing::warn!(
                path = %path.display(),
                error = %err.reason(),
                "config unavailable, writing defaults"
            );
            let config = ServerConfig::default();
            if let Err(write_err) = write(path, &config) {
                tracing::warn!(error = %write_err.reason(), "failed to write default config");
            }
            Ok(config)
        }
    }
}
