//! Named pipelines ("presets") and their JSON-file backed store.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use crate::config::ServerConfig;
use crate::error::{Error, Result};
use crate::protocol;
use crate::utils::io;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    /// Key into the program registry.
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preset {
    pub name: String,
    #[serde(default)]
    pub steps: Vec<Step>,
}

impl Preset {
    /// Reject presets the server could never run.
    pub fn validate(&self, config: &ServerConfig) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::validation_invalid_argument(
                "name",
                "preset name required",
                None,
            ));
        }

        for step in &self.steps {
            if protocol::is_reserved_kind(&step.program) {
                return Err(Error::validation_invalid_argument(
                    "steps.program",
                    format!("reserved program key: {}", step.program),
                    Some(step.program.clone()),
                ));
            }
            if !config.has_program(&step.program) {
                return Err(Error::validation_invalid_argument(
                    "steps.program",
                    format!("unknown program: {}", step.program),
                    Some(step.program.clone()),
                ));
            }
        }

        Ok(())
    }
}

/// Preset table guarded by a read/write lock and persisted on every update.
///
/// Sessions take a clone of the preset they run, so an update never affects a
/// run already in flight.
#[derive(Debug)]
pub struct PresetStore {
    file: PathBuf,
    list: RwLock<BTreeMap<String, Preset>>,
}

impl PresetStore {
    /// In-memory store that persists to `file` on update. Nothing is read.
    pub fn new(file: impl Into<PathBuf>) -> Self {
        Self {
            file: file.into(),
            list: RwLock::new(BTreeMap::new()),
        }
    }

    /// Open the store at `file`. A missing or unparsable file yields an empty
    /// store, which is written back immediately.
    pub fn open(file: impl Into<PathBuf>) -> Result<Self> {
        let store = Self::new(file);

        if !store.file.exists() {
            store.save()?;
            return Ok(store);
        }

        let content = io::read_file(&store.file, "read presets")?;
        match serde_json::from_str::<Vec<Preset>>(&content) {
            Ok(presets) => {
                let mut list = store.write_lock();
                for preset in presets {
                    list.insert(preset.name.clone(), preset);
                }
            }
            Err(e) => {
                tracing::warn!(
                    path = %store.file.display(),
                    error = %e,
                    "failed to parse presets file, starting empty"
                );
                store.save()?;
            }
        }

        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.file
    }

    /// Validate against the program registry, then insert or replace by name.
    pub fn set(&self, preset: Preset, config: &ServerConfig) -> Result<()> {
        preset.validate(config)?;

        self.write_lock().insert(preset.name.clone(), preset);

        self.save()
    }

    pub fn get(&self, name: &str) -> Option<Preset> {
        self.read_lock().get(name).cloned()
    }

    /// Look up a preset or fail with `pipeline.not_found`.
    pub fn resolve(&self, name: &str) -> Result<Preset> {
        self.get(name)
            .ok_or_else(|| Error::pipeline_not_found(name))
    }

    /// All presets, ordered by name.
    pub fn list(&self) -> Vec<Preset> {
        self.read_lock().values().cloned().collect()
    }

    fn save(&self) -> Result<()> {
        let presets = self.list();
        let content = serde_json::to_string_pretty(&presets).map_err(|e| {
            Error::internal_json(e.to_string(), Some("serialize presets".to_string()))
        })?;

        io::write_file_atomic(&self.file, &content, "save presets")
    }

    fn read_lock(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<String, Preset>> {
        self.list.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_lock(&self) -> std::sync::RwLockWriteGuard<'_, BTreeMap<String, Preset>> {
        self.list.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
