//! Per-run substitution variables derived from the build input location.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf, MAIN_SEPARATOR};

use crate::config::{non_empty, ServerConfig};
use crate::defaults::ARTIFACT_EXTENSION;
use crate::utils::template;

pub struct Var;

impl Var {
    /// Directory containing the input.
    pub const PATH: &'static str = "$path";
    pub const MAP_DIR: &'static str = "$mapdir";
    /// Input file name without extension.
    pub const FILE: &'static str = "$file";
    pub const NAME: &'static str = "$name";
    pub const TMP: &'static str = "$tmp";
    pub const GAME_DIR: &'static str = "$gamedir";
    pub const GAME: &'static str = "$game";
    pub const BSP_DIR: &'static str = "$bspdir";
    /// Full path of the compiled artifact.
    pub const BSP: &'static str = "$bsp";
    pub const EXE_DIR: &'static str = "$exedir";
    /// Absolute input path.
    pub const VMF: &'static str = "$vmf";
}

/// Immutable token -> value table shared by every step of one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableMap {
    vars: BTreeMap<&'static str, String>,
}

impl VariableMap {
    pub fn resolve(input: &Path, config: &ServerConfig) -> Self {
        let abs = std::path::absolute(input).unwrap_or_else(|_| input.to_path_buf());

        let dir = abs
            .parent()
            .map(|p| p.to_string_lossy().to_string())
            .unwrap_or_default();
        let dir = match dir.trim_end_matches(MAIN_SEPARATOR) {
            "" if !dir.is_empty() => MAIN_SEPARATOR.to_string(),
            trimmed => trimmed.to_string(),
        };

        let name = abs
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();

        let tmp = non_empty(&config.tmp_dir)
            .map(str::to_string)
            .unwrap_or_else(|| std::env::temp_dir().to_string_lossy().to_string());

        // Short names like "garrysmod" resolve under the base installation.
        let game_dir = match (non_empty(&config.game_dir), config.base_game_path()) {
            (Some(game), Some(base)) if !Path::new(game).is_absolute() => {
                Path::new(base).join(game).to_string_lossy().to_string()
            }
            (Some(game), _) => game.to_string(),
            (None, _) => String::new(),
        };

        // Always beside the input: later tools look for the artifact there,
        // whatever `bspdir` says.
        let bsp_dir = dir.clone();
        let bsp = Path::new(&bsp_dir)
            .join(format!("{}.{}", name, ARTIFACT_EXTENSION))
            .to_string_lossy()
            .to_string();

        let exe_dir = non_empty(&config.exe_dir).unwrap_or_default().to_string();

        let mut vars = BTreeMap::new();
        vars.insert(Var::PATH, dir.clone());
        vars.insert(Var::MAP_DIR, dir);
        vars.insert(Var::FILE, name.clone());
        vars.insert(Var::NAME, name);
        vars.insert(Var::TMP, tmp);
        vars.insert(Var::GAME_DIR, game_dir.clone());
        vars.insert(Var::GAME, game_dir);
        vars.insert(Var::BSP_DIR, bsp_dir);
        vars.insert(Var::BSP, bsp);
        vars.insert(Var::EXE_DIR, exe_dir);
        vars.insert(Var::VMF, abs.to_string_lossy().to_string());

        Self { vars }
    }

    pub fn get(&self, token: &str) -> Option<&str> {
        self.vars.get(token).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (*k, v.as_str()))
    }

    pub fn expand(&self, template: &str) -> String {
        template::render_longest_first(template, self.iter())
    }

    pub fn expand_all(&self, templates: &[String]) -> Vec<String> {
        templates.iter().map(|t| self.expand(t)).collect()
    }

    /// Directory the input lives in; the working directory of native tools.
    pub fn input_dir(&self) -> &str {
        self.get(Var::PATH).unwrap_or_default()
    }

    pub fn artifact_path(&self) -> Option<PathBuf> {
        self.get(Var::BSP)
            .filter(|p| !p.is_empty())
            .map(PathBuf::from)
    }
}
