use std::env;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

pub const DEFAULT_CONFIG_FILE: &str = "config.json";
pub const DEFAULT_DB_FILE: &str = "file_index.db";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub root_dir: PathBuf,
    pub db_path: PathBuf,
    pub viewer: ViewerSettings,
    pub search: SearchSettings,
    pub index: IndexSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewerSettings {
    pub command: String,
    pub args: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchSettings {
    pub result_limit: usize,
    pub score_threshold: u32,
    /// Ceiling on rows pulled from the substring prefilter before fuzzy ranking.
    pub candidate_cap: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexSettings {
    pub batch_size: usize,
    pub strategy: RebuildMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RebuildMode {
    Swap,
    TruncateFirst,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from("."),
            db_path: PathBuf::from(DEFAULT_DB_FILE),
            viewer: ViewerSettings::default(),
            search: SearchSettings::default(),
            index: IndexSettings::default(),
        }
    }
}

impl Default for ViewerSettings {
    fn default() -> Self {
        Self {
            command: default_viewer_command().to_string(),
            args: Vec::new(),
        }
    }
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            result_limit: 20,
            score_threshold: 50,
            candidate_cap: 200,
        }
    }
}

impl Default for IndexSettings {
    fn default() -> Self {
        Self {
            batch_size: 500,
            strategy: RebuildMode::Swap,
        }
    }
}

impl Settings {
    /// Loads settings from a JSON file. Missing fields fall back to defaults, and
    /// relative paths are resolved against the directory holding the file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let settings = Self::from_json(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        let base = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        Ok(settings.resolved_against(base))
    }

    pub fn from_json(content: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(content)
    }

    pub fn resolved_against(mut self, base: &Path) -> Self {
        self.root_dir = resolve_path(base, &expand_home(&self.root_dir));
        self.db_path = resolve_path(base, &self.db_path);
        self
    }
}

fn resolve_path(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

fn expand_home(path: &Path) -> PathBuf {
    let Ok(rest) = path.strip_prefix("~") else {
        return path.to_path_buf();
    };

    match env::var_os("HOME").or_else(|| env::var_os("USERPROFILE")) {
        Some(home) => PathBuf::from(home).join(rest),
        None => path.to_path_buf(),
    }
}

fn default_viewer_command() -> &'static str {
    if cfg!(target_os = "windows") {
        "explorer"
    } else if cfg!(target_os = "macos") {
        "open"
    } else {
        "xdg-open"
    }
}
