use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const COVTREND_DIR_NAME: &str = ".covtrend";
pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const DEFAULT_STORAGE_PATH: &str = ".covtrend/history";
pub const DEFAULT_RETENTION_DAYS: u32 = 90;
pub const DEFAULT_MAX_ENTRIES: usize = 1000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct CovtrendConfig {
    #[serde(default)]
    pub history: HistoryConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryConfig {
    #[serde(default = "default_storage_path")]
    pub storage_path: PathBuf,
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
    #[serde(default = "default_true")]
    pub auto_cleanup: bool,
    #[serde(default)]
    pub metrics_enabled: bool,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            storage_path: default_storage_path(),
            retention_days: DEFAULT_RETENTION_DAYS,
            max_entries: DEFAULT_MAX_ENTRIES,
            auto_cleanup: true,
            metrics_enabled: false,
        }
    }
}

impl HistoryConfig {
    pub fn with_storage_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.storage_path = path.into();
        self
    }

    /// Relative storage paths are anchored at the workspace root.
    pub fn resolve_storage_path(&self, workspace_root: impl AsRef<Path>) -> PathBuf {
        if self.storage_path.is_absolute() {
            self.storage_path.clone()
        } else {
            workspace_root.as_ref().join(&self.storage_path)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigWarning {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("failed to serialize config TOML: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

pub fn covtrend_dir(workspace_root: impl AsRef<Path>) -> PathBuf {
    workspace_root.as_ref().join(COVTREND_DIR_NAME)
}

pub fn config_path(workspace_root: impl AsRef<Path>) -> PathBuf {
    covtrend_dir(workspace_root).join(CONFIG_FILE_NAME)
}

pub fn load_workspace_config(
    workspace_root: impl AsRef<Path>,
) -> Result<CovtrendConfig, ConfigError> {
    let path = config_path(workspace_root);
    if !path.exists() {
        return Ok(CovtrendConfig::default());
    }

    let raw = fs::read_to_string(path)?;
    let parsed: CovtrendConfig = toml::from_str(&raw)?;
    Ok(normalize_config(parsed))
}

pub fn ensure_workspace_config(
    workspace_root: impl AsRef<Path>,
) -> Result<CovtrendConfig, ConfigError> {
    let workspace_root = workspace_root.as_ref();
    fs::create_dir_all(covtrend_dir(workspace_root))?;

    let path = config_path(workspace_root);
    if path.exists() {
        return load_workspace_config(workspace_root);
    }

    let config = CovtrendConfig::default();
    let content = toml::to_string_pretty(&config)?;
    fs::write(path, content)?;

    Ok(config)
}

pub fn validate_config(config: &CovtrendConfig) -> Vec<ConfigWarning> {
    let mut warnings = Vec::new();
    let history = &config.history;
    if !history.auto_cleanup {
        return warnings;
    }

    if history.retention_days == 0 {
        warnings.push(ConfigWarning {
            code: "history_retention_days",
            message: "[history].retention_days must be > 0 when auto_cleanup is enabled"
                .to_owned(),
        });
    }
    if history.max_entries == 0 {
        warnings.push(ConfigWarning {
            code: "history_max_entries",
            message: "[history].max_entries must be > 0 when auto_cleanup is enabled".to_owned(),
        });
    }

    warnings
}

fn default_storage_path() -> PathBuf {
    PathBuf::from(DEFAULT_STORAGE_PATH)
}

fn default_retention_days() -> u32 {
    DEFAULT_RETENTION_DAYS
}

fn default_max_entries() -> usize {
    DEFAULT_MAX_ENTRIES
}

fn default_true() -> bool {
    true
}

fn normalize_config(mut config: CovtrendConfig) -> CovtrendConfig {
    let storage_path = config.history.storage_path.to_string_lossy().trim().to_owned();
    if storage_path.is_empty() {
        config.history.storage_path = default_storage_path();
    } else {
        config.history.storage_path = PathBuf::from(storage_path);
    }

    config
}
