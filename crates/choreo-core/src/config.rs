//! Editor configuration.
//!
//! Every field has a default, so a config file only needs the keys it
//! changes.

use crate::crdt::UndoSettings;
use crate::formation::{DEFAULT_GRID_SIZE, DEFAULT_STAGE_HEIGHT, DEFAULT_STAGE_WIDTH, FormationMeta};
use crate::geometry::SnapMode;
use crate::history::DEFAULT_HISTORY_CAPACITY;
use crate::presence::DEFAULT_PRESENCE_TIMEOUT;
use crate::storage::DEFAULT_AUTOSAVE_INTERVAL_SECS;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid config: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EditorConfig {
    /// Undo states kept by solo sessions.
    pub history_capacity: usize,
    pub playback_tick_ms: u64,
    pub crdt_max_undo_steps: usize,
    /// Local CRDT edits closer together than this undo as one step.
    pub crdt_undo_merge_interval_ms: i64,
    pub autosave_interval_secs: u64,
    pub presence_timeout_secs: u64,
    pub snap_mode: SnapMode,
    pub stage_width: f64,
    pub stage_height: f64,
    pub grid_size: f64,
}

impl Default for EditorConfig {
    fn default() -> Self {
        let undo = UndoSettings::default();
        Self {
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            playback_tick_ms: 16,
            crdt_max_undo_steps: undo.max_steps,
            crdt_undo_merge_interval_ms: undo.merge_interval_ms,
            autosave_interval_secs: DEFAULT_AUTOSAVE_INTERVAL_SECS,
            presence_timeout_secs: DEFAULT_PRESENCE_TIMEOUT.as_secs(),
            snap_mode: SnapMode::None,
            stage_width: DEFAULT_STAGE_WIDTH,
            stage_height: DEFAULT_STAGE_HEIGHT,
            grid_size: DEFAULT_GRID_SIZE,
        }
    }
}

impl EditorConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&json)
    }

    /// `<config dir>/choreo/config.json`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("choreo").join("config.json"))
    }

    /// Load from the default path, falling back to defaults when the file is
    /// missing or invalid.
    pub fn load_or_default() -> Self {
        let Some(path) = Self::default_path() else {
            return Self::default();
        };
        if !path.exists() {
            return Self::default();
        }
        match Self::load(&path) {
            Ok(config) => config,
            Err(e) => {
                log::warn!("{}; using defaults", e);
                Self::default()
            }
        }
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.playback_tick_ms.max(1))
    }

    pub fn undo_settings(&self) -> UndoSettings {
        UndoSettings {
            max_steps: self.crdt_max_undo_steps,
            merge_interval_ms: self.crdt_undo_merge_interval_ms,
        }
    }

    pub fn autosave_interval(&self) -> Duration {
        Duration::from_secs(self.autosave_interval_secs)
    }

    pub fn presence_timeout(&self) -> Duration {
        Duration::from_secs(self.presence_timeout_secs)
    }

    /// Meta for a new formation using the configured stage.
    pub fn new_formation_meta(&self, name: impl Into<String>) -> FormationMeta {
        FormationMeta {
            name: name.into(),
            description: None,
            stage_width: self.stage_width,
            stage_height: self.stage_height,
            grid_size: self.grid_size,
        }
    }
}
