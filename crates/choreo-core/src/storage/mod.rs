//! Storage abstraction for persistence.

mod autosave;
mod file;
mod memory;

pub use autosave::{
    AutoSaveManager, DEFAULT_AUTOSAVE_INTERVAL_SECS, LAST_FORMATION_KEY, SaveStatus,
    create_autosave_manager, create_default_storage,
};
pub use file::FileStorage;
pub use memory::MemoryStorage;

use crate::formation::{Formation, FormationMeta, new_id};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Current on-disk record layout.
pub const RECORD_VERSION: u32 = 1;

/// Storage errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Formation not found: {0}")]
    NotFound(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("IO error: {0}")]
    Io(String),
    #[error("Storage error: {0}")]
    Other(String),
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Boxed future for async operations.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + 'a>>;

/// A persisted formation and the project it belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormationRecord {
    #[serde(default = "record_version")]
    pub version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    pub formation: Formation,
}

fn record_version() -> u32 {
    RECORD_VERSION
}

impl FormationRecord {
    pub fn new(project_id: Option<String>, formation: Formation) -> Self {
        Self {
            version: RECORD_VERSION,
            project_id,
            formation,
        }
    }

    pub fn id(&self) -> &str {
        &self.formation.id
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Parse a record. Keyframes are re-sorted and dangling positions dropped
    /// so hand-edited files load cleanly.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let mut record: Self = serde_json::from_str(json)?;
        record.formation.sort_keyframes();
        record.formation.prune_dangling_positions();
        Ok(record)
    }
}

/// Trait for formation storage backends.
///
/// Implementations can keep formations in memory, on the filesystem, or
/// behind a remote API.
pub trait FormationStorage: Send + Sync {
    /// Save a formation.
    fn save(&self, id: &str, record: &FormationRecord) -> BoxFuture<'_, StorageResult<()>>;

    /// Load a formation.
    fn load(&self, id: &str) -> BoxFuture<'_, StorageResult<FormationRecord>>;

    /// Delete a formation. Deleting a missing id is not an error.
    fn delete(&self, id: &str) -> BoxFuture<'_, StorageResult<()>>;

    /// List all stored ids.
    fn list(&self) -> BoxFuture<'_, StorageResult<Vec<String>>>;

    /// Check if a formation exists.
    fn exists(&self, id: &str) -> BoxFuture<'_, StorageResult<bool>>;

    /// Create and save an empty formation with one keyframe at time zero.
    fn create(&self, project_id: Option<&str>, meta: FormationMeta) -> BoxFuture<'_, StorageResult<FormationRecord>> {
        let record = FormationRecord::new(project_id.map(str::to_string), Formation::from_meta(new_id(), meta));
        Box::pin(async move {
            self.save(record.id(), &record).await?;
            Ok(record)
        })
    }
}
