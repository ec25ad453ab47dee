//! Auto-save: periodic persistence of the formation being edited.

use crate::formation::Formation;
use crate::storage::{FileStorage, FormationRecord, FormationStorage, StorageResult};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Default auto-save interval in seconds.
pub const DEFAULT_AUTOSAVE_INTERVAL_SECS: u64 = 30;

/// Key for the "last opened" formation.
pub const LAST_FORMATION_KEY: &str = "__last_formation__";

/// Outcome of the most recent save, for display.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SaveStatus {
    #[default]
    Idle,
    Saving,
    Saved,
    Error(String),
}

/// Tracks unsaved changes and saves them on an interval.
pub struct AutoSaveManager {
    storage: Arc<dyn FormationStorage>,
    interval: Duration,
    last_save: Option<Instant>,
    /// Formation as of the last save or load, for change detection.
    saved: Option<Formation>,
    dirty: bool,
    status: SaveStatus,
    project_id: Option<String>,
}

impl std::fmt::Debug for AutoSaveManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AutoSaveManager")
            .field("interval", &self.interval)
            .field("dirty", &self.dirty)
            .field("status", &self.status)
            .field("project_id", &self.project_id)
            .finish_non_exhaustive()
    }
}

impl AutoSaveManager {
    pub fn new(storage: Arc<dyn FormationStorage>) -> Self {
        Self {
            storage,
            interval: Duration::from_secs(DEFAULT_AUTOSAVE_INTERVAL_SECS),
            last_save: None,
            saved: None,
            dirty: false,
            status: SaveStatus::Idle,
            project_id: None,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn set_interval(&mut self, interval: Duration) {
        self.interval = interval;
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Project saved records are filed under.
    pub fn set_project_id(&mut self, project_id: Option<String>) {
        self.project_id = project_id;
    }

    /// Mark the formation as having unsaved changes.
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// Mark dirty if `formation` differs from what was last saved or loaded.
    /// Returns whether there are unsaved changes.
    pub fn observe(&mut self, formation: &Formation) -> bool {
        if self.saved.as_ref() != Some(formation) {
            self.dirty = true;
        }
        self.dirty
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn status(&self) -> &SaveStatus {
        &self.status
    }

    /// Check if enough time has passed for an auto-save.
    pub fn should_save(&self, now: Instant) -> bool {
        if !self.dirty {
            return false;
        }
        match self.last_save {
            Some(last) => now.saturating_duration_since(last) >= self.interval,
            None => true,
        }
    }

    /// Save if `formation` changed and the interval elapsed. Returns true if a
    /// save ran.
    pub async fn maybe_save(&mut self, formation: &Formation, now: Instant) -> StorageResult<bool> {
        self.observe(formation);
        if !self.should_save(now) {
            return Ok(false);
        }
        self.save(formation).await?;
        Ok(true)
    }

    /// Save immediately. The formation is also stored under
    /// [`LAST_FORMATION_KEY`] for restore on next launch.
    pub async fn save(&mut self, formation: &Formation) -> StorageResult<()> {
        self.status = SaveStatus::Saving;
        let record = FormationRecord::new(self.project_id.clone(), formation.clone());

        let result = match self.storage.save(&formation.id, &record).await {
            Ok(()) => self.storage.save(LAST_FORMATION_KEY, &record).await,
            Err(e) => Err(e),
        };
        match &result {
            Ok(()) => {
                self.status = SaveStatus::Saved;
                self.last_save = Some(Instant::now());
                self.saved = Some(formation.clone());
                self.dirty = false;
                log::debug!("Saved formation {}", formation.id);
            }
            Err(e) => {
                log::warn!("Failed to save formation {}: {}", formation.id, e);
                self.status = SaveStatus::Error(e.to_string());
            }
        }
        result
    }

    pub async fn load(&mut self, id: &str) -> StorageResult<FormationRecord> {
        let record = self.storage.load(id).await?;
        self.loaded(&record);
        Ok(record)
    }

    /// Load the last saved formation, if any.
    pub async fn load_last(&mut self) -> Option<FormationRecord> {
        let record = self.storage.load(LAST_FORMATION_KEY).await.ok()?;
        self.loaded(&record);
        Some(record)
    }

    fn loaded(&mut self, record: &FormationRecord) {
        self.project_id = record.project_id.clone();
        self.saved = Some(record.formation.clone());
        self.dirty = false;
        self.status = SaveStatus::Idle;
        self.last_save = Some(Instant::now());
    }

    pub async fn delete(&self, id: &str) -> StorageResult<()> {
        self.storage.delete(id).await
    }

    /// List saved formation ids, excluding the last-formation slot.
    pub async fn list_formations(&self) -> StorageResult<Vec<String>> {
        let mut ids = self.storage.list().await?;
        ids.retain(|id| id != LAST_FORMATION_KEY);
        Ok(ids)
    }

    pub fn storage(&self) -> &Arc<dyn FormationStorage> {
        &self.storage
    }
}

/// File storage in the platform's data directory.
pub fn create_default_storage() -> StorageResult<Arc<FileStorage>> {
    Ok(Arc::new(FileStorage::default_location()?))
}

/// Auto-save manager over the default file storage.
pub fn create_autosave_manager(interval: Duration) -> StorageResult<AutoSaveManager> {
    Ok(AutoSaveManager::new(create_default_storage()?).with_interval(interval))
}
