//! In-memory storage implementation.

use super::{BoxFuture, FormationRecord, FormationStorage, StorageError, StorageResult};
use std::collections::HashMap;
use std::sync::RwLock;

/// In-memory storage for testing and ephemeral use.
#[derive(Default)]
pub struct MemoryStorage {
    records: RwLock<HashMap<String, FormationRecord>>,
}

impl MemoryStorage {
    /// Create a new empty memory storage.
    pub fn new() -> Self {
        Self::default()
    }
}

fn lock_error(e: impl std::fmt::Display) -> StorageError {
    StorageError::Other(format!("Lock error: {}", e))
}

impl FormationStorage for MemoryStorage {
    fn save(&self, id: &str, record: &FormationRecord) -> BoxFuture<'_, StorageResult<()>> {
        let id = id.to_string();
        let record = record.clone();
        Box::pin(async move {
            let mut records = self.records.write().map_err(lock_error)?;
            records.insert(id, record);
            Ok(())
        })
    }

    fn load(&self, id: &str) -> BoxFuture<'_, StorageResult<FormationRecord>> {
        let id = id.to_string();
        Box::pin(async move {
            let records = self.records.read().map_err(lock_error)?;
            records.get(&id).cloned().ok_or(StorageError::NotFound(id))
        })
    }

    fn delete(&self, id: &str) -> BoxFuture<'_, StorageResult<()>> {
        let id = id.to_string();
        Box::pin(async move {
            let mut records = self.records.write().map_err(lock_error)?;
            records.remove(&id);
            Ok(())
        })
    }

    fn list(&self) -> BoxFuture<'_, StorageResult<Vec<String>>> {
        Box::pin(async move {
            let records = self.records.read().map_err(lock_error)?;
            let mut ids: Vec<String> = records.keys().cloned().collect();
            ids.sort();
            Ok(ids)
        })
    }

    fn exists(&self, id: &str) -> BoxFuture<'_, StorageResult<bool>> {
        let id = id.to_string();
        Box::pin(async move {
            let records = self.records.read().map_err(lock_error)?;
            Ok(records.contains_key(&id))
        })
    }
}
