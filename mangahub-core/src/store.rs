//! Persistence collaborator consumed by the sync server and reconciliation.
//!
//! Implementors provide `load`, `save` and `list_records`; the existence
//! check, insert and in-place chapter update used on the sync path are
//! provided on top of those.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use chrono::{DateTime, Utc};

use crate::progress::{ProgressRecord, ProgressUpdate};

/// Storage errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("Progress not found for user {user_id}, manga {manga_id}")]
    NotFound { user_id: String, manga_id: String },
    #[error("Storage backend error: {0}")]
    Backend(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Durable home of progress records, keyed by `(user_id, manga_id)`.
pub trait ProgressStore: Send + Sync {
    fn load(&self, user_id: &str, manga_id: &str) -> Result<Option<ProgressRecord>, StoreError>;

    /// Insert or replace the record under its composite key.
    fn save(&self, record: &ProgressRecord) -> Result<(), StoreError>;

    fn list_records(&self, user_id: &str) -> Result<Vec<ProgressRecord>, StoreError>;

    fn exists_record(&self, user_id: &str, manga_id: &str) -> Result<bool, StoreError> {
        Ok(self.load(user_id, manga_id)?.is_some())
    }

    fn insert_record(&self, record: &ProgressRecord) -> Result<(), StoreError> {
        self.save(record)
    }

    /// Set the chapter and `updated_at` of an existing record.
    ///
    /// `updated_at` is written as given, so the stored value always
    /// reflects the update that produced it.
    fn update_chapter_and_timestamp(
        &self,
        user_id: &str,
        manga_id: &str,
        chapter: u32,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut record = self
            .load(user_id, manga_id)?
            .ok_or_else(|| StoreError::NotFound {
                user_id: user_id.to_string(),
                manga_id: manga_id.to_string(),
            })?;
        record.current_chapter = chapter;
        record.updated_at = at;
        self.save(&record)
    }
}

/// Upsert a sync update: update in place when the key exists, otherwise
/// insert a new `reading` record.
pub fn persist_update(
    store: &dyn ProgressStore,
    update: &ProgressUpdate,
) -> Result<(), StoreError> {
    if store.exists_record(&update.user_id, &update.manga_id)? {
        store.update_chapter_and_timestamp(
            &update.user_id,
            &update.manga_id,
            update.chapter,
            update.timestamp_utc(),
        )?;
    } else {
        store.insert_record(&ProgressRecord::from_update(update))?;
    }
    log::debug!(
        "Saved progress: user {} manga {} chapter {}",
        update.user_id,
        update.manga_id,
        update.chapter
    );
    Ok(())
}

/// In-memory store. Used by tests and as the default when no on-disk
/// store is configured.
#[derive(Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<(String, String), ProgressRecord>>,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store with records.
    pub fn with_records(records: impl IntoIterator<Item = ProgressRecord>) -> Self {
        let store = Self::new();
        if let Ok(mut map) = store.records.write() {
            for record in records {
                map.insert((record.user_id.clone(), record.manga_id.clone()), record);
            }
        }
        store
    }

    /// Make every subsequent `save` fail with a backend error.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.records.read().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned<T>(_: T) -> StoreError {
    StoreError::Backend("memory store lock poisoned".to_string())
}

impl ProgressStore for MemoryStore {
    fn load(&self, user_id: &str, manga_id: &str) -> Result<Option<ProgressRecord>, StoreError> {
        let map = self.records.read().map_err(poisoned)?;
        Ok(map
            .get(&(user_id.to_string(), manga_id.to_string()))
            .cloned())
    }

    fn save(&self, record: &ProgressRecord) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("writes disabled".to_string()));
        }
        let mut map = self.records.write().map_err(poisoned)?;
        map.insert(
            (record.user_id.clone(), record.manga_id.clone()),
            record.clone(),
        );
        Ok(())
    }

    fn list_records(&self, user_id: &str) -> Result<Vec<ProgressRecord>, StoreError> {
        let map = self.records.read().map_err(poisoned)?;
        let mut records: Vec<ProgressRecord> = map
            .values()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect();
        records.sort_by(|a, b| a.manga_id.cmp(&b.manga_id));
        Ok(records)
    }
}
