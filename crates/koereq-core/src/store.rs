//! Thread-safe record store.
//!
//! Wraps the SQLite [`Database`] behind a single mutex. Every mutation is one
//! SQL statement executed while the lock is held, so two writers to the same
//! id never interleave partial updates.

use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, info};

use crate::db::{Database, DbError};
use crate::models::{LastSync, MedicalRequest, SyncResult};

/// Local storage failed. The cause is human-readable.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("persistence error: {0}")]
pub struct PersistenceError(pub String);

impl From<DbError> for PersistenceError {
    fn from(e: DbError) -> Self {
        PersistenceError(e.to_string())
    }
}

impl<T> From<PoisonError<T>> for PersistenceError {
    fn from(e: PoisonError<T>) -> Self {
        PersistenceError(format!("Lock poisoned: {}", e))
    }
}

pub type StoreResult<T> = Result<T, PersistenceError>;

/// Durable store of medical requests and their sync state.
pub struct RequestStore {
    db: Mutex<Database>,
}

impl RequestStore {
    /// Open or create a store at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        Ok(Self::new(Database::open(path)?))
    }

    /// Create an in-memory store (for testing).
    pub fn open_in_memory() -> StoreResult<Self> {
        Ok(Self::new(Database::open_in_memory()?))
    }

    pub fn new(db: Database) -> Self {
        Self { db: Mutex::new(db) }
    }

    fn db(&self) -> StoreResult<MutexGuard<'_, Database>> {
        Ok(self.db.lock()?)
    }

    /// Upsert by id. The stored record is pending with `last_modified_at = now`.
    ///
    /// This is the only path that writes record fields.
    pub fn save(&self, request: &MedicalRequest) -> StoreResult<MedicalRequest> {
        let saved = self.db()?.save_request(request)?;
        debug!(id = %saved.id, revision = saved.revision, "Saved request");
        Ok(saved)
    }

    /// Attach or replace the transcription of an existing request.
    ///
    /// Returns `None` when the id is absent.
    pub fn attach_transcription(
        &self,
        id: &str,
        text: &str,
    ) -> StoreResult<Option<MedicalRequest>> {
        let db = self.db()?;
        let Some(mut request) = db.get_request(id)? else {
            return Ok(None);
        };
        request.transcription_text = Some(text.to_string());
        Ok(Some(db.save_request(&request)?))
    }

    /// Get a request by id.
    pub fn get(&self, id: &str) -> StoreResult<Option<MedicalRequest>> {
        Ok(self.db()?.get_request(id)?)
    }

    /// Snapshot of every request, newest first.
    pub fn all(&self) -> StoreResult<Vec<MedicalRequest>> {
        Ok(self.db()?.list_requests()?)
    }

    /// Snapshot of pending requests, oldest first.
    pub fn pending(&self) -> StoreResult<Vec<MedicalRequest>> {
        Ok(self.db()?.list_pending_requests()?)
    }

    pub fn pending_count(&self) -> StoreResult<u32> {
        Ok(self.db()?.count_pending_requests()?)
    }

    /// Mark a request synced. Missing or already-synced ids are a no-op.
    pub fn mark_synced(&self, id: &str) -> StoreResult<()> {
        self.db()?.mark_request_synced(id)?;
        Ok(())
    }

    /// Mark synced only if the request is still at `revision`.
    ///
    /// Returns false when nothing changed: the id is gone, already synced,
    /// or was saved again after `revision` was submitted.
    pub fn mark_synced_revision(&self, id: &str, revision: i64) -> StoreResult<bool> {
        Ok(self.db()?.mark_request_synced_revision(id, revision)?)
    }

    /// Delete a request. Deleting a missing id succeeds.
    pub fn delete(&self, id: &str) -> StoreResult<()> {
        if self.db()?.delete_request(id)? {
            info!(id = %id, "Deleted request");
        }
        Ok(())
    }

    /// Delete every request.
    pub fn clear(&self) -> StoreResult<()> {
        let removed = self.db()?.clear_requests()?;
        info!(removed, "Cleared request store");
        Ok(())
    }

    /// Record a completed run for display.
    pub fn record_sync(&self, result: SyncResult) -> StoreResult<()> {
        let last = LastSync {
            finished_at: Utc::now(),
            result,
        };
        self.db()?.set_last_sync(&last)?;
        Ok(())
    }

    /// Summary of the last completed run.
    pub fn last_sync(&self) -> StoreResult<Option<LastSync>> {
        Ok(self.db()?.get_last_sync()?)
    }

    /// Direct access to the database, for tests that need to break it.
    #[cfg(test)]
    pub(crate) fn with_db<R>(&self, f: impl FnOnce(&Database) -> R) -> StoreResult<R> {
        Ok(f(&*self.db()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewMedicalRequest, SyncState};

    fn make_request(name: &str) -> MedicalRequest {
        NewMedicalRequest::new(name, "fever").into_request().unwrap()
    }

    #[test]
    fn test_save_then_all() {
        let store = RequestStore::open_in_memory().unwrap();
        store.save(&make_request("Taro")).unwrap();

        let all = store.all().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].sync_state, SyncState::Pending);
    }

    #[test]
    fn test_attach_transcription_resets_pending() {
        let store = RequestStore::open_in_memory().unwrap();
        let saved = store.save(&make_request("Taro")).unwrap();
        store.mark_synced(&saved.id).unwrap();

        let updated = store
            .attach_transcription(&saved.id, "The patient reports fever since yesterday")
            .unwrap()
            .unwrap();
        assert_eq!(updated.sync_state, SyncState::Pending);
        assert_eq!(updated.revision, 2);
        assert_eq!(store.pending_count().unwrap(), 1);

        assert!(store.attach_transcription("missing", "x").unwrap().is_none());
    }

    #[test]
    fn test_delete_and_mark_synced_are_idempotent() {
        let store = RequestStore::open_in_memory().unwrap();
        let saved = store.save(&make_request("Taro")).unwrap();

        store.mark_synced(&saved.id).unwrap();
        store.mark_synced(&saved.id).unwrap();
        assert!(store.get(&saved.id).unwrap().unwrap().is_synced());

        store.delete(&saved.id).unwrap();
        store.delete(&saved.id).unwrap();
        assert!(store.all().unwrap().is_empty());
    }

    #[test]
    fn test_record_sync() {
        let store = RequestStore::open_in_memory().unwrap();
        assert!(store.last_sync().unwrap().is_none());

        store.record_sync(SyncResult::new(2, 1)).unwrap();
        assert_eq!(
            store.last_sync().unwrap().unwrap().result,
            SyncResult::new(2, 1)
        );
    }

    #[test]
    fn test_reopen_file_store_keeps_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("requests.db");

        let saved = {
            let store = RequestStore::open(&path).unwrap();
            store.save(&make_request("Taro")).unwrap()
        };

        let store = RequestStore::open(&path).unwrap();
        let reloaded = store.get(&saved.id).unwrap().unwrap();
        assert_eq!(reloaded, saved);
    }

    #[test]
    fn test_open_bad_path_is_persistence_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = RequestStore::open(dir.path().join("missing-dir").join("requests.db"));
        assert!(result.is_err());
    }
}
