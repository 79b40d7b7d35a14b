//! Sync metadata key-value operations.

use rusqlite::{params, OptionalExtension};

use super::{Database, DbResult};
use crate::models::LastSync;

const LAST_SYNC_KEY: &str = "last_sync";

impl Database {
    /// Get metadata value.
    pub fn get_metadata(&self, key: &str) -> DbResult<Option<String>> {
        self.conn
            .query_row(
                "SELECT value FROM sync_metadata WHERE key = ?",
                [key],
                |row| row.get(0),
            )
            .optional()
            .map_err(Into::into)
    }

    /// Set metadata value.
    pub fn set_metadata(&self, key: &str, value: &str) -> DbResult<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO sync_metadata (key, value, updated_at)
             VALUES (?, ?, datetime('now'))",
            params![key, value],
        )?;
        Ok(())
    }

    /// Record the summary of a completed sync run.
    pub fn set_last_sync(&self, last: &LastSync) -> DbResult<()> {
        let json = serde_json::to_string(last)?;
        self.set_metadata(LAST_SYNC_KEY, &json)
    }

    /// Summary of the last completed sync run, if any.
    pub fn get_last_sync(&self) -> DbResult<Option<LastSync>> {
        match self.get_metadata(LAST_SYNC_KEY)? {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }
}
