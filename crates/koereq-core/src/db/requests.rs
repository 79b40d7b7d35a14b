//! Medical request database operations.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, OptionalExtension, Row};

use super::{Database, DbError, DbResult};
use crate::models::{MedicalRequest, SyncState};

const REQUEST_COLUMNS: &str = r#"
    id, patient_name, symptoms, transcription_text, audio_file_path,
    created_at, last_modified_at, sync_state, revision, synced_at
"#;

impl Database {
    /// Insert or update a request by id.
    ///
    /// Always stores the request as pending with a bumped revision and
    /// `last_modified_at = now`. An existing row keeps its `created_at`.
    pub fn save_request(&self, request: &MedicalRequest) -> DbResult<MedicalRequest> {
        let now = format_timestamp(&Utc::now());

        self.conn.execute(
            r#"
            INSERT INTO medical_requests (
                id, patient_name, symptoms, transcription_text, audio_file_path,
                created_at, last_modified_at, sync_state, revision, synced_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'pending', 1, NULL)
            ON CONFLICT(id) DO UPDATE SET
                patient_name = excluded.patient_name,
                symptoms = excluded.symptoms,
                transcription_text = excluded.transcription_text,
                audio_file_path = excluded.audio_file_path,
                last_modified_at = excluded.last_modified_at,
                sync_state = 'pending',
                revision = medical_requests.revision + 1,
                synced_at = NULL
            "#,
            params![
                request.id,
                request.patient_name,
                request.symptoms,
                request.transcription_text,
                request.audio_file_path,
                format_timestamp(&request.created_at),
                now,
            ],
        )?;

        self.get_request(&request.id)?.ok_or_else(|| {
            DbError::Constraint(format!("Request vanished after save: {}", request.id))
        })
    }

    /// Get a request by id.
    pub fn get_request(&self, id: &str) -> DbResult<Option<MedicalRequest>> {
        self.conn
            .query_row(
                &format!("SELECT {REQUEST_COLUMNS} FROM medical_requests WHERE id = ?"),
                [id],
                RequestRow::from_row,
            )
            .optional()?
            .map(|row| row.try_into())
            .transpose()
    }

    /// List all requests, newest first.
    pub fn list_requests(&self) -> DbResult<Vec<MedicalRequest>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {REQUEST_COLUMNS} FROM medical_requests ORDER BY created_at DESC, rowid DESC"
        ))?;

        let rows = stmt.query_map([], RequestRow::from_row)?;

        let mut requests = Vec::new();
        for row in rows {
            requests.push(row?.try_into()?);
        }
        Ok(requests)
    }

    /// List pending requests, oldest first (submission order).
    pub fn list_pending_requests(&self) -> DbResult<Vec<MedicalRequest>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {REQUEST_COLUMNS} FROM medical_requests
             WHERE sync_state = 'pending'
             ORDER BY created_at ASC, rowid ASC"
        ))?;

        let rows = stmt.query_map([], RequestRow::from_row)?;

        let mut requests = Vec::new();
        for row in rows {
            requests.push(row?.try_into()?);
        }
        Ok(requests)
    }

    /// Count pending requests.
    pub fn count_pending_requests(&self) -> DbResult<u32> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM medical_requests WHERE sync_state = 'pending'",
            [],
            |row| row.get(0),
        )?;
        Ok(count as u32)
    }

    /// Mark a request synced regardless of revision.
    ///
    /// Returns false when the id is missing or already synced.
    pub fn mark_request_synced(&self, id: &str) -> DbResult<bool> {
        let rows_affected = self.conn.execute(
            "UPDATE medical_requests SET sync_state = 'synced', synced_at = ?2
             WHERE id = ?1 AND sync_state = 'pending'",
            params![id, format_timestamp(&Utc::now())],
        )?;
        Ok(rows_affected > 0)
    }

    /// Mark a request synced only if it is still at `revision`.
    ///
    /// Returns false when the id is missing, already synced, or was saved
    /// again after `revision` was read.
    pub fn mark_request_synced_revision(&self, id: &str, revision: i64) -> DbResult<bool> {
        let rows_affected = self.conn.execute(
            "UPDATE medical_requests SET sync_state = 'synced', synced_at = ?3
             WHERE id = ?1 AND revision = ?2 AND sync_state = 'pending'",
            params![id, revision, format_timestamp(&Utc::now())],
        )?;
        Ok(rows_affected > 0)
    }

    /// Delete a request. Returns false when the id was absent.
    pub fn delete_request(&self, id: &str) -> DbResult<bool> {
        let rows_affected = self
            .conn
            .execute("DELETE FROM medical_requests WHERE id = ?", [id])?;
        Ok(rows_affected > 0)
    }

    /// Delete every request. Returns the number of rows removed.
    pub fn clear_requests(&self) -> DbResult<usize> {
        let rows_affected = self.conn.execute("DELETE FROM medical_requests", [])?;
        Ok(rows_affected)
    }
}

/// Intermediate row struct for database mapping.
struct RequestRow {
    id: String,
    patient_name: String,
    symptoms: String,
    transcription_text: Option<String>,
    audio_file_path: Option<String>,
    created_at: String,
    last_modified_at: String,
    sync_state: String,
    revision: i64,
    synced_at: Option<String>,
}

impl RequestRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(RequestRow {
            id: row.get(0)?,
            patient_name: row.get(1)?,
            symptoms: row.get(2)?,
            transcription_text: row.get(3)?,
            audio_file_path: row.get(4)?,
            created_at: row.get(5)?,
            last_modified_at: row.get(6)?,
            sync_state: row.get(7)?,
            revision: row.get(8)?,
            synced_at: row.get(9)?,
        })
    }
}

impl TryFrom<RequestRow> for MedicalRequest {
    type Error = DbError;

    fn try_from(row: RequestRow) -> Result<Self, Self::Error> {
        Ok(MedicalRequest {
            id: row.id,
            patient_name: row.patient_name,
            symptoms: row.symptoms,
            transcription_text: row.transcription_text,
            audio_file_path: row.audio_file_path,
            created_at: parse_timestamp(&row.created_at)?,
            last_modified_at: parse_timestamp(&row.last_modified_at)?,
            sync_state: string_to_sync_state(&row.sync_state)?,
            revision: row.revision,
            synced_at: row.synced_at.as_deref().map(parse_timestamp).transpose()?,
        })
    }
}

/// Fixed-width RFC 3339 so lexical order matches time order.
pub(crate) fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

pub(crate) fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, DbError> {
    Ok(DateTime::parse_from_rfc3339(s)?.with_timezone(&Utc))
}

fn string_to_sync_state(s: &str) -> Result<SyncState, DbError> {
    match s {
        "pending" => Ok(SyncState::Pending),
        "synced" => Ok(SyncState::Synced),
        _ => Err(DbError::Constraint(format!("Unknown sync state: {}", s))),
    }
}
