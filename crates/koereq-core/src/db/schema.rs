//! SQLite schema definition.

/// Complete database schema for the request store.
pub const SCHEMA: &str = r#"
-- ============================================================================
-- Medical Requests
-- ============================================================================

CREATE TABLE IF NOT EXISTS medical_requests (
    id TEXT PRIMARY KEY,
    patient_name TEXT NOT NULL,
    symptoms TEXT NOT NULL,
    transcription_text TEXT,
    audio_file_path TEXT,
    created_at TEXT NOT NULL,                     -- RFC 3339, UTC, nanoseconds
    last_modified_at TEXT NOT NULL,
    sync_state TEXT NOT NULL DEFAULT 'pending'
        CHECK (sync_state IN ('pending', 'synced')),
    revision INTEGER NOT NULL DEFAULT 1,          -- bumped by every local save
    synced_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_medical_requests_created
    ON medical_requests(created_at DESC);

CREATE INDEX IF NOT EXISTS idx_medical_requests_sync_state
    ON medical_requests(sync_state, created_at);

-- ============================================================================
-- Sync Metadata
-- ============================================================================

CREATE TABLE IF NOT EXISTS sync_metadata (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;
