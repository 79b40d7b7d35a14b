//! Medical request models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Local sync state of a request.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    /// Saved locally, not yet acknowledged by the remote service
    Pending,
    /// Last saved revision acknowledged by the remote service
    Synced,
}

impl SyncState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncState::Pending => "pending",
            SyncState::Synced => "synced",
        }
    }
}

/// Capture-time validation errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("patient name is required")]
    EmptyPatientName,

    #[error("symptoms are required")]
    EmptySymptoms,
}

/// Input from the capture flow, before an id is assigned.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewMedicalRequest {
    pub patient_name: String,
    pub symptoms: String,
    pub transcription_text: Option<String>,
    pub audio_file_path: Option<String>,
}

impl NewMedicalRequest {
    /// Create input with the two required fields.
    pub fn new(patient_name: impl Into<String>, symptoms: impl Into<String>) -> Self {
        Self {
            patient_name: patient_name.into(),
            symptoms: symptoms.into(),
            ..Default::default()
        }
    }

    pub fn with_transcription(mut self, text: impl Into<String>) -> Self {
        self.transcription_text = Some(text.into());
        self
    }

    pub fn with_audio_file(mut self, path: impl Into<String>) -> Self {
        self.audio_file_path = Some(path.into());
        self
    }

    /// Check required fields. Whitespace-only text counts as empty.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.patient_name.trim().is_empty() {
            return Err(ValidationError::EmptyPatientName);
        }
        if self.symptoms.trim().is_empty() {
            return Err(ValidationError::EmptySymptoms);
        }
        Ok(())
    }

    /// Validate and build a fresh pending request with a new id.
    pub fn into_request(self) -> Result<MedicalRequest, ValidationError> {
        self.validate()?;
        let now = Utc::now();
        Ok(MedicalRequest {
            id: uuid::Uuid::new_v4().to_string(),
            patient_name: self.patient_name.trim().to_string(),
            symptoms: self.symptoms.trim().to_string(),
            transcription_text: self.transcription_text.filter(|t| !t.trim().is_empty()),
            audio_file_path: self.audio_file_path,
            created_at: now,
            last_modified_at: now,
            sync_state: SyncState::Pending,
            revision: 0,
            synced_at: None,
        })
    }
}

/// A captured medical request.
///
/// Field edits only become durable through `RequestStore::save`, which
/// resets `sync_state` to `Pending` and bumps `revision`; the values of
/// `sync_state`, `revision`, `last_modified_at` and `synced_at` on a record
/// handed to `save` are ignored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MedicalRequest {
    /// Local UUID, generated at capture
    pub id: String,
    /// Patient name
    pub patient_name: String,
    /// Free-text symptoms
    pub symptoms: String,
    /// Speech-to-text output, may arrive after creation
    pub transcription_text: Option<String>,
    /// Path of the recorded audio on this device
    pub audio_file_path: Option<String>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last local mutation
    pub last_modified_at: DateTime<Utc>,
    /// Sync state
    pub sync_state: SyncState,
    /// Local edit counter, bumped by every save
    pub revision: i64,
    /// Last remote acknowledgment
    pub synced_at: Option<DateTime<Utc>>,
}

impl MedicalRequest {
    /// Check if the current revision has been acknowledged by the remote service.
    pub fn is_synced(&self) -> bool {
        self.sync_state == SyncState::Synced
    }

    /// Short one-line summary for list rows and logs.
    pub fn summary(&self) -> String {
        let symptoms: String = self.symptoms.chars().take(40).collect();
        if symptoms.len() < self.symptoms.len() {
            format!("{}: {}…", self.patient_name, symptoms)
        } else {
            format!("{}: {}", self.patient_name, symptoms)
        }
    }
}
